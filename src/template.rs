//! Template identity, metadata and the content loader interface

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Boxed error returned by content loaders
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unique template identifier, cheap to clone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(Arc<str>);

impl TemplateId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TemplateId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TemplateId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TemplateId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Descriptive data about a template, available before its content is loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub id: TemplateId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, rename = "type")]
    pub template_type: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl TemplateMetadata {
    /// Create metadata with only an id
    pub fn new(id: impl Into<TemplateId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            category: String::new(),
            template_type: String::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_type(mut self, template_type: impl Into<String>) -> Self {
        self.template_type = template_type.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Source of raw template bytes
///
/// Implementations may hit a database, the filesystem or the network; the engine
/// treats them as slow and fallible and calls them at most once per successful load.
pub trait ContentLoader: Send + Sync + 'static {
    fn load(&self, id: &TemplateId) -> Result<Vec<u8>, BoxError>;
}

impl<F, E> ContentLoader for F
where
    F: Fn(&TemplateId) -> Result<Vec<u8>, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    fn load(&self, id: &TemplateId) -> Result<Vec<u8>, BoxError> {
        self(id).map_err(Into::into)
    }
}

/// Loader for content already held in memory
#[derive(Debug, Clone)]
pub struct StaticContent(Arc<str>);

impl StaticContent {
    pub fn new(content: impl AsRef<str>) -> Self {
        Self(Arc::from(content.as_ref()))
    }
}

impl ContentLoader for StaticContent {
    fn load(&self, _id: &TemplateId) -> Result<Vec<u8>, BoxError> {
        Ok(self.0.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let meta = TemplateMetadata::new("api-readme")
            .with_name("API README")
            .with_category("docs")
            .with_type("markdown")
            .with_tags(["api", "readme"])
            .with_tag("api");
        assert_eq!(meta.id.as_str(), "api-readme");
        assert_eq!(meta.tags.len(), 2);
        assert_eq!(meta.template_type, "markdown");
    }

    #[test]
    fn test_metadata_from_toml() {
        let meta: TemplateMetadata = toml::from_str(
            r#"
            id = "changelog"
            category = "release"
            type = "markdown"
            tags = ["git", "release"]
            "#,
        )
        .unwrap();
        assert_eq!(meta.id, TemplateId::from("changelog"));
        assert_eq!(meta.template_type, "markdown");
        assert!(meta.name.is_empty());
        assert!(meta.tags.contains("git"));
    }

    #[test]
    fn test_closure_loader() {
        let loader = |id: &TemplateId| -> Result<Vec<u8>, std::io::Error> {
            Ok(format!("content of {}", id).into_bytes())
        };
        let bytes = ContentLoader::load(&loader, &TemplateId::from("t")).unwrap();
        assert_eq!(bytes, b"content of t");
    }

    #[test]
    fn test_static_content_loader() {
        let loader = StaticContent::new("Hello");
        assert_eq!(loader.load(&"x".into()).unwrap(), b"Hello");
    }
}
