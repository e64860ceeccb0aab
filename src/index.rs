//! Lookup tables and inverted text index over template metadata
//!
//! Only metadata is indexed (id, name, description, category, type, tags), never
//! template content, so the index stays proportional to the number of templates.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

use crate::template::{TemplateId, TemplateMetadata};

/// What the index remembers about a template, so it can be removed again
#[derive(Debug)]
struct IndexedTemplate {
    category: String,
    template_type: String,
    tags: BTreeSet<String>,
    terms: HashSet<String>,
}

#[derive(Debug, Default)]
struct IndexInner {
    by_category: HashMap<String, BTreeSet<TemplateId>>,
    by_type: HashMap<String, BTreeSet<TemplateId>>,
    by_tag: HashMap<String, BTreeSet<TemplateId>>,
    postings: HashMap<String, BTreeSet<TemplateId>>,
    templates: HashMap<TemplateId, IndexedTemplate>,
}

fn unlink(table: &mut HashMap<String, BTreeSet<TemplateId>>, key: &str, id: &TemplateId) {
    if let Some(ids) = table.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            table.remove(key);
        }
    }
}

impl IndexInner {
    fn remove(&mut self, id: &TemplateId) -> bool {
        let indexed = match self.templates.remove(id) {
            Some(indexed) => indexed,
            None => return false,
        };
        unlink(&mut self.by_category, &indexed.category, id);
        unlink(&mut self.by_type, &indexed.template_type, id);
        for tag in &indexed.tags {
            unlink(&mut self.by_tag, tag, id);
        }
        for term in &indexed.terms {
            unlink(&mut self.postings, term, id);
        }
        true
    }
}

/// Category, type, tag and full-text lookups over registered templates
#[derive(Debug, Default)]
pub struct TemplateIndex {
    inner: RwLock<IndexInner>,
}

impl TemplateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a template's metadata, replacing any previous entry for its id
    pub fn add(&self, metadata: &TemplateMetadata) {
        let id = &metadata.id;
        let mut terms = HashSet::new();
        let fields = [
            id.as_str(),
            metadata.name.as_str(),
            metadata.description.as_str(),
            metadata.category.as_str(),
            metadata.template_type.as_str(),
        ];
        for token in fields
            .into_iter()
            .chain(metadata.tags.iter().map(String::as_str))
            .flat_map(tokenize)
        {
            terms.insert(token);
        }

        let mut inner = self.inner.write();
        inner.remove(id);

        if !metadata.category.is_empty() {
            inner
                .by_category
                .entry(metadata.category.clone())
                .or_default()
                .insert(id.clone());
        }
        if !metadata.template_type.is_empty() {
            inner
                .by_type
                .entry(metadata.template_type.clone())
                .or_default()
                .insert(id.clone());
        }
        for tag in &metadata.tags {
            inner.by_tag.entry(tag.clone()).or_default().insert(id.clone());
        }
        for term in &terms {
            inner
                .postings
                .entry(term.clone())
                .or_default()
                .insert(id.clone());
        }
        inner.templates.insert(
            id.clone(),
            IndexedTemplate {
                category: metadata.category.clone(),
                template_type: metadata.template_type.clone(),
                tags: metadata.tags.clone(),
                terms,
            },
        );
    }

    /// Remove a template from every table; returns whether it was indexed
    pub fn remove(&self, id: &TemplateId) -> bool {
        self.inner.write().remove(id)
    }

    pub fn find_by_category(&self, category: &str) -> BTreeSet<TemplateId> {
        self.inner
            .read()
            .by_category
            .get(category)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find_by_type(&self, template_type: &str) -> BTreeSet<TemplateId> {
        self.inner
            .read()
            .by_type
            .get(template_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find_by_tag(&self, tag: &str) -> BTreeSet<TemplateId> {
        self.inner.read().by_tag.get(tag).cloned().unwrap_or_default()
    }

    /// Full-text search over metadata
    ///
    /// Every query term must match (AND). Results are ranked by the number of
    /// distinct query terms matched, then by id.
    pub fn search(&self, query: &str) -> Vec<TemplateId> {
        let mut terms: Vec<String> = tokenize(query).collect();
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Vec::new();
        }

        let inner = self.inner.read();
        let mut postings = Vec::with_capacity(terms.len());
        for term in &terms {
            match inner.postings.get(term) {
                Some(posting) => postings.push(posting),
                None => return Vec::new(),
            }
        }
        postings.sort_by_key(|posting| posting.len());

        let (smallest, rest) = match postings.split_first() {
            Some(split) => split,
            None => return Vec::new(),
        };
        let mut scored: Vec<(usize, TemplateId)> = smallest
            .iter()
            .filter_map(|id| {
                let matched = 1 + rest.iter().filter(|posting| posting.contains(id)).count();
                (matched == terms.len()).then(|| (matched, id.clone()))
            })
            .collect();

        scored.sort_by(|(a_score, a_id), (b_score, b_id)| {
            b_score.cmp(a_score).then_with(|| a_id.cmp(b_id))
        });
        scored.into_iter().map(|(_, id)| id).collect()
    }

    pub fn contains(&self, id: &TemplateId) -> bool {
        self.inner.read().templates.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lowercase alphanumeric word tokens
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}
