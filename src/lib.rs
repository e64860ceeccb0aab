//! doctemplate - compiled, cached document templates
//!
//! This library compiles `{{mustache}}`-style text templates into instruction
//! trees, renders them against typed variables and serves repeated renders from
//! a bounded multi-level cache.
//!
//! # Example
//!
//! ```rust
//! use doctemplate::{render_str, vars};
//!
//! let out = render_str("Hello {{name}}!", &vars! { "name" => "World" }).unwrap();
//! assert_eq!(out, "Hello World!");
//! ```
//!
//! Long-lived services register templates in a [`TemplateRegistry`] instead,
//! which loads content lazily and caches both compiled and rendered forms.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod registry;
pub mod render;
pub mod template;
pub mod value;

pub use compiler::{compile, CompiledTemplate};
pub use config::{ConfigError, EngineConfig};
pub use error::CompileError;
pub use index::TemplateIndex;
pub use logging::init_logging;
pub use registry::{RegistryError, RegistryMetrics, RenderRequest, Stage, TemplateRegistry};
pub use render::{render, RenderError};
pub use template::{BoxError, ContentLoader, StaticContent, TemplateId, TemplateMetadata};
pub use value::{Fingerprint, Value, Variables};

// Re-exported for callers that drive `render_batch_with_cancel`
pub use tokio_util::sync::CancellationToken;

use thiserror::Error;

/// Errors from the one-shot [`render_str`] pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Template source is malformed
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// Rendering failed
    #[error("render error: {0}")]
    Render(#[from] RenderError),
}

/// Compile and render template source in one step, without caching
///
/// Absent variables render as empty. Use [`compile`] and [`render`] directly
/// for strict mode or to reuse the compiled form.
pub fn render_str(source: &str, variables: &Variables) -> Result<String, Error> {
    let compiled = compile(source)?;
    Ok(render(&compiled, variables, false)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars;

    #[test]
    fn test_render_str_substitution() {
        let out = render_str("Hello {{name}}!", &vars! { "name" => "World" }).unwrap();
        assert_eq!(out, "Hello World!");
    }

    #[test]
    fn test_render_str_loop() {
        let out = render_str(
            "{{#each items}}- {{.}}\n{{/each}}",
            &vars! { "items" => vec!["a", "b"] },
        )
        .unwrap();
        assert_eq!(out, "- a\n- b\n");
    }

    #[test]
    fn test_render_str_compile_error() {
        let err = render_str("{{#if a}}{{/each}}", &vars! {}).unwrap_err();
        match err {
            Error::Compile(inner) => assert_eq!(inner.offset(), 9),
            other => panic!("expected compile error, got {other:?}"),
        }
    }
}
