//! Errors surfaced by registry operations

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::CompileError;
use crate::template::{BoxError, TemplateId};

/// Which bounded step ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Compile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Load => f.write_str("load"),
            Stage::Compile => f.write_str("compile"),
        }
    }
}

/// Errors that can occur during registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Template id already registered
    #[error("duplicate template id: {id}")]
    DuplicateId { id: TemplateId },

    /// Template id not registered
    #[error("template not found: {id}")]
    NotFound { id: TemplateId },

    /// Content loader failed or returned unusable bytes
    #[error("failed to load template {id}: {source}")]
    Load {
        id: TemplateId,
        #[source]
        source: BoxError,
    },

    /// Template content is malformed
    #[error("failed to compile template {id}: {source}")]
    Compilation {
        id: TemplateId,
        #[source]
        source: CompileError,
    },

    /// Strict mode: a referenced variable has no binding
    #[error("template {id} references missing variable '{variable}'")]
    MissingVariable { id: TemplateId, variable: String },

    /// Load or compile exceeded its configured bound
    #[error("{stage} of template {id} timed out after {after:?}")]
    Timeout {
        id: TemplateId,
        stage: Stage,
        after: Duration,
    },

    /// Batch element skipped because the batch was cancelled
    #[error("render of template {id} cancelled")]
    Cancelled { id: TemplateId },

    /// Batch element whose worker panicked while rendering
    #[error("render worker panicked while rendering template {id}")]
    WorkerPanicked { id: TemplateId },
}

impl RegistryError {
    pub fn not_found(id: impl Into<TemplateId>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn load(id: TemplateId, source: impl Into<BoxError>) -> Self {
        Self::Load {
            id,
            source: source.into(),
        }
    }

    /// The template the failed operation was about
    pub fn template_id(&self) -> &TemplateId {
        match self {
            Self::DuplicateId { id }
            | Self::NotFound { id }
            | Self::Load { id, .. }
            | Self::Compilation { id, .. }
            | Self::MissingVariable { id, .. }
            | Self::Timeout { id, .. }
            | Self::Cancelled { id }
            | Self::WorkerPanicked { id } => id,
        }
    }

    /// Whether retrying the same call unchanged may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Load { .. } | Self::Timeout { .. })
    }

    /// Compile error details, for compilation failures
    pub fn compile_error(&self) -> Option<&CompileError> {
        match self {
            Self::Compilation { source, .. } => Some(source),
            _ => None,
        }
    }
}
