//! Error types for template compilation

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::compiler::{BlockKind, Span};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unterminated tag at byte {offset}")]
    UnterminatedTag { offset: usize, token: String },

    #[error("empty tag '{token}' at byte {offset}")]
    EmptyTag { offset: usize, token: String },

    #[error("invalid variable name in '{token}' at byte {offset}")]
    InvalidVariable { offset: usize, token: String },

    #[error("unknown block '{token}' at byte {offset}")]
    UnknownBlock { offset: usize, token: String },

    #[error("unexpected '{token}' at byte {offset}: no open block")]
    UnmatchedClose { offset: usize, token: String },

    #[error("mismatched '{token}' at byte {offset}: expected /{expected} for block opened at byte {opened_at}")]
    MismatchedClose {
        offset: usize,
        token: String,
        expected: BlockKind,
        opened_at: usize,
    },

    #[error("unclosed '{token}' opened at byte {offset}")]
    UnclosedBlock { offset: usize, token: String },

    #[error("misplaced '{token}' at byte {offset}")]
    MisplacedElse { offset: usize, token: String },

    #[error("'{token}' at byte {offset} nests blocks deeper than {max}")]
    NestingTooDeep {
        offset: usize,
        token: String,
        max: usize,
    },

    #[error("compilation deadline exceeded at byte {offset}")]
    DeadlineExceeded { offset: usize },
}

impl CompileError {
    /// Byte offset of the offending token
    pub fn offset(&self) -> usize {
        match self {
            Self::UnterminatedTag { offset, .. }
            | Self::EmptyTag { offset, .. }
            | Self::InvalidVariable { offset, .. }
            | Self::UnknownBlock { offset, .. }
            | Self::UnmatchedClose { offset, .. }
            | Self::MismatchedClose { offset, .. }
            | Self::UnclosedBlock { offset, .. }
            | Self::MisplacedElse { offset, .. }
            | Self::NestingTooDeep { offset, .. }
            | Self::DeadlineExceeded { offset } => *offset,
        }
    }

    /// The offending token text, if the error is tied to one
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::UnterminatedTag { token, .. }
            | Self::EmptyTag { token, .. }
            | Self::InvalidVariable { token, .. }
            | Self::UnknownBlock { token, .. }
            | Self::UnmatchedClose { token, .. }
            | Self::MismatchedClose { token, .. }
            | Self::UnclosedBlock { token, .. }
            | Self::MisplacedElse { token, .. }
            | Self::NestingTooDeep { token, .. } => Some(token),
            Self::DeadlineExceeded { .. } => None,
        }
    }

    /// Source span of the offending token
    pub fn span(&self) -> Span {
        let start = self.offset();
        start..start + self.token().map_or(0, str::len)
    }

    /// Whether the error comes from the template text rather than a resource bound
    pub fn is_syntax(&self) -> bool {
        !matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let mut buf = Vec::new();
        let span = self.span();
        let message = self.to_string();

        let written = Report::build(ReportKind::Error, filename, span.start)
            .with_message(&message)
            .with_label(
                Label::new((filename, span))
                    .with_message(&message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf);

        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_and_token_accessors() {
        let err = CompileError::UnmatchedClose {
            offset: 9,
            token: "{{/each}}".to_string(),
        };
        assert_eq!(err.offset(), 9);
        assert_eq!(err.token(), Some("{{/each}}"));
        assert_eq!(err.span(), 9..18);
        assert!(err.is_syntax());
    }

    #[test]
    fn test_deadline_is_not_syntax() {
        let err = CompileError::DeadlineExceeded { offset: 4 };
        assert_eq!(err.token(), None);
        assert_eq!(err.span(), 4..4);
        assert!(!err.is_syntax());
    }

    #[test]
    fn test_nesting_too_deep_is_syntax() {
        let err = CompileError::NestingTooDeep {
            offset: 12,
            token: "{{#if a}}".to_string(),
            max: 256,
        };
        assert!(err.is_syntax());
        assert_eq!(err.span(), 12..21);
        insta::assert_snapshot!(
            err.to_string(),
            @"'{{#if a}}' at byte 12 nests blocks deeper than 256"
        );
    }

    #[test]
    fn test_mismatched_close_display() {
        let err = CompileError::MismatchedClose {
            offset: 9,
            token: "{{/each}}".to_string(),
            expected: BlockKind::If,
            opened_at: 0,
        };
        insta::assert_snapshot!(
            err.to_string(),
            @"mismatched '{{/each}}' at byte 9: expected /if for block opened at byte 0"
        );
    }

    #[test]
    fn test_format_includes_source_context() {
        let source = "{{#if a}}{{/each}}";
        let err = CompileError::MismatchedClose {
            offset: 9,
            token: "{{/each}}".to_string(),
            expected: BlockKind::If,
            opened_at: 0,
        };
        let report = err.format(source, "report.tmpl");
        assert!(report.contains("report.tmpl"));
        assert!(report.contains("mismatched"));
    }
}
