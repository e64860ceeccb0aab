//! Single-pass block scanner turning tokens into an instruction tree

use std::time::Instant;

use crate::error::CompileError;

use super::instruction::{BlockKind, CompiledTemplate, Instruction, VarPath};
use super::lexer::{lex, Span, Token};

/// How many tokens are scanned between deadline checks
const DEADLINE_CHECK_INTERVAL: usize = 64;

/// Deepest block nesting accepted; rendering recurses once per level
pub const MAX_NESTING_DEPTH: usize = 256;

/// Compile template source into its instruction tree
pub fn compile(source: &str) -> Result<CompiledTemplate, CompileError> {
    compile_with_deadline(source, None)
}

/// Compile template source, giving up with [`CompileError::DeadlineExceeded`] once
/// `deadline` has passed
pub fn compile_with_deadline(
    source: &str,
    deadline: Option<Instant>,
) -> Result<CompiledTemplate, CompileError> {
    let mut scanner = Scanner::new();

    for (n, (token, span)) in lex(source).enumerate() {
        if n % DEADLINE_CHECK_INTERVAL == DEADLINE_CHECK_INTERVAL - 1 {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(CompileError::DeadlineExceeded { offset: span.start });
                }
            }
        }

        let text = &source[span.clone()];
        match token {
            Token::Text | Token::Brace => scanner.push_literal(text),
            Token::UnterminatedOpen => {
                return Err(CompileError::UnterminatedTag {
                    offset: span.start,
                    token: source[span.start..].chars().take(24).collect(),
                })
            }
            Token::Tag => scanner.tag(text, span)?,
        }
    }

    scanner.finish()
}

/// A parsed tag, borrowed from the source
#[derive(Debug, PartialEq)]
enum Tag<'a> {
    Comment,
    Else,
    Open(BlockKind, &'a str),
    Close(BlockKind),
    Variable(&'a str),
}

/// An open block awaiting its close tag
#[derive(Debug)]
struct Frame {
    kind: BlockKind,
    path: VarPath,
    opened: Span,
    token: String,
    body: Vec<Instruction>,
    otherwise: Option<Vec<Instruction>>,
}

impl Frame {
    fn target(&mut self) -> &mut Vec<Instruction> {
        match self.otherwise.as_mut() {
            Some(otherwise) => otherwise,
            None => &mut self.body,
        }
    }

    fn into_instruction(self) -> Instruction {
        match self.kind {
            BlockKind::If => Instruction::Section {
                predicate: self.path,
                body: self.body,
                otherwise: self.otherwise.unwrap_or_default(),
                span: self.opened,
            },
            BlockKind::Each => Instruction::Loop {
                iterable: self.path,
                body: self.body,
                span: self.opened,
            },
        }
    }
}

#[derive(Debug, Default)]
struct Scanner {
    root: Vec<Instruction>,
    stack: Vec<Frame>,
}

impl Scanner {
    fn new() -> Self {
        Self::default()
    }

    fn target(&mut self) -> &mut Vec<Instruction> {
        match self.stack.last_mut() {
            Some(frame) => frame.target(),
            None => &mut self.root,
        }
    }

    fn push_literal(&mut self, text: &str) {
        let target = self.target();
        match target.last_mut() {
            Some(Instruction::Literal(existing)) => existing.push_str(text),
            _ => target.push(Instruction::Literal(text.to_string())),
        }
    }

    fn tag(&mut self, raw: &str, span: Span) -> Result<(), CompileError> {
        match classify(raw, span.start)? {
            Tag::Comment => {}
            Tag::Variable(name) => {
                let path = parse_path(name).ok_or_else(|| CompileError::InvalidVariable {
                    offset: span.start,
                    token: raw.to_string(),
                })?;
                self.target().push(Instruction::Substitute { path, span });
            }
            Tag::Open(kind, name) => {
                let path = parse_path(name).ok_or_else(|| CompileError::InvalidVariable {
                    offset: span.start,
                    token: raw.to_string(),
                })?;
                if self.stack.len() >= MAX_NESTING_DEPTH {
                    return Err(CompileError::NestingTooDeep {
                        offset: span.start,
                        token: raw.to_string(),
                        max: MAX_NESTING_DEPTH,
                    });
                }
                self.stack.push(Frame {
                    kind,
                    path,
                    opened: span,
                    token: raw.to_string(),
                    body: Vec::new(),
                    otherwise: None,
                });
            }
            Tag::Else => match self.stack.last_mut() {
                Some(frame) if frame.kind == BlockKind::If && frame.otherwise.is_none() => {
                    frame.otherwise = Some(Vec::new());
                }
                _ => {
                    return Err(CompileError::MisplacedElse {
                        offset: span.start,
                        token: raw.to_string(),
                    })
                }
            },
            Tag::Close(kind) => {
                let frame = self.stack.pop().ok_or_else(|| CompileError::UnmatchedClose {
                    offset: span.start,
                    token: raw.to_string(),
                })?;
                if frame.kind != kind {
                    return Err(CompileError::MismatchedClose {
                        offset: span.start,
                        token: raw.to_string(),
                        expected: frame.kind,
                        opened_at: frame.opened.start,
                    });
                }
                let instruction = frame.into_instruction();
                self.target().push(instruction);
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<CompiledTemplate, CompileError> {
        // Report the innermost unclosed block.
        if let Some(frame) = self.stack.pop() {
            return Err(CompileError::UnclosedBlock {
                offset: frame.opened.start,
                token: frame.token,
            });
        }
        Ok(CompiledTemplate::new(self.root))
    }
}

/// Classify a complete `{{ ... }}` tag
fn classify(raw: &str, offset: usize) -> Result<Tag<'_>, CompileError> {
    let inner = raw[2..raw.len() - 2].trim();

    if inner.is_empty() {
        return Err(CompileError::EmptyTag {
            offset,
            token: raw.to_string(),
        });
    }
    if inner.starts_with('!') {
        return Ok(Tag::Comment);
    }
    if inner == "else" {
        return Ok(Tag::Else);
    }

    if let Some(rest) = inner.strip_prefix('#') {
        let (keyword, argument) = match rest.split_once(char::is_whitespace) {
            Some((keyword, argument)) => (keyword, argument.trim()),
            None => (rest, ""),
        };
        let kind = BlockKind::from_keyword(keyword).ok_or_else(|| CompileError::UnknownBlock {
            offset,
            token: raw.to_string(),
        })?;
        return Ok(Tag::Open(kind, argument));
    }

    if let Some(rest) = inner.strip_prefix('/') {
        let kind = BlockKind::from_keyword(rest.trim()).ok_or_else(|| {
            CompileError::UnknownBlock {
                offset,
                token: raw.to_string(),
            }
        })?;
        return Ok(Tag::Close(kind));
    }

    Ok(Tag::Variable(inner))
}

/// Parse and validate a variable path: `.` or `ident(.ident)*`
fn parse_path(text: &str) -> Option<VarPath> {
    if text == "." {
        return Some(VarPath::Current);
    }
    let segments: Vec<String> = text.split('.').map(str::to_string).collect();
    if segments.iter().all(|s| is_identifier(s)) {
        Some(VarPath::Named(segments))
    } else {
        None
    }
}

/// Identifiers start with an ASCII letter, followed by letters, digits or underscores
fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn named(s: &str) -> VarPath {
        VarPath::Named(s.split('.').map(str::to_string).collect())
    }

    #[test]
    fn test_literal_only() {
        let compiled = compile("plain text { not a tag }").unwrap();
        assert_eq!(
            compiled.instructions(),
            &[Instruction::Literal("plain text { not a tag }".into())]
        );
    }

    #[test]
    fn test_substitution_positions() {
        let compiled = compile("Hello {{name}}!").unwrap();
        assert_eq!(
            compiled.instructions(),
            &[
                Instruction::Literal("Hello ".into()),
                Instruction::Substitute {
                    path: named("name"),
                    span: 6..14,
                },
                Instruction::Literal("!".into()),
            ]
        );
    }

    #[test]
    fn test_dotted_path_and_whitespace() {
        let compiled = compile("{{  user.name  }}").unwrap();
        assert_eq!(compiled.variables(), &[named("user.name")]);
    }

    #[test]
    fn test_each_with_current_item() {
        let compiled = compile("{{#each items}}- {{.}}\n{{/each}}").unwrap();
        assert_eq!(
            compiled.instructions(),
            &[Instruction::Loop {
                iterable: named("items"),
                body: vec![
                    Instruction::Literal("- ".into()),
                    Instruction::Substitute {
                        path: VarPath::Current,
                        span: 17..22,
                    },
                    Instruction::Literal("\n".into()),
                ],
                span: 0..15,
            }]
        );
    }

    #[test]
    fn test_if_else() {
        let compiled = compile("{{#if ok}}yes{{else}}no{{/if}}").unwrap();
        match &compiled.instructions()[0] {
            Instruction::Section {
                predicate,
                body,
                otherwise,
                ..
            } => {
                assert_eq!(predicate, &named("ok"));
                assert_eq!(body, &vec![Instruction::Literal("yes".into())]);
                assert_eq!(otherwise, &vec![Instruction::Literal("no".into())]);
            }
            other => panic!("expected section, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_blocks() {
        let compiled =
            compile("{{#each groups}}{{#if visible}}{{name}}{{/if}}{{/each}}").unwrap();
        assert_eq!(compiled.instruction_count(), 3);
        assert_eq!(
            compiled.variables(),
            &[named("groups"), named("visible"), named("name")]
        );
    }

    #[test]
    fn test_comments_are_dropped_and_literals_merge() {
        let compiled = compile("a{{! note }}b").unwrap();
        assert_eq!(compiled.instructions(), &[Instruction::Literal("ab".into())]);
    }

    #[test]
    fn test_mismatched_close_points_at_close_tag() {
        let err = compile("{{#if a}}{{/each}}").unwrap_err();
        assert_eq!(err.offset(), 9);
        assert_eq!(err.token(), Some("{{/each}}"));
        assert!(matches!(err, CompileError::MismatchedClose { .. }));
    }

    #[test]
    fn test_unmatched_close() {
        let err = compile("text {{/if}}").unwrap_err();
        assert!(matches!(err, CompileError::UnmatchedClose { offset: 5, .. }));
    }

    #[test]
    fn test_unclosed_block_points_at_opener() {
        let err = compile("a {{#each xs}} b").unwrap_err();
        assert_eq!(
            err,
            CompileError::UnclosedBlock {
                offset: 2,
                token: "{{#each xs}}".into()
            }
        );
    }

    #[test]
    fn test_unterminated_tag() {
        let err = compile("Hello {{name").unwrap_err();
        assert!(matches!(err, CompileError::UnterminatedTag { offset: 6, .. }));
    }

    #[test]
    fn test_invalid_variable_names_rejected() {
        for source in [
            "{{1abc}}",
            "{{_x}}",
            "{{a-b}}",
            "{{a..b}}",
            "{{a.}}",
            "{{name; drop}}",
            "{{#if}}{{/if}}",
            "{{#each a b}}{{/each}}",
        ] {
            let err = compile(source).unwrap_err();
            assert!(
                matches!(err, CompileError::InvalidVariable { .. }),
                "{source}: {err:?}"
            );
        }
    }

    #[test]
    fn test_unknown_block_and_empty_tag() {
        assert!(matches!(
            compile("{{#with a}}{{/with}}").unwrap_err(),
            CompileError::UnknownBlock { offset: 0, .. }
        ));
        assert!(matches!(
            compile("x{{ }}").unwrap_err(),
            CompileError::EmptyTag { offset: 1, .. }
        ));
    }

    #[test]
    fn test_misplaced_else() {
        assert!(matches!(
            compile("{{else}}").unwrap_err(),
            CompileError::MisplacedElse { .. }
        ));
        assert!(matches!(
            compile("{{#each a}}{{else}}{{/each}}").unwrap_err(),
            CompileError::MisplacedElse { .. }
        ));
        assert!(matches!(
            compile("{{#if a}}{{else}}{{else}}{{/if}}").unwrap_err(),
            CompileError::MisplacedElse { offset: 17, .. }
        ));
    }

    fn nested(depth: usize) -> String {
        format!("{}x{}", "{{#if a}}".repeat(depth), "{{/if}}".repeat(depth))
    }

    #[test]
    fn test_nesting_limit_is_inclusive() {
        let compiled = compile(&nested(MAX_NESTING_DEPTH)).unwrap();
        assert_eq!(compiled.instruction_count(), MAX_NESTING_DEPTH + 1);
    }

    #[test]
    fn test_nesting_past_limit_points_at_opener() {
        let opener = "{{#if a}}";
        let err = compile(&nested(MAX_NESTING_DEPTH + 1)).unwrap_err();
        assert_eq!(
            err,
            CompileError::NestingTooDeep {
                offset: MAX_NESTING_DEPTH * opener.len(),
                token: opener.into(),
                max: MAX_NESTING_DEPTH,
            }
        );
    }

    #[test]
    fn test_very_deep_nesting_fails_without_recursing() {
        let source = "{{#each xs}}".repeat(100_000);
        let err = compile(&source).unwrap_err();
        assert!(matches!(err, CompileError::NestingTooDeep { .. }));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let source = "{{#each rows}}{{#if a.b}}{{c}}{{else}}-{{/if}}{{/each}}";
        assert_eq!(compile(source).unwrap(), compile(source).unwrap());
    }

    #[test]
    fn test_expired_deadline() {
        let source = "{{a}} ".repeat(200);
        let err = compile_with_deadline(&source, Some(Instant::now())).unwrap_err();
        assert!(matches!(err, CompileError::DeadlineExceeded { .. }));
    }
}
