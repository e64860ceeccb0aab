//! Lexer for template source using logos

use logos::Logos;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// A complete `{{ ... }}` tag
    #[regex(r"\{\{[^}]*\}\}")]
    Tag,

    /// A `{{` with no matching `}}`
    #[token("{{")]
    UnterminatedOpen,

    /// A single brace that does not start a tag
    #[token("{")]
    Brace,

    /// A run of literal text
    #[regex(r"[^{]+")]
    Text,
}

/// Lex template source into tokens with spans
///
/// Every byte of the input is covered by exactly one token, so joining the spans
/// in order reproduces the source.
pub fn lex(input: &str) -> impl Iterator<Item = (Token, Span)> + '_ {
    Token::lexer(input)
        .spanned()
        .map(|(tok, span)| (tok.unwrap_or(Token::Text), span))
}
