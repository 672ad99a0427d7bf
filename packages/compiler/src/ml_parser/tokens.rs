//! ML Parser Tokens
//!
//! Lexical tokens produced by [`super::tokenizer::AspTokenizer`].

use crate::parse_util::SourcePosition;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Eof,
    Identifier,
    /// A known directive name directly after `<%@`.
    Directive,
    AttValue,
    Text,
    DoubleDash,
    /// Any other significant single character, and every character
    /// returned in verbatim mode.
    Char(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Token text. Attribute values come without their quotes.
    pub value: String,
    /// Whitespace skipped inside a tag before the token started.
    pub odds: String,
    /// Where scanning for this token began, skipped whitespace included.
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl Token {
    pub fn eof(at: SourcePosition) -> Self {
        Token {
            kind: TokenKind::Eof,
            value: String::new(),
            odds: String::new(),
            start: at,
            end: at,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    pub fn is_char(&self, ch: char) -> bool {
        self.kind == TokenKind::Char(ch)
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

/// Directive names recognized after `<%@`.
pub const DIRECTIVES: &[&str] = &[
    "Page",
    "Control",
    "Master",
    "Application",
    "Import",
    "Register",
    "Assembly",
    "Reference",
    "Implements",
    "OutputCache",
    "MasterType",
    "PreviousPageType",
    "WebHandler",
    "WebService",
];

pub fn is_directive(name: &str) -> bool {
    DIRECTIVES.iter().any(|d| d.eq_ignore_ascii_case(name))
}
