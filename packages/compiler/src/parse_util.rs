//! Parse Utilities
//!
//! Source locations captured by the markup parser and the error type every
//! front-end stage reports through.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A position inside a source text. Lines and columns are 1-based, the
/// offset is a byte offset into the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        SourcePosition {
            line,
            column,
            offset,
        }
    }

    pub fn start() -> Self {
        SourcePosition::new(1, 1, 0)
    }

    /// Position reached after walking over `text` from here.
    pub fn advance(&self, text: &str) -> SourcePosition {
        let mut pos = *self;
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            pos.offset += ch.len_utf8();
            match ch {
                '\n' => {
                    pos.line += 1;
                    pos.column = 1;
                }
                '\r' if chars.peek() == Some(&'\n') => {}
                '\r' => {
                    pos.line += 1;
                    pos.column = 1;
                }
                _ => pos.column += 1,
            }
        }
        pos
    }

    /// Translate a position that is relative to a fragment into the
    /// coordinates of the text the fragment was cut from.
    pub fn relative_to(&self, origin: &SourcePosition) -> SourcePosition {
        if self.line <= 1 {
            SourcePosition::new(
                origin.line,
                origin.column + self.column - 1,
                origin.offset + self.offset,
            )
        } else {
            SourcePosition::new(
                origin.line + self.line - 1,
                self.column,
                origin.offset + self.offset,
            )
        }
    }
}

/// Immutable snapshot of the span of one syntactic element.
///
/// Locations are copied out of the parser when an event fires and never
/// track the parser afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub filename: String,
    pub begin: SourcePosition,
    pub end: SourcePosition,
    pub plain_text: String,
}

impl Location {
    pub fn new(
        filename: impl Into<String>,
        begin: SourcePosition,
        end: SourcePosition,
        plain_text: impl Into<String>,
    ) -> Self {
        Location {
            filename: filename.into(),
            begin,
            end,
            plain_text: plain_text.into(),
        }
    }

    /// Location pointing at the start of a file, used for errors that are
    /// not tied to an element (missing files, unclosed tags at EOF).
    pub fn file_start(filename: impl Into<String>) -> Self {
        Location::new(
            filename,
            SourcePosition::start(),
            SourcePosition::start(),
            String::new(),
        )
    }

    pub fn begin_line(&self) -> usize {
        self.begin.line
    }

    pub fn begin_column(&self) -> usize {
        self.begin.column
    }

    pub fn end_line(&self) -> usize {
        self.end.line
    }

    pub fn end_column(&self) -> usize {
        self.end.column
    }

    /// Rebase a location produced by a fragment parse onto the location the
    /// fragment was extracted from.
    pub fn rebase(&self, outer: &Location) -> Location {
        Location {
            filename: outer.filename.clone(),
            begin: self.begin.relative_to(&outer.begin),
            end: self.end.relative_to(&outer.begin),
            plain_text: self.plain_text.clone(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.filename, self.begin.line, self.begin.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorKind {
    /// Malformed markup.
    Syntax,
    /// Unknown tag or type, invalid attribute, duplicate ID.
    Resolution,
    /// Include target missing, recursive or outside the application.
    Include,
    /// Unknown, repeated or misplaced directive.
    Directive,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{location}: {message}")]
pub struct ParseError {
    pub location: Location,
    pub message: String,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(location: Location, message: impl Into<String>) -> Self {
        ParseError {
            location,
            message: message.into(),
            kind: ParseErrorKind::Syntax,
        }
    }

    pub fn resolution(location: Location, message: impl Into<String>) -> Self {
        ParseError::new(location, message).with_kind(ParseErrorKind::Resolution)
    }

    pub fn include(location: Location, message: impl Into<String>) -> Self {
        ParseError::new(location, message).with_kind(ParseErrorKind::Include)
    }

    pub fn directive(location: Location, message: impl Into<String>) -> Self {
        ParseError::new(location, message).with_kind(ParseErrorKind::Directive)
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Message followed by the offending source text, if any.
    pub fn contextual_message(&self) -> String {
        let snippet = self.location.plain_text.trim();
        if snippet.is_empty() {
            self.message.clone()
        } else {
            let snippet: String = snippet.chars().take(100).collect();
            format!("{} (\"{}\")", self.message, snippet)
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_position_on_first_line() {
        let origin = SourcePosition::new(3, 10, 40);
        let inner = SourcePosition::new(1, 4, 3);
        assert_eq!(inner.relative_to(&origin), SourcePosition::new(3, 13, 43));
    }

    #[test]
    fn test_relative_position_on_later_line() {
        let origin = SourcePosition::new(3, 10, 40);
        let inner = SourcePosition::new(2, 5, 12);
        assert_eq!(inner.relative_to(&origin), SourcePosition::new(4, 5, 52));
    }

    #[test]
    fn test_advance() {
        let pos = SourcePosition::start().advance("ab\r\ncd");
        assert_eq!(pos, SourcePosition::new(2, 3, 6));
    }

    #[test]
    fn test_display() {
        let loc = Location::new(
            "/a.aspx",
            SourcePosition::new(2, 7, 20),
            SourcePosition::new(2, 9, 22),
            "<x",
        );
        let err = ParseError::new(loc, "boom");
        assert_eq!(err.to_string(), "/a.aspx(2,7): boom");
        assert_eq!(err.contextual_message(), "boom (\"<x\")");
    }
}
