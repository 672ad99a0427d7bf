//! Markup tokenizer
//!
//! Character level scanner with two lexical modes switched by `<` and `>`:
//! markup (text runs) and in-tag (identifiers, attribute values, single
//! characters). In verbatim mode every character is returned as its own
//! token until the caller leaves verbatim mode again.

use std::mem;

use thiserror::Error;

use super::tokens::{is_directive, Token, TokenKind};
use crate::chars::{self, BACKSLASH, COLON, GT, LF, LT, MINUS, PERCENT, SLASH};
use crate::checksum::SourceChecksum;
use crate::parse_util::SourcePosition;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizerError {
    #[error("put_back called twice!")]
    DoublePutBack,
}

pub struct AspTokenizer {
    source: String,
    cursor: SourcePosition,
    /// Cursor before the last `read_char`, restored by `unget`.
    before_read: SourcePosition,
    in_tag: bool,
    expect_attr_value: bool,
    alternating_quotes: bool,
    verbatim: bool,
    current: Token,
    has_put_back: bool,
    /// End of the last token handed out, and of the one before it so a
    /// put back can rewind it.
    consumed_end: SourcePosition,
    prev_consumed_end: SourcePosition,
    value: String,
    odds: String,
    checksum: SourceChecksum,
}

impl AspTokenizer {
    pub fn new(source: impl Into<String>) -> Self {
        let start = SourcePosition::start();
        AspTokenizer {
            source: source.into(),
            cursor: start,
            before_read: start,
            in_tag: false,
            expect_attr_value: true,
            alternating_quotes: true,
            verbatim: false,
            current: Token::eof(start),
            has_put_back: false,
            consumed_end: start,
            prev_consumed_end: start,
            value: String::new(),
            odds: String::new(),
            checksum: SourceChecksum::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn slice(&self, from: usize, to: usize) -> &str {
        self.source.get(from..to).unwrap_or("")
    }

    /// The last token handed out by [`AspTokenizer::get_token`].
    pub fn current(&self) -> &Token {
        &self.current
    }

    /// End of everything consumed so far; a pending put back is excluded.
    pub fn consumed_end(&self) -> SourcePosition {
        self.consumed_end
    }

    pub fn in_tag(&self) -> bool {
        self.in_tag
    }

    pub fn set_in_tag(&mut self, in_tag: bool) {
        self.in_tag = in_tag;
    }

    pub fn verbatim(&self) -> bool {
        self.verbatim
    }

    pub fn set_verbatim(&mut self, verbatim: bool) {
        self.verbatim = verbatim;
    }

    pub fn expect_attr_value(&self) -> bool {
        self.expect_attr_value
    }

    pub fn set_expect_attr_value(&mut self, expect: bool) {
        self.expect_attr_value = expect;
    }

    /// False if the last attribute value repeated its own quote character
    /// inside an embedded `<% %>` block.
    pub fn alternating_quotes(&self) -> bool {
        self.alternating_quotes
    }

    pub fn get_token(&mut self) -> Token {
        if self.has_put_back {
            self.has_put_back = false;
            self.prev_consumed_end = self.consumed_end;
            self.consumed_end = self.current.end;
            return self.current.clone();
        }

        let start = self.cursor;
        let kind = self.next_token();
        self.checksum
            .advance(self.source.as_bytes(), self.cursor.offset);
        self.current = Token {
            kind,
            value: mem::take(&mut self.value),
            odds: mem::take(&mut self.odds),
            start,
            end: self.cursor,
        };
        self.prev_consumed_end = self.consumed_end;
        self.consumed_end = self.cursor;
        self.current.clone()
    }

    /// Push the current token back so the next `get_token` returns it again.
    /// Only one token of push back is supported.
    pub fn put_back(&mut self) -> Result<(), TokenizerError> {
        if self.has_put_back {
            return Err(TokenizerError::DoublePutBack);
        }
        self.has_put_back = true;
        self.consumed_end = self.prev_consumed_end;
        Ok(())
    }

    /// Digest of the whole source. Only meaningful once parsing is done.
    pub fn finish_checksum(&mut self) -> String {
        self.checksum.finish(self.source.as_bytes())
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.cursor.offset..].chars().next()
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.before_read = self.cursor;
        self.cursor.offset += ch.len_utf8();
        // CRLF counts as one line break, the CR being zero width.
        match ch {
            LF => {
                self.cursor.line += 1;
                self.cursor.column = 1;
            }
            chars::CR if self.peek_char() == Some(LF) => {}
            chars::CR => {
                self.cursor.line += 1;
                self.cursor.column = 1;
            }
            _ => self.cursor.column += 1,
        }
        Some(ch)
    }

    fn unget(&mut self) {
        self.cursor = self.before_read;
    }

    fn next_token(&mut self) -> TokenKind {
        let previous = self.current.kind;
        while let Some(ch) = self.read_char() {
            if self.verbatim {
                self.in_tag = false;
                self.value.push(ch);
                return TokenKind::Char(ch);
            }

            if self.in_tag && self.expect_attr_value && chars::is_quote(ch) {
                return self.read_att_value(ch);
            }

            if ch == LT {
                self.in_tag = true;
                self.value.push(ch);
                return TokenKind::Char(ch);
            }

            if ch == GT {
                self.in_tag = false;
                self.value.push(ch);
                return TokenKind::Char(ch);
            }

            if previous == TokenKind::Char(LT) && chars::TAG_OPENERS.contains(&ch) {
                self.value.push(ch);
                return TokenKind::Char(ch);
            }

            if self.in_tag
                && previous == TokenKind::Char(PERCENT)
                && chars::SERVER_TAG_MARKERS.contains(&ch)
                && self.odds.trim().is_empty()
            {
                self.value.push(ch);
                return TokenKind::Char(ch);
            }

            if self.in_tag && ch == MINUS && self.peek_char() == Some(MINUS) {
                self.read_char();
                self.value.push_str("--");
                return TokenKind::DoubleDash;
            }

            if !self.in_tag {
                self.value.push(ch);
                while let Some(next) = self.peek_char() {
                    if next == LT {
                        break;
                    }
                    self.read_char();
                    self.value.push(next);
                }
                return TokenKind::Text;
            }

            if previous == TokenKind::Char(chars::EQ) && !chars::is_whitespace(ch) {
                return self.read_att_value(ch);
            }

            if chars::is_identifier_start(ch) {
                self.value.push(ch);
                while let Some(next) = self.peek_char() {
                    if !chars::is_identifier_part(next) && next != COLON {
                        break;
                    }
                    self.read_char();
                    self.value.push(next);
                }
                if previous == TokenKind::Char(chars::AT) && is_directive(&self.value) {
                    return TokenKind::Directive;
                }
                return TokenKind::Identifier;
            }

            if !chars::is_whitespace(ch) {
                self.value.push(ch);
                return TokenKind::Char(ch);
            }

            self.odds.push(ch);
        }
        TokenKind::Eof
    }

    /// Scan an attribute value. Quoted values run to the matching quote, a
    /// backslash escapes it, and `<% ... %>` blocks inside are skipped
    /// over. Unquoted values stop at whitespace, `>` or `/>`.
    fn read_att_value(&mut self, start: char) -> TokenKind {
        let quote = if chars::is_quote(start) {
            Some(start)
        } else {
            self.value.push(start);
            None
        };
        let mut last = if quote.is_some() { '\0' } else { start };
        let mut in_server_tag = false;
        self.alternating_quotes = true;

        while let Some(ch) = self.read_char() {
            if ch == PERCENT && last == LT {
                in_server_tag = true;
            } else if in_server_tag && ch == GT && last == PERCENT {
                in_server_tag = false;
            } else if !in_server_tag {
                match quote {
                    Some(q) if ch == q => {
                        if last != BACKSLASH {
                            return TokenKind::AttValue;
                        }
                        self.value.pop();
                    }
                    None if ch == SLASH && self.peek_char() == Some(GT) => {
                        self.unget();
                        return TokenKind::AttValue;
                    }
                    None if ch == GT || chars::is_whitespace(ch) => {
                        self.unget();
                        return TokenKind::AttValue;
                    }
                    _ => {}
                }
            } else if quote == Some(ch) {
                self.alternating_quotes = false;
            }

            self.value.push(ch);
            last = ch;
        }
        TokenKind::AttValue
    }
}
