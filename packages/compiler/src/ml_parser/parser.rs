//! Markup parser
//!
//! Drains the tokenizer and reports tags, text and errors to a
//! [`ParseEventHandler`] in source order. Everything that is not a server
//! construct is reported with its exact source bytes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::attributes::TagAttributes;
use super::tokenizer::AspTokenizer;
use super::tokens::{Token, TokenKind};
use crate::parse_util::{Location, ParseError, ParseResult, SourcePosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagType {
    Text,
    Tag,
    Close,
    SelfClosing,
    Directive,
    ServerComment,
    DataBinding,
    CodeRender,
    CodeRenderExpression,
    CodeRenderEncode,
    Include,
}

/// What the parser should do after a tag has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDisposition {
    Continue,
    /// Capture everything up to `</id>` as raw text.
    Verbatim(String),
}

pub trait ParseEventHandler {
    fn tag_parsed(
        &mut self,
        location: &Location,
        tag_type: TagType,
        id: &str,
        attributes: Option<&TagAttributes>,
    ) -> ParseResult<TagDisposition>;

    fn text_parsed(&mut self, location: &Location, text: &str) -> ParseResult<()>;

    /// Turn a parser complaint into the error that aborts the parse.
    fn error(&mut self, location: &Location, message: &str) -> ParseError {
        ParseError::new(location.clone(), message)
    }

    fn parsing_complete(&mut self) -> ParseResult<()> {
        Ok(())
    }
}

pub struct AspParser {
    filename: String,
    tokenizer: AspTokenizer,
    /// Where this text starts inside the enclosing file, for fragment parses.
    origin: Option<SourcePosition>,
    /// Fragment mode: `<name` is plain text rather than a tag.
    inner: bool,
    verbatim_id: Option<String>,
    begin: SourcePosition,
    checksum: Option<String>,
}

impl AspParser {
    pub fn new(filename: impl Into<String>, source: impl Into<String>) -> Self {
        AspParser {
            filename: filename.into(),
            tokenizer: AspTokenizer::new(source),
            origin: None,
            inner: false,
            verbatim_id: None,
            begin: SourcePosition::start(),
            checksum: None,
        }
    }

    /// Parse a piece of markup cut out of a larger file; reported locations
    /// are expressed in the coordinates of that file.
    pub fn nested(filename: impl Into<String>, source: impl Into<String>, origin: SourcePosition) -> Self {
        let mut parser = AspParser::new(filename, source);
        parser.origin = Some(origin);
        parser
    }

    /// Parse text that may only contain code blocks.
    pub fn fragment(filename: impl Into<String>, source: impl Into<String>, origin: SourcePosition) -> Self {
        let mut parser = AspParser::nested(filename, source, origin);
        parser.inner = true;
        parser
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Content digest of the source; available after `parse` completed.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn parse(&mut self, handler: &mut dyn ParseEventHandler) -> ParseResult<()> {
        loop {
            let token = self.tokenizer.get_token();
            if token.is_eof() {
                break;
            }
            self.begin = token.start;

            if self.tokenizer.verbatim() {
                self.parse_verbatim_block(handler, token)?;
                continue;
            }

            if token.is_char('<') {
                let (tag_type, id, attributes) = self.get_tag(handler)?;
                let location = self.location();
                match tag_type {
                    TagType::ServerComment => {}
                    TagType::Text => handler.text_parsed(&location, &id)?,
                    _ => {
                        let disposition =
                            handler.tag_parsed(&location, tag_type, &id, attributes.as_ref())?;
                        if let TagDisposition::Verbatim(verbatim_id) = disposition {
                            self.verbatim_id = Some(verbatim_id);
                            self.tokenizer.set_verbatim(true);
                        }
                    }
                }
                continue;
            }

            if token.value.trim().is_empty() {
                let location = self.location();
                handler.text_parsed(&location, &token.value)?;
                continue;
            }

            loop {
                let next = self.tokenizer.get_token();
                if next.is_char('<') || next.is_eof() {
                    self.put_back(handler)?;
                    break;
                }
            }
            let location = self.location();
            handler.text_parsed(&location, &location.plain_text)?;
        }

        self.checksum = Some(self.tokenizer.finish_checksum());
        handler.parsing_complete()
    }

    fn parse_verbatim_block(
        &mut self,
        handler: &mut dyn ParseEventHandler,
        first: Token,
    ) -> ParseResult<()> {
        let id = self.verbatim_id.take().unwrap_or_default();
        let end = format!("</{}>", id);
        let (text, terminator) = match self.get_verbatim(first, &end) {
            Some(found) => found,
            None => return Err(self.fail(handler, &format!("Unexpected EOF processing {}", id))),
        };
        self.tokenizer.set_verbatim(false);

        let text_location = self.location_between(self.begin, terminator);
        handler.text_parsed(&text_location, &text)?;

        self.begin = terminator;
        let close_location = self.location();
        handler.tag_parsed(&close_location, TagType::Close, &id, None)?;
        Ok(())
    }

    fn location(&self) -> Location {
        self.location_between(self.begin, self.tokenizer.consumed_end())
    }

    fn location_between(&self, begin: SourcePosition, end: SourcePosition) -> Location {
        let text = self.tokenizer.slice(begin.offset, end.offset);
        match &self.origin {
            Some(origin) => Location::new(
                self.filename.as_str(),
                begin.relative_to(origin),
                end.relative_to(origin),
                text,
            ),
            None => Location::new(self.filename.as_str(), begin, end, text),
        }
    }

    fn fail(&self, handler: &mut dyn ParseEventHandler, message: &str) -> ParseError {
        let location = self.location();
        handler.error(&location, message)
    }

    fn put_back(&mut self, handler: &mut dyn ParseEventHandler) -> ParseResult<()> {
        match self.tokenizer.put_back() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(handler, &e.to_string())),
        }
    }

    fn eat(&mut self, handler: &mut dyn ParseEventHandler, kind: TokenKind) -> ParseResult<bool> {
        let token = self.tokenizer.get_token();
        if token.kind != kind {
            self.put_back(handler)?;
            return Ok(false);
        }
        Ok(true)
    }

    fn get_tag(
        &mut self,
        handler: &mut dyn ParseEventHandler,
    ) -> ParseResult<(TagType, String, Option<TagAttributes>)> {
        let token = self.tokenizer.get_token();
        match token.kind {
            TokenKind::Char('%') => self.get_server_tag(handler),
            TokenKind::Char('/') => {
                if !self.eat(handler, TokenKind::Identifier)? {
                    return Err(self.fail(handler, "expecting TAGNAME"));
                }
                let id = self.tokenizer.current().value.clone();
                if !self.eat(handler, TokenKind::Char('>'))? {
                    return Err(self.fail(handler, &format!("expecting '>'. Got '{}'", id)));
                }
                Ok((TagType::Close, id, None))
            }
            TokenKind::Char('!') => {
                let double_dash = self.eat(handler, TokenKind::DoubleDash)?;
                if double_dash {
                    self.put_back(handler)?;
                }
                self.tokenizer.set_verbatim(true);
                let end = if double_dash { "-->" } else { ">" };
                let first = self.tokenizer.get_token();
                let comment = self.get_verbatim(first, end).map(|(text, _)| text);
                self.tokenizer.set_verbatim(false);
                let comment = match comment {
                    Some(comment) => comment,
                    // Text cut out of a comment may end inside `<![endif]`.
                    None if self.origin.is_some() => {
                        return Ok((TagType::Text, self.location().plain_text, None))
                    }
                    None => return Err(self.fail(handler, "Unfinished HTML comment/DTD")),
                };

                if double_dash {
                    match parse_include(&comment) {
                        Ok(Some((path_type, file))) => {
                            let mut attributes = TagAttributes::new();
                            attributes
                                .add(path_type, Some(file))
                                .map_err(|msg| self.fail(handler, &msg))?;
                            return Ok((TagType::Include, String::new(), Some(attributes)));
                        }
                        Ok(None) => {}
                        Err(msg) => return Err(self.fail(handler, msg)),
                    }
                }
                Ok((TagType::Text, format!("<!{}{}", comment, end), None))
            }
            TokenKind::Identifier if self.inner => {
                self.tokenizer.set_in_tag(false);
                Ok((TagType::Text, self.location().plain_text, None))
            }
            TokenKind::Identifier => {
                let id = token.value;
                let mut attributes = self.get_attributes(handler)?;
                if self.eat(handler, TokenKind::Char('/'))?
                    && self.eat(handler, TokenKind::Char('>'))?
                {
                    return Ok((TagType::SelfClosing, id, Some(attributes)));
                }
                if !self.eat(handler, TokenKind::Char('>'))? {
                    if attributes.is_run_at_server() {
                        return Err(self.fail(handler, "The server tag is not well formed."));
                    }
                    self.tokenizer.set_verbatim(true);
                    let first = self.tokenizer.get_token();
                    let rest = self.get_verbatim(first, ">");
                    self.tokenizer.set_verbatim(false);
                    let rest = match rest {
                        Some((rest, _)) => rest,
                        None => {
                            return Err(self.fail(handler, &format!("Unexpected EOF processing {}", id)))
                        }
                    };
                    attributes
                        .add("", Some(format!("{}>", rest)))
                        .map_err(|msg| self.fail(handler, &msg))?;
                }
                Ok((TagType::Tag, id, Some(attributes)))
            }
            _ => {
                // A '<' directly following another one starts the next tag.
                if token.is_char('<') {
                    self.put_back(handler)?;
                }
                self.tokenizer.set_in_tag(false);
                Ok((TagType::Text, self.location().plain_text, None))
            }
        }
    }

    fn get_server_tag(
        &mut self,
        handler: &mut dyn ParseEventHandler,
    ) -> ParseResult<(TagType, String, Option<TagAttributes>)> {
        let old = self.tokenizer.expect_attr_value();
        self.tokenizer.set_expect_attr_value(false);

        if self.eat(handler, TokenKind::Char('@'))? {
            self.tokenizer.set_expect_attr_value(old);
            let mut id = String::new();
            if self.eat(handler, TokenKind::Directive)? {
                id = self.tokenizer.current().value.clone();
            }
            let attributes = self.get_attributes(handler)?;
            if !self.eat(handler, TokenKind::Char('%'))? || !self.eat(handler, TokenKind::Char('>'))? {
                return Err(self.fail(handler, "expecting '%>'"));
            }
            return Ok((TagType::Directive, id, Some(attributes)));
        }

        if self.eat(handler, TokenKind::DoubleDash)? {
            self.tokenizer.set_expect_attr_value(old);
            self.tokenizer.set_verbatim(true);
            let first = self.tokenizer.get_token();
            let comment = self.get_verbatim(first, "--%>");
            self.tokenizer.set_verbatim(false);
            if comment.is_none() {
                return Err(self.fail(handler, "Expecting --%> and got EOF."));
            }
            return Ok((TagType::ServerComment, String::new(), None));
        }

        self.tokenizer.set_expect_attr_value(old);
        let expression = self.eat(handler, TokenKind::Char('='))?;
        let mut data_binding = !expression && self.eat(handler, TokenKind::Char('#'))?;
        let encode = !expression && !data_binding && self.eat(handler, TokenKind::Char(':'))?;
        let odds = self.tokenizer.current().odds.clone();

        self.tokenizer.set_verbatim(true);
        let first = self.tokenizer.get_token();
        let inside = self.get_verbatim(first, "%>");
        self.tokenizer.set_verbatim(false);
        let mut inside = match inside {
            Some((inside, _)) => inside,
            None => return Err(self.fail(handler, "Expecting %> and got EOF.")),
        };

        // `<% #region %>` is code that happens to start with '#'.
        if data_binding && !odds.is_empty() {
            data_binding = false;
            inside.insert(0, '#');
        }

        let tag_type = if data_binding {
            TagType::DataBinding
        } else if expression {
            TagType::CodeRenderExpression
        } else if encode {
            TagType::CodeRenderEncode
        } else {
            TagType::CodeRender
        };
        Ok((tag_type, inside, None))
    }

    fn get_attributes(&mut self, handler: &mut dyn ParseEventHandler) -> ParseResult<TagAttributes> {
        let mut attributes = TagAttributes::new();
        let mut well_formed = true;

        loop {
            let token = self.tokenizer.get_token();
            if token.is_char('<') {
                let next = self.tokenizer.get_token();
                if next.is_char('%') {
                    let code = self.get_attribute_code(handler)?;
                    attributes.add("", Some(code)).map_err(|msg| self.fail(handler, &msg))?;
                    continue;
                }
                self.put_back(handler)?;
                break;
            }

            if !token.is(TokenKind::Identifier) {
                self.put_back(handler)?;
                break;
            }

            let id = token.value;
            if self.eat(handler, TokenKind::Char('='))? {
                if self.eat(handler, TokenKind::AttValue)? {
                    let value = self.tokenizer.current().value.clone();
                    attributes
                        .add(&id, Some(value))
                        .map_err(|msg| self.fail(handler, &msg))?;
                    well_formed &= self.tokenizer.alternating_quotes();
                } else if self.eat(handler, TokenKind::Char('<'))?
                    && self.eat(handler, TokenKind::Char('%'))?
                {
                    let code = self.get_attribute_code(handler)?;
                    attributes
                        .add(&id, Some(code))
                        .map_err(|msg| self.fail(handler, &msg))?;
                } else {
                    return Err(self.fail(handler, "expected ATTVALUE"));
                }
            } else {
                attributes.add(&id, None).map_err(|msg| self.fail(handler, &msg))?;
            }
        }

        if attributes.is_run_at_server() && !well_formed {
            return Err(self.fail(handler, "The server tag is not well formed."));
        }
        Ok(attributes)
    }

    /// Read the rest of a `<% ... %>` block sitting where an attribute is expected.
    fn get_attribute_code(&mut self, handler: &mut dyn ParseEventHandler) -> ParseResult<String> {
        self.tokenizer.set_verbatim(true);
        let first = self.tokenizer.get_token();
        let code = self.get_verbatim(first, "%>");
        self.tokenizer.set_verbatim(false);
        match code {
            Some((code, _)) => Ok(format!("<%{}%>", code)),
            None => Err(self.fail(handler, "Expecting %> and got EOF.")),
        }
    }

    /// Collect raw characters up to the first case-insensitive occurrence of
    /// `end`. Returns the text with server comments removed together with
    /// the position where `end` started, or `None` at EOF.
    fn get_verbatim(&mut self, first: Token, end: &str) -> Option<(String, SourcePosition)> {
        let end: Vec<char> = end.to_ascii_lowercase().chars().collect();
        let mut window: VecDeque<(char, SourcePosition)> = VecDeque::with_capacity(end.len());
        let mut text = String::new();
        let mut token = first;

        loop {
            let ch = match token.kind {
                TokenKind::Eof => return None,
                TokenKind::Char(ch) => ch,
                _ => {
                    // A pushed back token scanned outside verbatim mode.
                    text.push_str(self.tokenizer.slice(token.start.offset, token.end.offset));
                    token = self.tokenizer.get_token();
                    continue;
                }
            };

            let char_start = token.end.offset - ch.len_utf8();
            text.push_str(self.tokenizer.slice(token.start.offset, char_start));
            text.push(ch);

            if window.len() == end.len() {
                window.pop_front();
            }
            window.push_back((ch.to_ascii_lowercase(), token.start));
            if window.len() == end.len() && window.iter().map(|(c, _)| *c).eq(end.iter().copied()) {
                let terminator = window[0].1;
                let terminator_len: usize = end.iter().map(|c| c.len_utf8()).sum();
                text.truncate(text.len() - terminator_len);
                return Some((remove_comments(&text), terminator));
            }

            token = self.tokenizer.get_token();
        }
    }
}

/// Strip every `<%-- ... --%>` from `text`.
pub fn remove_comments(text: &str) -> String {
    let mut text = text.to_string();
    while let Some(start) = text.find("<%--") {
        match text[start + 4..].find("--%>") {
            Some(rel) => {
                let end = start + 4 + rel + 4;
                text.replace_range(start..end, "");
            }
            None => break,
        }
    }
    text
}

/// Recognize `#include file="..."` / `#include virtual="..."` in the body of
/// an HTML comment (`comment` starts right after `<!`).
fn parse_include(comment: &str) -> Result<Option<(&'static str, String)>, &'static str> {
    let body = comment.strip_prefix("--").unwrap_or(comment).trim();
    let rest = match body.get(..8) {
        Some(head) if head.eq_ignore_ascii_case("#include") => &body[8..],
        _ => return Ok(None),
    };
    if !rest.starts_with(char::is_whitespace) {
        return Ok(None);
    }
    let rest = rest.trim_start();

    let (path_type, rest) = if rest.get(..4).map_or(false, |h| h.eq_ignore_ascii_case("file")) {
        ("file", &rest[4..])
    } else if rest.get(..7).map_or(false, |h| h.eq_ignore_ascii_case("virtual")) {
        ("virtual", &rest[7..])
    } else {
        return Ok(None);
    };

    let rest = match rest.trim_start().strip_prefix('=') {
        Some(rest) => rest.trim(),
        None => return Ok(None),
    };
    if rest.len() < 2 || !rest.starts_with('"') || !rest.ends_with('"') {
        return Ok(None);
    }
    let file = rest[1..rest.len() - 1].trim();
    if file.is_empty() {
        return Err("Empty file name.");
    }
    Ok(Some((path_type, file.to_string())))
}
