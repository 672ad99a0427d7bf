//! Text block splitting
//!
//! Literal text reaching the generator can still carry server constructs:
//! `<% %>` inside the attributes of a plain HTML tag, or server tags inside
//! an HTML (conditional) comment. The text is cut into blocks that are
//! dispatched separately.

use once_cell::sync::Lazy;
use regex::Regex;

static HTML_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static RUNAT_SERVER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)runat\s*=\s*["']?server"#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextBlockKind {
    /// Emitted as is.
    Literal,
    /// Contains `<%` and is reparsed for code blocks.
    Code,
    /// Body of an HTML comment holding server constructs, delimiters
    /// excluded. The body is reparsed as markup.
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextBlock<'a> {
    pub kind: TextBlockKind,
    pub text: &'a str,
    /// Byte offset of `text` in the split input.
    pub offset: usize,
}

fn has_server_construct(text: &str) -> bool {
    text.contains("<%") || RUNAT_SERVER.is_match(text)
}

fn push_segment<'a>(blocks: &mut Vec<TextBlock<'a>>, text: &'a str, offset: usize) {
    if text.is_empty() {
        return;
    }
    let kind = if text.contains("<%") {
        TextBlockKind::Code
    } else {
        TextBlockKind::Literal
    };
    blocks.push(TextBlock { kind, text, offset });
}

/// Split `text` into blocks, in order. Concatenating the blocks (with
/// `<!--`/`-->` around comment bodies) gives back `text`.
pub fn split(text: &str) -> Vec<TextBlock<'_>> {
    let mut blocks = Vec::new();
    let mut last = 0;

    for comment in HTML_COMMENT.find_iter(text) {
        let body = &text[comment.start() + 4..comment.end() - 3];
        if !has_server_construct(body) {
            continue;
        }
        push_segment(&mut blocks, &text[last..comment.start()], last);
        blocks.push(TextBlock {
            kind: TextBlockKind::Comment,
            text: body,
            offset: comment.start() + 4,
        });
        last = comment.end();
    }
    push_segment(&mut blocks, &text[last..], last);
    blocks
}
