//! ML (Markup Language) Parser Module
//!
//! Tokenizer, tag attributes and the event-driven parser for page markup.

pub mod attributes;
pub mod parser;
pub mod tokenizer;
pub mod tokens;

pub use attributes::TagAttributes;
pub use parser::{remove_comments, AspParser, ParseEventHandler, TagDisposition, TagType};
pub use tokenizer::{AspTokenizer, TokenizerError};
pub use tokens::{is_directive, Token, TokenKind};
