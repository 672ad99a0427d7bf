//! Character constants and classification used by the markup tokenizer.

// Special characters
pub const TAB: char = '\t';
pub const LF: char = '\n';
pub const CR: char = '\r';
pub const SPACE: char = ' ';

// Punctuation
pub const BANG: char = '!';
pub const DQ: char = '"';
pub const HASH: char = '#';
pub const PERCENT: char = '%';
pub const SQ: char = '\'';
pub const MINUS: char = '-';
pub const SLASH: char = '/';
pub const COLON: char = ':';
pub const LT: char = '<';
pub const EQ: char = '=';
pub const GT: char = '>';
pub const AT: char = '@';
pub const BACKSLASH: char = '\\';
pub const UNDERSCORE: char = '_';

/// Characters that may directly follow `<` and are returned as single-char tokens.
pub const TAG_OPENERS: &[char] = &[PERCENT, SLASH, BANG];

/// Characters that may directly follow `<%` and select the server tag flavour.
pub const SERVER_TAG_MARKERS: &[char] = &[AT, HASH, EQ, COLON];

/// Check if character is whitespace
pub fn is_whitespace(ch: char) -> bool {
    ch.is_whitespace()
}

/// Check if character is a quote usable around attribute values
pub fn is_quote(ch: char) -> bool {
    ch == SQ || ch == DQ
}

/// Check if character can start an identifier (tag or attribute name)
pub fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == UNDERSCORE
}

/// Check if character can be part of an identifier.
///
/// Colons are accepted separately by the tokenizer so that `prefix:Tag`
/// names come out as a single identifier.
pub fn is_identifier_part(ch: char) -> bool {
    ch.is_alphanumeric() || ch == UNDERSCORE || ch == MINUS
}

/// Check whether `name` is a valid language independent identifier,
/// the rule applied to control IDs.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_identifier_start(first) => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == UNDERSCORE)
}
