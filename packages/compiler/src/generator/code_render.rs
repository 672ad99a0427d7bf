//! Code render fragments
//!
//! Reparses a piece of literal text that contains `<% %>` blocks and
//! collects the pieces in order. Markup tags inside the fragment stay
//! literal.

use crate::ml_parser::{AspParser, ParseEventHandler, TagAttributes, TagDisposition, TagType};
use crate::parse_util::{Location, ParseResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Literal(String),
    Code {
        tag_type: TagType,
        code: String,
        location: Location,
    },
}

#[derive(Debug, Default)]
pub struct CodeRenderParser {
    fragments: Vec<Fragment>,
}

impl CodeRenderParser {
    /// Split `text`, found at `location`, into literal and code fragments.
    pub fn parse(location: &Location, text: &str) -> ParseResult<Vec<Fragment>> {
        let mut handler = CodeRenderParser::default();
        let mut parser = AspParser::fragment(location.filename.as_str(), text, location.begin);
        parser.parse(&mut handler)?;
        Ok(handler.fragments)
    }

    fn literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.fragments.last_mut() {
            Some(Fragment::Literal(last)) => last.push_str(text),
            _ => self.fragments.push(Fragment::Literal(text.to_string())),
        }
    }
}

impl ParseEventHandler for CodeRenderParser {
    fn tag_parsed(
        &mut self,
        location: &Location,
        tag_type: TagType,
        id: &str,
        _attributes: Option<&TagAttributes>,
    ) -> ParseResult<TagDisposition> {
        match tag_type {
            TagType::CodeRender
            | TagType::CodeRenderExpression
            | TagType::CodeRenderEncode
            | TagType::DataBinding => self.fragments.push(Fragment::Code {
                tag_type,
                code: id.to_string(),
                location: location.clone(),
            }),
            _ => self.literal(&location.plain_text),
        }
        Ok(TagDisposition::Continue)
    }

    fn text_parsed(&mut self, _location: &Location, text: &str) -> ParseResult<()> {
        self.literal(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_util::SourcePosition;

    #[test]
    fn test_attribute_expression() {
        let location = Location::new(
            "/a.aspx",
            SourcePosition::new(3, 5, 30),
            SourcePosition::new(3, 30, 55),
            "",
        );
        let fragments =
            CodeRenderParser::parse(&location, r#"<a href="<%= Url %>">"#).unwrap();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0], Fragment::Literal("<a href=\"".to_string()));
        match &fragments[1] {
            Fragment::Code { tag_type, code, location } => {
                assert_eq!(*tag_type, TagType::CodeRenderExpression);
                assert_eq!(code, " Url ");
                assert_eq!(location.begin.line, 3);
                assert_eq!(location.begin.column, 14);
            }
            other => panic!("unexpected fragment {:?}", other),
        }
        assert_eq!(fragments[2], Fragment::Literal("\">".to_string()));
    }
}
