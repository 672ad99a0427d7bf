//! Markup Parser Tests
//!
//! Event sequence, attribute rules, comments and includes as reported by
//! `AspParser` to a recording handler.

use aspx_compiler::checksum::content_hash;
use aspx_compiler::ml_parser::{AspParser, ParseEventHandler, TagAttributes, TagDisposition, TagType};
use aspx_compiler::parse_util::{Location, ParseError, ParseResult};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Tag(TagType, String, Vec<(String, Option<String>)>),
    Text(String),
}

#[derive(Debug, Default)]
struct Recorder {
    events: Vec<Event>,
    raw: String,
    verbatim_for: Option<&'static str>,
    completed: bool,
}

impl ParseEventHandler for Recorder {
    fn tag_parsed(
        &mut self,
        location: &Location,
        tag_type: TagType,
        id: &str,
        attributes: Option<&TagAttributes>,
    ) -> ParseResult<TagDisposition> {
        self.raw.push_str(&location.plain_text);
        let attributes = attributes
            .map(|a| {
                a.iter()
                    .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
                    .collect()
            })
            .unwrap_or_default();
        self.events.push(Event::Tag(tag_type, id.to_string(), attributes));
        match self.verbatim_for {
            Some(name) if tag_type == TagType::Tag && id.eq_ignore_ascii_case(name) => {
                Ok(TagDisposition::Verbatim(name.to_string()))
            }
            _ => Ok(TagDisposition::Continue),
        }
    }

    fn text_parsed(&mut self, location: &Location, text: &str) -> ParseResult<()> {
        self.raw.push_str(&location.plain_text);
        self.events.push(Event::Text(text.to_string()));
        Ok(())
    }

    fn parsing_complete(&mut self) -> ParseResult<()> {
        self.completed = true;
        Ok(())
    }
}

fn parse(source: &str) -> Result<Recorder, ParseError> {
    let mut recorder = Recorder::default();
    AspParser::new("/test.aspx", source).parse(&mut recorder)?;
    Ok(recorder)
}

fn texts(recorder: &Recorder) -> Vec<String> {
    recorder
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Text(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

fn tag(tag_type: TagType, id: &str, attributes: &[(&str, &str)]) -> Event {
    Event::Tag(
        tag_type,
        id.to_string(),
        attributes
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect(),
    )
}

mod events {
    use super::*;

    #[test]
    fn should_report_tags_and_text_in_order() {
        let recorder =
            parse("<%@ Page Language=\"C#\" %><p>hi <asp:Label id=\"l\" runat=\"server\"/></p>")
                .unwrap();
        assert_eq!(
            recorder.events,
            vec![
                tag(TagType::Directive, "Page", &[("Language", "C#")]),
                tag(TagType::Tag, "p", &[]),
                Event::Text("hi ".to_string()),
                tag(
                    TagType::SelfClosing,
                    "asp:Label",
                    &[("id", "l"), ("runat", "server")]
                ),
                Event::Tag(TagType::Close, "p".to_string(), vec![]),
            ]
        );
        assert!(recorder.completed);
    }

    #[test]
    fn should_classify_code_blocks() {
        let recorder = parse("<% a(); %><%= b %><%: c %><%# d %><% #region %>").unwrap();
        let kinds: Vec<(TagType, String)> = recorder
            .events
            .iter()
            .map(|e| match e {
                Event::Tag(t, id, _) => (*t, id.clone()),
                Event::Text(t) => (TagType::Text, t.clone()),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TagType::CodeRender, " a(); ".to_string()),
                (TagType::CodeRenderExpression, " b ".to_string()),
                (TagType::CodeRenderEncode, " c ".to_string()),
                (TagType::DataBinding, " d ".to_string()),
                (TagType::CodeRender, "#region ".to_string()),
            ]
        );
    }

    #[test]
    fn should_report_a_nameless_directive() {
        let recorder = parse("<%@ Language=\"VB\" %>").unwrap();
        assert_eq!(
            recorder.events,
            vec![tag(TagType::Directive, "", &[("Language", "VB")])]
        );
    }

    #[test]
    fn should_capture_verbatim_content() {
        let mut recorder = Recorder {
            verbatim_for: Some("script"),
            ..Recorder::default()
        };
        AspParser::new("/v.aspx", "<script>if (a < b) { x(); }</SCRIPT>after")
            .parse(&mut recorder)
            .unwrap();
        assert_eq!(
            recorder.events[1],
            Event::Text("if (a < b) { x(); }".to_string())
        );
        assert_eq!(
            recorder.events[2],
            Event::Tag(TagType::Close, "script".to_string(), vec![])
        );
        assert_eq!(recorder.events[3], Event::Text("after".to_string()));
    }

    #[test]
    fn should_fail_on_unterminated_verbatim_content() {
        let mut recorder = Recorder {
            verbatim_for: Some("script"),
            ..Recorder::default()
        };
        let err = AspParser::new("/v.aspx", "<script>var a;")
            .parse(&mut recorder)
            .unwrap_err();
        assert_eq!(err.message, "Unexpected EOF processing script");
    }

    #[test]
    fn should_report_locations_in_lines_and_columns() {
        let mut locations = Vec::new();
        struct Positions<'a>(&'a mut Vec<(usize, usize)>);
        impl ParseEventHandler for Positions<'_> {
            fn tag_parsed(
                &mut self,
                location: &Location,
                _tag_type: TagType,
                _id: &str,
                _attributes: Option<&TagAttributes>,
            ) -> ParseResult<TagDisposition> {
                self.0.push((location.begin.line, location.begin.column));
                Ok(TagDisposition::Continue)
            }
            fn text_parsed(&mut self, _location: &Location, _text: &str) -> ParseResult<()> {
                Ok(())
            }
        }
        AspParser::new("/l.aspx", "<a>\r\n  <b>\n<%= x %>")
            .parse(&mut Positions(&mut locations))
            .unwrap();
        assert_eq!(locations, vec![(1, 1), (2, 3), (3, 1)]);
    }
}

mod attributes {
    use super::*;

    #[test]
    fn should_tolerate_duplicates_on_client_tags() {
        let recorder = parse("<a x=\"1\" X=\"2\">").unwrap();
        match &recorder.events[0] {
            Event::Tag(TagType::Tag, id, attributes) => {
                assert_eq!(id, "a");
                assert_eq!(attributes.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn should_reject_duplicates_on_server_tags() {
        let err = parse("<asp:Label x=\"1\" X=\"2\" runat=\"server\" />").unwrap_err();
        assert_eq!(err.message, "Tag contains duplicated 'X' attributes.");
        assert_eq!(err.location.begin.line, 1);
    }

    #[test]
    fn should_reject_invalid_runat() {
        let err = parse("<asp:Label runat=\"client\" />").unwrap_err();
        assert_eq!(err.message, "runat=client is not valid.");
    }

    #[test]
    fn should_keep_code_in_attribute_values() {
        let recorder = parse("<a href=\"<%= Url %>\" title=<%= T %>>").unwrap();
        assert_eq!(
            recorder.events[0],
            tag(TagType::Tag, "a", &[("href", "<%= Url %>"), ("title", "<%= T %>")])
        );
    }

    #[test]
    fn should_reject_repeated_quotes_in_server_attribute_code() {
        let err = parse("<asp:Label Text=\"<%# Eval(\"x\") %>\" runat=\"server\" />").unwrap_err();
        assert_eq!(err.message, "The server tag is not well formed.");
    }
}

mod comments {
    use super::*;

    #[test]
    fn should_drop_server_comments() {
        let recorder = parse("a<%-- <asp:Label runat=server/> --%>b").unwrap();
        assert_eq!(texts(&recorder), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn should_remove_server_comments_inside_html_comments() {
        let recorder = parse("<!--<%-- x --%>-->").unwrap();
        assert_eq!(texts(&recorder), vec!["<!---->".to_string()]);
    }

    #[test]
    fn should_fail_on_unterminated_server_comment() {
        let err = parse("a<%-- open").unwrap_err();
        assert_eq!(err.message, "Expecting --%> and got EOF.");
    }

    #[test]
    fn should_fail_on_unterminated_html_comment() {
        let err = parse("<!-- open").unwrap_err();
        assert_eq!(err.message, "Unfinished HTML comment/DTD");
    }

    #[test]
    fn should_pass_doctype_through_as_text() {
        let recorder = parse("<!DOCTYPE html><p>").unwrap();
        assert_eq!(recorder.events[0], Event::Text("<!DOCTYPE html>".to_string()));
    }
}

mod includes {
    use super::*;

    #[test]
    fn should_report_include_directives() {
        let recorder = parse("<!-- #include virtual=\"/inc/header.inc\" -->").unwrap();
        assert_eq!(
            recorder.events,
            vec![tag(TagType::Include, "", &[("virtual", "/inc/header.inc")])]
        );
    }

    #[test]
    fn should_reject_empty_include_names() {
        let err = parse("<!-- #include file=\"\" -->").unwrap_err();
        assert_eq!(err.message, "Empty file name.");
    }

    #[test]
    fn should_treat_other_comments_as_text() {
        let recorder = parse("<!-- include me -->").unwrap();
        assert_eq!(texts(&recorder), vec!["<!-- include me -->".to_string()]);
    }
}

mod checksum {
    use super::*;

    #[test]
    fn should_expose_the_content_digest() {
        let source = "<p>hello</p>";
        let mut parser = AspParser::new("/c.aspx", source);
        assert!(parser.checksum().is_none());
        parser.parse(&mut Recorder::default()).unwrap();
        assert_eq!(parser.checksum(), Some(content_hash(source).as_str()));
    }

    #[test]
    fn should_change_with_the_content() {
        let mut a = AspParser::new("/c.aspx", "<p>a</p>");
        let mut b = AspParser::new("/c.aspx", "<p>b</p>");
        a.parse(&mut Recorder::default()).unwrap();
        b.parse(&mut Recorder::default()).unwrap();
        assert_ne!(a.checksum(), b.checksum());
    }
}

fn markup_piece() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z ]{1,8}",
        Just("\n".to_string()),
        Just("\r\n".to_string()),
        Just("<b>".to_string()),
        Just("</b>".to_string()),
        Just("<br/>".to_string()),
        Just("<a href=\"x\" class='y'>".to_string()),
        Just("<!-- note -->".to_string()),
        Just(" < 2 ".to_string()),
    ]
}

proptest! {
    #[test]
    fn plain_markup_round_trips(pieces in prop::collection::vec(markup_piece(), 0..24)) {
        let source: String = pieces.concat();
        let recorder = parse(&source).unwrap();
        prop_assert_eq!(recorder.raw, source);
    }
}
