//! Tokenizer Tests
//!
//! Token coverage, push back and position tracking of the markup tokenizer.

use aspx_compiler::ml_parser::{AspTokenizer, Token, TokenKind, TokenizerError};
use aspx_compiler::parse_util::SourcePosition;
use proptest::prelude::*;

fn tokenize(source: &str) -> Vec<Token> {
    let mut tokenizer = AspTokenizer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = tokenizer.get_token();
        if token.is_eof() {
            break;
        }
        tokens.push(token);
    }
    tokens
}

fn line_breaks(source: &str) -> usize {
    let bytes = source.as_bytes();
    let mut count = 0;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'\n' => count += 1,
            b'\r' if bytes.get(i + 1) != Some(&b'\n') => count += 1,
            _ => {}
        }
    }
    count
}

mod coverage {
    use super::*;

    #[test]
    fn should_cover_every_byte_of_a_page() {
        let source = "<%@ Page Language=\"C#\" %>\r\n<html>\n  <body>\n    <asp:Label id=l1 runat=\"server\" />\n  </body>\n</html>";
        let tokens = tokenize(source);
        let mut rebuilt = String::new();
        for token in &tokens {
            rebuilt.push_str(&source[token.start.offset..token.end.offset]);
        }
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn should_keep_whitespace_inside_tags_as_odds() {
        let tokens = tokenize("<a   href='x'>");
        let href = tokens
            .iter()
            .find(|t| t.is(TokenKind::Identifier) && t.value == "href")
            .unwrap();
        assert_eq!(href.odds, "   ");
    }

    #[test]
    fn should_strip_quotes_from_attribute_values() {
        let tokens = tokenize("<a b=\"one\" c='two'>");
        let values: Vec<&str> = tokens
            .iter()
            .filter(|t| t.is(TokenKind::AttValue))
            .map(|t| t.value.as_str())
            .collect();
        assert_eq!(values, vec!["one", "two"]);
    }

    #[test]
    fn should_report_double_dash_only_inside_tags() {
        let tokens = tokenize("a--b<!-- x");
        assert_eq!(tokens[0].kind, TokenKind::Text);
        assert_eq!(tokens[0].value, "a--b");
        assert!(tokens.iter().any(|t| t.is(TokenKind::DoubleDash)));
    }
}

mod push_back {
    use super::*;

    #[test]
    fn should_return_the_same_token_after_put_back() {
        let mut tokenizer = AspTokenizer::new("<asp:Button runat=server/>");
        tokenizer.get_token();
        let name = tokenizer.get_token();
        tokenizer.put_back().unwrap();
        assert_eq!(tokenizer.get_token(), name);
        assert_eq!(tokenizer.get_token().value, "runat");
    }

    #[test]
    fn should_reject_a_second_put_back() {
        let mut tokenizer = AspTokenizer::new("abc");
        tokenizer.get_token();
        tokenizer.put_back().unwrap();
        let err = tokenizer.put_back().unwrap_err();
        assert_eq!(err, TokenizerError::DoublePutBack);
        assert_eq!(err.to_string(), "put_back called twice!");
    }

    #[test]
    fn should_rewind_consumed_end_on_put_back() {
        let mut tokenizer = AspTokenizer::new("ab<c>");
        tokenizer.get_token();
        let after_text = tokenizer.consumed_end();
        tokenizer.get_token();
        tokenizer.put_back().unwrap();
        assert_eq!(tokenizer.consumed_end(), after_text);
    }
}

mod positions {
    use super::*;

    #[test]
    fn should_count_crlf_as_a_single_line_break() {
        let tokens = tokenize("x\r\n\r\n<b>");
        let lt = tokens.iter().find(|t| t.is_char('<')).unwrap();
        assert_eq!(lt.start, SourcePosition::new(3, 1, 5));
    }

    #[test]
    fn should_count_lone_carriage_returns() {
        let tokens = tokenize("x\ry\r<b>");
        let lt = tokens.iter().find(|t| t.is_char('<')).unwrap();
        assert_eq!(lt.start.line, 3);
        assert_eq!(lt.start.column, 1);
    }

    #[test]
    fn should_track_columns_in_characters() {
        let tokens = tokenize("héllo<b>");
        let lt = tokens.iter().find(|t| t.is_char('<')).unwrap();
        assert_eq!(lt.start.column, 6);
        assert_eq!(lt.start.offset, 6);
    }
}

proptest! {
    #[test]
    fn tokens_cover_the_source_contiguously(source in "[a-z<>/=\"' %!@#:\\-\r\n\t]{0,64}") {
        let mut tokenizer = AspTokenizer::new(source.as_str());
        let mut at = 0;
        loop {
            let token = tokenizer.get_token();
            prop_assert_eq!(token.start.offset, at);
            at = token.end.offset;
            if token.is_eof() {
                break;
            }
            prop_assert!(token.end.offset > token.start.offset);
        }
        prop_assert_eq!(at, source.len());
    }

    #[test]
    fn final_line_matches_line_breaks(source in "[a-z<> =\"\r\n]{0,64}") {
        let mut tokenizer = AspTokenizer::new(source.as_str());
        while !tokenizer.get_token().is_eof() {}
        prop_assert_eq!(tokenizer.consumed_end().line, 1 + line_breaks(&source));
    }
}
