//! Control Tree Generator Tests
//!
//! Builds control trees from page markup and checks their shape and the
//! errors reported for invalid pages.

use std::sync::Arc;

use aspx_compiler::builder::{BuilderChild, BuilderKind, CodeRenderMode};
use aspx_compiler::foundry::ComponentDescriptor;
use aspx_compiler::template_parser::CodeConstructKind;
use aspx_compiler::{
    AspGenerator, ComponentRegistry, MemoryPathProvider, PageParserFilter, ParseErrorKind,
    ParseResult, ParsedUnit, TemplateParser, UnitKind, VirtualPath,
};

fn parse_as(path: &str, kind: UnitKind, source: &str) -> ParseResult<ParsedUnit> {
    let provider = MemoryPathProvider::new();
    let unit = TemplateParser::new(
        VirtualPath::new(path),
        kind,
        Arc::new(ComponentRegistry::with_builtins()),
    );
    AspGenerator::new(&provider, unit).parse_text(source)
}

fn parse_page(source: &str) -> ParseResult<ParsedUnit> {
    parse_as("/default.aspx", UnitKind::Page, source)
}

fn parse_filtered(filter: Arc<dyn PageParserFilter>, source: &str) -> ParseResult<ParsedUnit> {
    let provider = MemoryPathProvider::new();
    let unit = TemplateParser::new(
        VirtualPath::new("/filtered.aspx"),
        UnitKind::Page,
        Arc::new(ComponentRegistry::with_builtins()),
    )
    .with_filter(filter);
    AspGenerator::new(&provider, unit).parse_text(source)
}

fn control_ids(parsed: &ParsedUnit) -> Vec<String> {
    parsed
        .tree
        .controls_with_ids()
        .into_iter()
        .filter_map(|id| parsed.tree.node(id).control_id.clone())
        .collect()
}

mod tree_shape {
    use super::*;

    #[test]
    fn should_nest_server_controls() {
        let parsed = parse_page(concat!(
            "<%@ Page Language=\"C#\" %>\n",
            "<html><body><form id=\"form1\" runat=\"server\">",
            "<asp:Label ID=\"lbl\" runat=\"server\" Text=\"Hi\" />",
            "<asp:Panel ID=\"pnl\" runat=\"server\">text</asp:Panel>",
            "</form></body></html>"
        ))
        .unwrap();
        let tree = &parsed.tree;
        let root = tree.root();

        assert_eq!(parsed.unit.language(), Some("C#"));
        assert_eq!(control_ids(&parsed), vec!["form1", "lbl", "pnl"]);

        let children = tree.children(root);
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], BuilderChild::Literal("\n<html><body>".to_string()));
        assert_eq!(children[2], BuilderChild::Literal("</body></html>".to_string()));

        let form = tree.child_builders(root).next().unwrap();
        assert_eq!(tree.node(form).type_name(), "System.Web.UI.HtmlControls.HtmlForm");
        let inner: Vec<_> = tree.child_builders(form).collect();
        assert_eq!(inner.len(), 2);
        assert_eq!(tree.node(inner[0]).type_name(), "System.Web.UI.WebControls.Label");
        assert_eq!(tree.literal_text(inner[1]), "text");
    }

    #[test]
    fn should_record_control_locations() {
        let parsed = parse_page("<p>\n  <asp:Button ID=\"b\" runat=\"server\" />\n</p>").unwrap();
        let button = parsed.tree.controls_with_ids()[0];
        let location = parsed.tree.node(button).location.clone().unwrap();
        assert_eq!(location.filename, "/default.aspx");
        assert_eq!((location.begin.line, location.begin.column), (2, 3));
    }

    #[test]
    fn should_keep_plain_markup_as_one_literal() {
        let source = concat!(
            "<html>\n<head><title>x</title></head>\n",
            "<body class=\"a\"><p>Hello &amp; bye</p><!-- note --></body></html>"
        );
        let parsed = parse_page(source).unwrap();
        assert_eq!(parsed.tree.len(), 1);
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), source);
    }

    #[test]
    fn should_collect_inner_text() {
        let parsed =
            parse_page("<asp:Literal ID=\"lit\" runat=\"server\">Some <b>bold</b> text</asp:Literal>")
                .unwrap();
        let literal = parsed.tree.controls_with_ids()[0];
        assert_eq!(
            parsed.tree.node(literal).inner_text.as_deref(),
            Some("Some <b>bold</b> text")
        );
    }

    #[test]
    fn should_build_template_properties() {
        let parsed = parse_page(concat!(
            "<asp:Repeater ID=\"rep\" runat=\"server\">\n",
            "  <ItemTemplate><asp:Label ID=\"item\" runat=\"server\" /></ItemTemplate>\n",
            "</asp:Repeater>"
        ))
        .unwrap();
        let tree = &parsed.tree;
        let repeater = tree.controls_with_ids()[0];
        let template = tree.child_builders(repeater).next().unwrap();
        match &tree.node(template).kind {
            BuilderKind::Property { name, .. } => assert_eq!(name, "ItemTemplate"),
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(tree.child_builders(template).count(), 1);
    }

    #[test]
    fn should_resolve_default_collection_items() {
        let parsed = parse_page(concat!(
            "<asp:DropDownList ID=\"ddl\" runat=\"server\">",
            "<asp:ListItem>One</asp:ListItem><asp:ListItem>Two</asp:ListItem>",
            "</asp:DropDownList>"
        ))
        .unwrap();
        let tree = &parsed.tree;
        let list = tree.controls_with_ids()[0];
        let items: Vec<_> = tree.child_builders(list).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(tree.node(items[1]).inner_text.as_deref(), Some("Two"));
    }

    #[test]
    fn should_reject_literal_content_in_property_controls() {
        let err = parse_page("<asp:Repeater runat=\"server\">oops</asp:Repeater>").unwrap_err();
        assert_eq!(
            err.message,
            "Literal content ('oops') is not allowed within a 'System.Web.UI.WebControls.Repeater'."
        );
    }

    #[test]
    fn should_reject_unknown_properties() {
        let err = parse_page("<asp:Repeater runat=\"server\"><Nope></Nope></asp:Repeater>")
            .unwrap_err();
        assert_eq!(
            err.message,
            "Type 'System.Web.UI.WebControls.Repeater' does not have a public property named 'Nope'."
        );
        assert_eq!(err.kind, ParseErrorKind::Resolution);
    }

    #[test]
    fn should_report_unclosed_controls() {
        let err = parse_page("<asp:Panel runat=\"server\">body").unwrap_err();
        assert_eq!(err.message, "Expecting </asp:Panel>");
    }

    #[test]
    fn should_reject_a_second_form() {
        let err = parse_page("<form runat=\"server\"></form><form runat=\"server\"></form>")
            .unwrap_err();
        assert_eq!(err.message, "Only one <form> allowed.");
    }

    #[test]
    fn should_elide_table_sections_inside_server_tables() {
        let parsed = parse_page(concat!(
            "<table id=\"t\" runat=\"server\"><thead>",
            "<tr runat=\"server\"><td runat=\"server\">a</td></tr>",
            "</thead></table>"
        ))
        .unwrap();
        let tree = &parsed.tree;
        let table = tree.controls_with_ids()[0];
        assert_eq!(tree.literal_text(table), "");
        let rows: Vec<_> = tree.child_builders(table).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(tree.node(rows[0]).type_name(), "System.Web.UI.HtmlControls.HtmlTableRow");
    }

    #[test]
    fn should_parse_server_tags_inside_html_comments() {
        let parsed = parse_page("<!-- <asp:Label ID=\"c\" runat=\"server\"/> -->").unwrap();
        assert_eq!(control_ids(&parsed), vec!["c"]);
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), "<!--  -->");
    }

    #[test]
    fn should_locate_controls_after_server_comments_in_html_comments() {
        let source = "<!--<%-- a\nbbbb --%><asp:Label runat=\"server\" ID=\"x\" />-->";
        let parsed = parse_page(source).unwrap();
        let label = parsed.tree.controls_with_ids()[0];
        let location = parsed.tree.node(label).location.clone().unwrap();
        assert_eq!(location.begin.offset, 20);
        assert_eq!((location.begin.line, location.begin.column), (2, 10));
        assert!(source[location.begin.offset..].starts_with("<asp:Label"));
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), "<!---->");
    }
}

mod id_checks {
    use super::*;

    #[test]
    fn should_reject_duplicate_ids_in_one_container() {
        let err = parse_page(
            "<asp:Label ID=\"a\" runat=\"server\"/><asp:Label id=\"A\" runat=\"server\"/>",
        )
        .unwrap_err();
        assert_eq!(err.message, "Id 'A' is already used by another control.");
        assert_eq!(err.kind, ParseErrorKind::Resolution);
    }

    #[test]
    fn should_allow_equal_ids_in_different_naming_containers() {
        let parsed = parse_page(concat!(
            "<asp:Label ID=\"a\" runat=\"server\"/>",
            "<asp:Repeater ID=\"r\" runat=\"server\"><ItemTemplate>",
            "<asp:Label ID=\"a\" runat=\"server\"/>",
            "</ItemTemplate></asp:Repeater>"
        ))
        .unwrap();
        assert_eq!(control_ids(&parsed), vec!["a", "r", "a"]);
    }

    #[test]
    fn should_reject_invalid_identifiers() {
        let err = parse_page("<asp:Label ID=\"1a\" runat=\"server\"/>").unwrap_err();
        assert_eq!(err.message, "'1a' is not a valid identifier");
    }

    #[test]
    fn should_reject_unknown_server_tags() {
        let err = parse_page("<asp:Nope runat=\"server\" />").unwrap_err();
        assert_eq!(err.message, "Unknown server tag 'asp:Nope'.");
        assert_eq!(err.kind, ParseErrorKind::Resolution);
    }
}

mod code_blocks {
    use super::*;

    #[test]
    fn should_add_code_render_nodes() {
        let parsed = parse_page("<p><% if (x) { %>yes<% } %> <%= Name %> <%: Html %></p>").unwrap();
        let modes: Vec<CodeRenderMode> = parsed
            .tree
            .descendants(parsed.tree.root())
            .into_iter()
            .filter_map(|id| match &parsed.tree.node(id).kind {
                BuilderKind::CodeRender { mode, .. } => Some(*mode),
                _ => None,
            })
            .collect();
        assert_eq!(
            modes,
            vec![
                CodeRenderMode::Statement,
                CodeRenderMode::Statement,
                CodeRenderMode::Expression,
                CodeRenderMode::Encode,
            ]
        );
    }

    #[test]
    fn should_locate_code_after_server_comments_in_client_scripts() {
        let source = "<script>var a;<%-- c\nc --%><%= Foo %></script>";
        let parsed = parse_page(source).unwrap();
        let location = parsed
            .tree
            .descendants(parsed.tree.root())
            .into_iter()
            .find_map(|id| match &parsed.tree.node(id).kind {
                BuilderKind::CodeRender { .. } => parsed.tree.node(id).location.clone(),
                _ => None,
            })
            .unwrap();
        assert_eq!(location.begin.offset, 27);
        assert_eq!((location.begin.line, location.begin.column), (2, 7));
        assert!(source[location.begin.offset..].starts_with("<%= Foo %>"));
    }

    #[test]
    fn should_split_code_out_of_plain_tag_attributes() {
        let parsed = parse_page("<a href=\"<%= Url %>\">go</a>").unwrap();
        let tree = &parsed.tree;
        let children = tree.children(tree.root());
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], BuilderChild::Literal("<a href=\"".to_string()));
        match &children[1] {
            BuilderChild::Builder(id) => match &tree.node(*id).kind {
                BuilderKind::CodeRender { code, mode } => {
                    assert_eq!(code, " Url ");
                    assert_eq!(*mode, CodeRenderMode::Expression);
                }
                other => panic!("unexpected kind {:?}", other),
            },
            other => panic!("unexpected child {:?}", other),
        }
        assert_eq!(children[2], BuilderChild::Literal("\">go</a>".to_string()));
    }

    #[test]
    fn should_leave_expression_builders_in_plain_tags_alone() {
        let source = "<a href=\"<%$ Resources:Site, Home %>\">home</a>";
        let parsed = parse_page(source).unwrap();
        assert_eq!(parsed.tree.len(), 1);
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), source);
    }

    #[test]
    fn should_reject_code_inside_property_controls() {
        let err = parse_page("<asp:Repeater runat=\"server\"><% x(); %></asp:Repeater>").unwrap_err();
        assert_eq!(err.message, "Code blocks are not supported in this context.");
    }
}

mod scripts {
    use super::*;

    #[test]
    fn should_capture_server_scripts() {
        let parsed = parse_page(
            "<script runat=\"server\" language=\"VB\">Sub Page_Load()\nEnd Sub</script><p>x</p>",
        )
        .unwrap();
        assert_eq!(parsed.unit.scripts.len(), 1);
        assert_eq!(parsed.unit.scripts[0].code, "Sub Page_Load()\nEnd Sub");
        assert_eq!(parsed.unit.language(), Some("VB"));
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), "<p>x</p>");
    }

    #[test]
    fn should_prefer_the_directive_language() {
        let parsed = parse_page(
            "<%@ Page Language=\"C#\" %><script runat=\"server\" language=\"VB\"></script>",
        )
        .unwrap();
        assert_eq!(parsed.unit.language(), Some("C#"));
    }

    #[test]
    fn should_pass_client_scripts_through() {
        let source = "<script type=\"text/javascript\">var a = \"<b>\";</script>";
        let parsed = parse_page(source).unwrap();
        assert!(parsed.unit.scripts.is_empty());
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), source);
    }

    #[test]
    fn should_read_script_sources() {
        let provider = MemoryPathProvider::init_with_files(vec![
            ("/default.aspx", "<script runat=\"server\" src=\"code/page.cs\"></script>"),
            ("/code/page.cs", "void Hello() {}"),
        ]);
        let parsed = aspx_compiler::parse_file(
            &provider,
            Arc::new(ComponentRegistry::with_builtins()),
            None,
            &VirtualPath::new("/default.aspx"),
        )
        .unwrap();
        assert_eq!(parsed.unit.scripts[0].code, "void Hello() {}");
        let deps: Vec<&str> = parsed.unit.dependencies().map(|d| d.as_str()).collect();
        assert_eq!(deps, vec!["/code/page.cs"]);
    }

    #[test]
    fn should_reject_empty_script_sources() {
        let err = parse_page("<script runat=\"server\" src=\"\"></script>").unwrap_err();
        assert_eq!(err.message, "src cannot be an empty string");
    }
}

mod directives {
    use super::*;

    #[test]
    fn should_record_page_settings() {
        let parsed = parse_page(concat!(
            "<%@ Page Language=\"C#\" Inherits=\"Site.Home\" CodeFile=\"Default.aspx.cs\" ",
            "MasterPageFile=\"~/Site.master\" %>\n",
            "<%@ Import Namespace=\"System.Data\" %>\n",
            "<%@ Implements Interface=\"System.IDisposable\" %>"
        ))
        .unwrap();
        let unit = &parsed.unit;
        assert_eq!(unit.base_type.as_deref(), Some("Site.Home"));
        assert_eq!(unit.code_file, Some(VirtualPath::new("/Default.aspx.cs")));
        assert_eq!(unit.master_page_file, Some(VirtualPath::new("/Site.master")));
        assert_eq!(unit.imports, vec!["System.Data".to_string()]);
        assert_eq!(unit.interfaces, vec!["System.IDisposable".to_string()]);
        let deps: Vec<&str> = unit.dependencies().map(|d| d.as_str()).collect();
        assert_eq!(deps, vec!["/Default.aspx.cs", "/Site.master"]);
    }

    #[test]
    fn should_reject_a_second_main_directive() {
        let err = parse_page("<%@ Page %><%@ Page %>").unwrap_err();
        assert_eq!(err.message, "Only one 'Page' directive is allowed.");
        assert_eq!(err.kind, ParseErrorKind::Directive);
    }

    #[test]
    fn should_resolve_registered_user_controls() {
        let parsed = parse_page(concat!(
            "<%@ Register TagPrefix=\"uc\" TagName=\"Header\" Src=\"~/controls/header.ascx\" %>",
            "<uc:Header ID=\"h\" runat=\"server\" />"
        ))
        .unwrap();
        let header = parsed.tree.controls_with_ids()[0];
        assert_eq!(
            parsed.tree.node(header).type_name(),
            "ASP.controls_header_ascx"
        );
        let deps: Vec<&str> = parsed.unit.dependencies().map(|d| d.as_str()).collect();
        assert_eq!(deps, vec!["/controls/header.ascx"]);
    }

    #[test]
    fn should_reject_page_directives_in_user_controls() {
        let err = parse_as("/c.ascx", UnitKind::UserControl, "<%@ Page %>").unwrap_err();
        assert_eq!(err.message, "The directive 'Page' is not allowed in this file.");
    }
}

mod application_files {
    use super::*;

    fn parse_global(source: &str) -> ParseResult<ParsedUnit> {
        parse_as("/global.asax", UnitKind::Application, source)
    }

    #[test]
    fn should_accept_directives_and_scripts() {
        let parsed = parse_global(concat!(
            "<%@ Application Language=\"C#\" %>\n",
            "<script runat=\"server\">void Application_Start() {}</script>\n"
        ))
        .unwrap();
        assert_eq!(parsed.unit.scripts.len(), 1);
        assert_eq!(parsed.tree.len(), 1);
    }

    #[test]
    fn should_reject_markup() {
        let err = parse_global("<p>hi</p>").unwrap_err();
        assert_eq!(err.message, "Invalid tag for application file.");
    }

    #[test]
    fn should_reject_text() {
        let err = parse_global("hello").unwrap_err();
        assert_eq!(err.message, "Content not valid for application file.");
    }

    #[test]
    fn should_reject_code_blocks() {
        let err = parse_global("<%= DateTime.Now %>").unwrap_err();
        assert_eq!(err.message, "Invalid content for application file.");
    }

    #[test]
    fn should_reject_register_directives() {
        let err = parse_global("<%@ Register TagPrefix=\"x\" Namespace=\"Y\" %>").unwrap_err();
        assert_eq!(err.message, "The directive 'Register' is not allowed in this file.");
    }
}

mod filters {
    use super::*;

    struct NoCode;

    impl PageParserFilter for NoCode {
        fn allow_code(&self) -> bool {
            false
        }
    }

    struct NoButtons;

    impl PageParserFilter for NoButtons {
        fn allow_control(&self, descriptor: &ComponentDescriptor) -> bool {
            !descriptor.type_name.ends_with(".Button")
        }
    }

    struct DropExpressions;

    impl PageParserFilter for DropExpressions {
        fn process_code_construct(&self, kind: CodeConstructKind, _code: &str) -> bool {
            kind != CodeConstructKind::ExpressionSnippet
        }
    }

    #[test]
    fn should_reject_code_when_disallowed() {
        let err = parse_filtered(Arc::new(NoCode), "<% x(); %>").unwrap_err();
        assert_eq!(err.message, "Code blocks are not allowed in this file.");
    }

    #[test]
    fn should_still_allow_data_binding_without_code() {
        let parsed = parse_filtered(Arc::new(NoCode), "<p><%# Eval(\"Name\") %></p>").unwrap();
        let bindings = parsed
            .tree
            .descendants(parsed.tree.root())
            .into_iter()
            .filter(|id| matches!(parsed.tree.node(*id).kind, BuilderKind::DataBinding { .. }))
            .count();
        assert_eq!(bindings, 1);
    }

    #[test]
    fn should_reject_server_scripts_when_code_is_disallowed() {
        let err = parse_filtered(Arc::new(NoCode), "<script runat=\"server\">x</script>").unwrap_err();
        assert_eq!(err.message, "Code blocks are not allowed in this file.");
    }

    #[test]
    fn should_reject_filtered_controls() {
        let err = parse_filtered(Arc::new(NoButtons), "<asp:Button runat=\"server\" />").unwrap_err();
        assert_eq!(
            err.message,
            "The control type 'System.Web.UI.WebControls.Button' is not allowed in this file."
        );
    }

    #[test]
    fn should_drop_vetoed_constructs_silently() {
        let parsed = parse_filtered(Arc::new(DropExpressions), "<p><%= a %><% b(); %></p>").unwrap();
        let codes: Vec<String> = parsed
            .tree
            .descendants(parsed.tree.root())
            .into_iter()
            .filter_map(|id| match &parsed.tree.node(id).kind {
                BuilderKind::CodeRender { code, .. } => Some(code.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec![" b(); ".to_string()]);
    }
}
