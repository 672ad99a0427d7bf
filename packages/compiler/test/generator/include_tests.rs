//! Server Side Include Tests
//!
//! `<!-- #include -->` resolution, recursion and containment checks against
//! both the in-memory and the on-disk path providers.

use std::fs;
use std::sync::Arc;

use aspx_compiler::{
    parse_file, ComponentRegistry, MemoryPathProvider, PageParserFilter, ParseErrorKind,
    ParseResult, ParsedUnit, PhysicalPathProvider, VirtualPath, VirtualPathProvider,
};

fn parse_with(
    provider: &dyn VirtualPathProvider,
    filter: Option<Arc<dyn PageParserFilter>>,
    path: &str,
) -> ParseResult<ParsedUnit> {
    parse_file(
        provider,
        Arc::new(ComponentRegistry::with_builtins()),
        filter,
        &VirtualPath::new(path),
    )
}

fn parse(provider: &dyn VirtualPathProvider, path: &str) -> ParseResult<ParsedUnit> {
    parse_with(provider, None, path)
}

fn dependencies(parsed: &ParsedUnit) -> Vec<String> {
    parsed
        .unit
        .dependencies()
        .map(|d| d.as_str().to_string())
        .collect()
}

mod memory {
    use super::*;

    #[test]
    fn should_inline_file_includes() {
        let provider = MemoryPathProvider::init_with_files(vec![
            ("/default.aspx", "<!-- #include file=\"inc/header.inc\" -->body"),
            ("/inc/header.inc", "<h1>Header</h1>"),
        ]);
        let parsed = parse(&provider, "/default.aspx").unwrap();
        assert_eq!(
            parsed.tree.literal_text(parsed.tree.root()),
            "<h1>Header</h1>body"
        );
        assert_eq!(dependencies(&parsed), vec!["/inc/header.inc"]);
    }

    #[test]
    fn should_resolve_virtual_includes_from_the_root() {
        let provider = MemoryPathProvider::init_with_files(vec![
            ("/sub/page.aspx", "<!-- #include virtual=\"~/inc/footer.inc\" -->"),
            ("/inc/footer.inc", "<footer/>"),
        ]);
        let parsed = parse(&provider, "/sub/page.aspx").unwrap();
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), "<footer/>");
    }

    #[test]
    fn should_resolve_nested_includes_against_the_including_file() {
        let provider = MemoryPathProvider::init_with_files(vec![
            ("/default.aspx", "<!-- #include file=\"inc/header.inc\" -->"),
            ("/inc/header.inc", "[<!-- #include file=\"nav.inc\" -->]"),
            ("/inc/nav.inc", "nav"),
        ]);
        let parsed = parse(&provider, "/default.aspx").unwrap();
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), "[nav]");
        assert_eq!(dependencies(&parsed), vec!["/inc/header.inc", "/inc/nav.inc"]);
    }

    #[test]
    fn should_attribute_included_controls_to_their_file() {
        let provider = MemoryPathProvider::init_with_files(vec![
            (
                "/default.aspx",
                "<form runat=\"server\">\n<!-- #include file=\"menu.inc\" -->\n</form>",
            ),
            ("/menu.inc", "\n\n<asp:Label ID=\"menu\" runat=\"server\" />"),
        ]);
        let parsed = parse(&provider, "/default.aspx").unwrap();
        let label = parsed.tree.controls_with_ids()[0];
        let node = parsed.tree.node(label);
        assert_eq!(node.control_id.as_deref(), Some("menu"));
        let location = node.location.clone().unwrap();
        assert_eq!(location.filename, "/menu.inc");
        assert_eq!(location.begin.line, 3);
        let form = node.parent.unwrap();
        assert_eq!(parsed.tree.node(form).tag_name, "form");
    }

    #[test]
    fn should_detect_include_cycles() {
        let provider = MemoryPathProvider::init_with_files(vec![
            ("/default.aspx", "<!-- #include file=\"a.inc\" -->"),
            ("/a.inc", "a<!-- #include file=\"b.inc\" -->"),
            ("/b.inc", "b<!-- #include file=\"a.inc\" -->"),
        ]);
        let err = parse(&provider, "/default.aspx").unwrap_err();
        assert_eq!(err.message, "Infinite recursion detected including file: /a.inc");
        assert_eq!(err.kind, ParseErrorKind::Include);
        assert_eq!(err.location.filename, "/b.inc");
    }

    #[test]
    fn should_detect_a_file_including_itself() {
        let provider = MemoryPathProvider::init_with_files(vec![(
            "/default.aspx",
            "<!-- #include file=\"Default.aspx\" -->",
        )]);
        provider.write_file("/Default.aspx", "x");
        let err = parse(&provider, "/default.aspx");
        // `/Default.aspx` exists as a distinct file, but the parser stack
        // compares paths without regard to case.
        assert_eq!(
            err.unwrap_err().message,
            "Infinite recursion detected including file: /Default.aspx"
        );
    }

    #[test]
    fn should_refuse_to_climb_above_the_root() {
        let provider = MemoryPathProvider::init_with_files(vec![(
            "/default.aspx",
            "<!-- #include file=\"../../secret.txt\" -->",
        )]);
        let err = parse(&provider, "/default.aspx").unwrap_err();
        assert_eq!(
            err.message,
            "Cannot use a leading .. to exit above the top directory."
        );
        assert_eq!(err.kind, ParseErrorKind::Include);
    }

    #[test]
    fn should_report_missing_files() {
        let provider = MemoryPathProvider::init_with_files(vec![(
            "/default.aspx",
            "<!-- #include virtual=\"/missing.inc\" -->",
        )]);
        let err = parse(&provider, "/default.aspx").unwrap_err();
        assert_eq!(err.message, "The file '/missing.inc' does not exist.");
    }

    #[test]
    fn should_consult_the_filter() {
        struct NoIncludes;
        impl PageParserFilter for NoIncludes {
            fn allow_server_side_include(&self, _path: &VirtualPath) -> bool {
                false
            }
        }

        let provider = MemoryPathProvider::init_with_files(vec![
            ("/default.aspx", "<!-- #include file=\"header.inc\" -->"),
            ("/header.inc", "h"),
        ]);
        let err = parse_with(&provider, Some(Arc::new(NoIncludes)), "/default.aspx").unwrap_err();
        assert_eq!(err.message, "The server side include '/header.inc' is not allowed.");
    }
}

mod physical {
    use super::*;

    #[test]
    fn should_include_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("inc")).unwrap();
        fs::write(
            dir.path().join("default.aspx"),
            "<!-- #include file=\"inc/header.inc\" --><p/>",
        )
        .unwrap();
        fs::write(dir.path().join("inc/header.inc"), "<h1>Disk</h1>").unwrap();

        let provider = PhysicalPathProvider::new(dir.path()).unwrap();
        let parsed = parse(&provider, "/default.aspx").unwrap();
        assert_eq!(parsed.tree.literal_text(parsed.tree.root()), "<h1>Disk</h1><p/>");
        assert_eq!(dependencies(&parsed), vec!["/inc/header.inc"]);
    }

    #[test]
    fn should_reject_includes_outside_the_application() {
        let outer = tempfile::tempdir().unwrap();
        let app = outer.path().join("app");
        fs::create_dir_all(app.join("sub")).unwrap();
        fs::write(outer.path().join("secret.inc"), "secret").unwrap();
        fs::write(
            app.join("sub/page.aspx"),
            "<!-- #include file=\"../../secret.inc\" -->",
        )
        .unwrap();

        let provider = PhysicalPathProvider::new(&app).unwrap();
        let err = parse(&provider, "/sub/page.aspx").unwrap_err();
        assert_eq!(
            err.message,
            "Cannot use a leading .. to exit above the top directory."
        );
    }

    #[test]
    fn should_report_a_missing_page() {
        let dir = tempfile::tempdir().unwrap();
        let provider = PhysicalPathProvider::new(dir.path()).unwrap();
        let err = parse(&provider, "/nope.aspx").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Include);
        assert_eq!(err.location.filename, "/nope.aspx");
    }
}
