//! Code Generation Tests
//!
//! From parsed markup to the code object model and the emitted C# and
//! Visual Basic sources.

use std::sync::Arc;

use aspx_compiler::codedom::{CodeMemberKind, CodeTypeDeclaration};
use aspx_compiler::{
    parse_file, ComponentRegistry, MemoryPathProvider, ParsedUnit, SourceSyntax,
    TemplateCodeGenerator, VirtualPath,
};

fn parse(files: Vec<(&str, &str)>, path: &str) -> ParsedUnit {
    let provider = MemoryPathProvider::init_with_files(files);
    parse_file(
        &provider,
        Arc::new(ComponentRegistry::with_builtins()),
        None,
        &VirtualPath::new(path),
    )
    .unwrap()
}

fn parse_page(source: &str) -> ParsedUnit {
    parse(vec![("/default.aspx", source)], "/default.aspx")
}

fn main_class<'a>(unit: &'a aspx_compiler::CodeCompileUnit, name: &str) -> &'a CodeTypeDeclaration {
    unit.types()
        .find(|(qualified, _)| qualified == name)
        .map(|(_, decl)| decl)
        .unwrap_or_else(|| panic!("no type {}", name))
}

fn member_names(decl: &CodeTypeDeclaration) -> Vec<&str> {
    decl.members.iter().map(|m| m.name.as_str()).collect()
}

mod naming {
    use super::*;

    #[test]
    fn should_name_build_methods_after_ids() {
        let parsed = parse_page(
            "<asp:Label ID=\"title\" runat=\"server\" /><asp:Panel runat=\"server\"><asp:Button runat=\"server\" /></asp:Panel>",
        );
        let tree = &parsed.tree;
        let names: Vec<Option<String>> = tree
            .descendants(tree.root())
            .into_iter()
            .map(|id| tree.node(id).method_name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                Some("__BuildControltitle".to_string()),
                Some("__BuildControl__control0".to_string()),
                Some("__BuildControl__control1".to_string()),
            ]
        );
        assert_eq!(
            tree.node(tree.root()).method_name.as_deref(),
            Some("__BuildControlTree")
        );
    }

    #[test]
    fn should_derive_the_class_name_from_the_path() {
        let parsed = parse(vec![("/admin/users.aspx", "<p/>")], "/admin/users.aspx");
        let generator = TemplateCodeGenerator::new(&parsed);
        assert_eq!(generator.generated_type_name(), "ASP.admin_users_aspx");
    }

    #[test]
    fn should_honor_class_name() {
        let parsed = parse_page("<%@ Page ClassName=\"Site.HomePage\" %>");
        let generator = TemplateCodeGenerator::new(&parsed);
        assert_eq!(generator.class_parts(), ("Site".to_string(), "HomePage".to_string()));
        let parsed = parse_page("<%@ Page ClassName=\"HomePage\" %>");
        assert_eq!(
            TemplateCodeGenerator::new(&parsed).generated_type_name(),
            "ASP.HomePage"
        );
    }
}

mod object_model {
    use super::*;

    #[test]
    fn should_declare_fields_and_build_methods() {
        let parsed = parse_page(concat!(
            "<%@ Page Language=\"C#\" %>\n",
            "<%@ Import Namespace=\"System.Data\" %>\n",
            "<form id=\"form1\" runat=\"server\"><asp:Label ID=\"lbl\" runat=\"server\" Text=\"Hi\" /></form>"
        ));
        let unit = TemplateCodeGenerator::new(&parsed).generate();
        let class = main_class(&unit, "ASP.default_aspx");

        assert_eq!(class.base_types, vec!["System.Web.UI.Page".to_string()]);
        assert_eq!(
            member_names(class),
            vec![
                "form1",
                "lbl",
                "__BuildControllbl",
                "__BuildControlform1",
                "__BuildControlTree",
                "FrameworkInitialize",
            ]
        );
        match &class.members[0].kind {
            CodeMemberKind::Field { type_name } => {
                assert_eq!(type_name, "System.Web.UI.HtmlControls.HtmlForm")
            }
            other => panic!("unexpected member {:?}", other),
        }
        assert_eq!(
            unit.namespaces[0].imports,
            vec!["System", "System.Web", "System.Web.UI", "System.Data"]
        );
    }

    #[test]
    fn should_split_fields_into_the_code_behind_partial() {
        let parsed = parse(
            vec![
                (
                    "/default.aspx",
                    "<%@ Page Inherits=\"Site.Home\" CodeFile=\"default.aspx.cs\" %><asp:Label ID=\"lbl\" runat=\"server\" />",
                ),
                ("/default.aspx.cs", "partial class Home {}"),
            ],
            "/default.aspx",
        );
        let generator = TemplateCodeGenerator::new(&parsed);
        assert!(generator.has_code_behind());
        let unit = generator.generate();

        let partial = main_class(&unit, "Site.Home");
        assert!(partial.is_partial);
        assert_eq!(member_names(partial), vec!["lbl"]);

        let class = main_class(&unit, "ASP.default_aspx");
        assert_eq!(class.base_types, vec!["Site.Home".to_string()]);
        assert!(!class.has_member("lbl"));
        assert!(class.has_member("__BuildControllbl"));
    }

    #[test]
    fn should_keep_template_controls_out_of_fields() {
        let parsed = parse_page(concat!(
            "<asp:Repeater ID=\"rep\" runat=\"server\"><ItemTemplate>",
            "<asp:Label ID=\"item\" runat=\"server\" />",
            "</ItemTemplate></asp:Repeater>"
        ));
        let unit = TemplateCodeGenerator::new(&parsed).generate();
        let class = main_class(&unit, "ASP.default_aspx");
        assert!(class.has_member("rep"));
        assert!(!class.has_member("item"));
        assert!(class.has_member("__BuildControlitem"));
    }

    #[test]
    fn should_add_interfaces_and_scripts() {
        let parsed = parse_page(concat!(
            "<%@ Implements Interface=\"System.IDisposable\" %>",
            "<script runat=\"server\">public void Dispose() {}</script>"
        ));
        let unit = TemplateCodeGenerator::new(&parsed).generate();
        let class = main_class(&unit, "ASP.default_aspx");
        assert_eq!(
            class.base_types,
            vec!["System.Web.UI.Page".to_string(), "System.IDisposable".to_string()]
        );
        assert!(class.has_member("__script0"));
    }

    #[test]
    fn should_use_the_unit_kind_base_type() {
        let parsed = parse(vec![("/menu.ascx", "<p/>")], "/menu.ascx");
        let unit = TemplateCodeGenerator::new(&parsed).generate();
        let class = main_class(&unit, "ASP.menu_ascx");
        assert_eq!(class.base_types, vec!["System.Web.UI.UserControl".to_string()]);
    }
}

mod csharp {
    use super::*;

    #[test]
    fn should_emit_controls_and_literals() {
        let parsed = parse_page("<p>Hi</p><asp:Label ID=\"lbl\" runat=\"server\" Text=\"A \\\"q\\\"\" />");
        let source = SourceSyntax::CSharp.emit(&TemplateCodeGenerator::new(&parsed).generate());

        assert!(source.contains("namespace ASP {"));
        assert!(source.contains("public class default_aspx : System.Web.UI.Page {"));
        assert!(source.contains("protected System.Web.UI.WebControls.Label lbl;"));
        assert!(source.contains(
            "__ctrl.Controls.Add(new System.Web.UI.LiteralControl(\"<p>Hi</p>\"));"
        ));
        assert!(source.contains("this.lbl = __ctrl;"));
        assert!(source.contains("__ctrl.ID = \"lbl\";"));
        assert!(source.contains("__ctrl.Text = \"A \\\"q\\\"\";"));
        assert!(source.contains("#line 1 \"/default.aspx\""));
        assert!(source.contains("__ctrl.Controls.Add(this.__BuildControllbl());"));
        assert!(source.contains("this.__BuildControlTree(this);"));
    }

    #[test]
    fn should_emit_render_methods_for_code_blocks() {
        let parsed = parse_page("<p>\n<%= Name %>\n</p>");
        let source = SourceSyntax::CSharp.emit(&TemplateCodeGenerator::new(&parsed).generate());

        assert!(source.contains(
            "public void __RenderControlTree(System.Web.UI.HtmlTextWriter __w, System.Web.UI.Control parameterContainer) {"
        ));
        assert!(source.contains("__w.Write(\"<p>\\n\");"));
        assert!(source.contains("#line 2 \"/default.aspx\""));
        assert!(source.contains("__w.Write(Name);"));
        assert!(source.contains(
            "__ctrl.SetRenderMethodDelegate(new System.Web.UI.RenderMethod(this.__RenderControlTree));"
        ));
    }

    #[test]
    fn should_emit_template_builders() {
        let parsed = parse_page(concat!(
            "<asp:Repeater ID=\"rep\" runat=\"server\"><ItemTemplate>",
            "<b>item</b>",
            "</ItemTemplate></asp:Repeater>"
        ));
        let source = SourceSyntax::CSharp.emit(&TemplateCodeGenerator::new(&parsed).generate());
        assert!(source.contains(
            "__ctrl.ItemTemplate = new System.Web.UI.CompiledTemplateBuilder(new System.Web.UI.BuildTemplateMethod(this.__BuildControl__control0));"
        ));
        assert!(source.contains("public void __BuildControl__control0(System.Web.UI.Control __ctrl) {"));
    }

    #[test]
    fn should_add_default_collection_items() {
        let parsed = parse_page(concat!(
            "<asp:DropDownList ID=\"ddl\" runat=\"server\">",
            "<asp:ListItem>One</asp:ListItem>",
            "</asp:DropDownList>"
        ));
        let source = SourceSyntax::CSharp.emit(&TemplateCodeGenerator::new(&parsed).generate());
        assert!(source.contains("__ctrl.Items.Add(this.__BuildControl__control0());"));
        assert!(source.contains("__ctrl.Text = \"One\";"));
    }

    #[test]
    fn should_add_html_attributes() {
        let parsed = parse_page("<div id=\"box\" runat=\"server\" class=\"wide\"></div>");
        let source = SourceSyntax::CSharp.emit(&TemplateCodeGenerator::new(&parsed).generate());
        assert!(source.contains("__ctrl.Attributes.Add(\"class\", \"wide\");"));
    }
}

mod visual_basic {
    use super::*;

    #[test]
    fn should_emit_visual_basic() {
        let parsed = parse_page("<%@ Page Language=\"VB\" %>\r\n<asp:Label ID=\"lbl\" runat=\"server\" />");
        let source =
            SourceSyntax::VisualBasic.emit(&TemplateCodeGenerator::new(&parsed).generate());

        assert!(source.contains("Namespace ASP"));
        assert!(source.contains("Public Class default_aspx"));
        assert!(source.contains("Inherits System.Web.UI.Page"));
        assert!(source.contains("Protected lbl As System.Web.UI.WebControls.Label"));
        assert!(source.contains("New System.Web.UI.LiteralControl(vbCrLf)"));
        assert!(source.contains("#ExternalSource(\"/default.aspx\", 2)"));
        assert!(source.contains("End Class"));
        assert_eq!(SourceSyntax::VisualBasic.file_extension(), "vb");
    }
}
