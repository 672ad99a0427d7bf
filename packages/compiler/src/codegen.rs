//! Template code generation
//!
//! Turns a parsed unit into a [`CodeCompileUnit`]. Method names are assigned
//! to the builder nodes first; the emission pass itself only reads the tree.

use std::collections::HashSet;

use crate::builder::{BuilderChild, BuilderId, BuilderKind, CodeRenderMode, ControlTree};
use crate::codedom::{
    CodeCompileUnit, CodeExpression as E, CodeMember, CodeMemberKind, CodeNamespace,
    CodeStatement as S, CodeTypeDeclaration,
};
use crate::foundry::{mangle_path, ComponentFlags, PropertyKind};
use crate::generator::ParsedUnit;

/// Namespace of generated classes without an explicit `ClassName`.
pub const CODE_NAMESPACE: &str = "ASP";

const CONTROL_TYPE: &str = "System.Web.UI.Control";
const WRITER_TYPE: &str = "System.Web.UI.HtmlTextWriter";
const DEFAULT_IMPORTS: &[&str] = &["System", "System.Web", "System.Web.UI"];

/// Give every control and property node the name of its build method.
pub fn assign_method_names(tree: &mut ControlTree) {
    let root = tree.root();
    tree.node_mut(root).method_name = Some("__BuildControlTree".to_string());

    let mut ordinal = 0;
    for id in tree.descendants(root) {
        let node = tree.node_mut(id);
        if !matches!(node.kind, BuilderKind::Control(_) | BuilderKind::Property { .. }) {
            continue;
        }
        let name = match &node.control_id {
            Some(control_id) => format!("__BuildControl{}", control_id),
            None => {
                let name = format!("__BuildControl__control{}", ordinal);
                ordinal += 1;
                name
            }
        };
        node.method_name = Some(name);
    }
}

pub struct TemplateCodeGenerator<'a> {
    parsed: &'a ParsedUnit,
}

impl<'a> TemplateCodeGenerator<'a> {
    pub fn new(parsed: &'a ParsedUnit) -> Self {
        TemplateCodeGenerator { parsed }
    }

    fn tree(&self) -> &ControlTree {
        &self.parsed.tree
    }

    /// Namespace and simple name of the generated class.
    pub fn class_parts(&self) -> (String, String) {
        let unit = &self.parsed.unit;
        match &unit.class_name {
            Some(class_name) => match class_name.rsplit_once('.') {
                Some((ns, name)) => (ns.to_string(), name.to_string()),
                None => (CODE_NAMESPACE.to_string(), class_name.clone()),
            },
            None => (CODE_NAMESPACE.to_string(), mangle_path(&unit.virtual_path)),
        }
    }

    pub fn generated_type_name(&self) -> String {
        let (ns, name) = self.class_parts();
        CodeNamespace::new(ns).qualify(&name)
    }

    /// Whether the markup is paired with a code-behind partial class.
    pub fn has_code_behind(&self) -> bool {
        let unit = &self.parsed.unit;
        unit.base_type.is_some() && unit.code_file.is_some()
    }

    pub fn generate(&self) -> CodeCompileUnit {
        let unit = &self.parsed.unit;
        let mut compile_unit = CodeCompileUnit {
            namespaces: Vec::new(),
            referenced_assemblies: unit.assemblies.clone(),
        };

        let mut imports: Vec<String> = DEFAULT_IMPORTS.iter().map(|s| s.to_string()).collect();
        for import in &unit.imports {
            if !imports.contains(import) {
                imports.push(import.clone());
            }
        }

        let fields = self.control_fields();
        let field_names: HashSet<String> = fields.iter().map(|m| m.name.clone()).collect();

        if let (true, Some(base_type)) = (self.has_code_behind(), &unit.base_type) {
            let (ns, name) = match base_type.rsplit_once('.') {
                Some((ns, name)) => (ns.to_string(), name.to_string()),
                None => (String::new(), base_type.clone()),
            };
            let mut partial = CodeTypeDeclaration::new(name);
            partial.is_partial = true;
            partial.members = fields.clone();
            let mut namespace = CodeNamespace::new(ns);
            namespace.imports = imports.clone();
            namespace.types.push(partial);
            compile_unit.namespaces.push(namespace);
        }

        let (ns, name) = self.class_parts();
        let mut class = CodeTypeDeclaration::new(name);
        class.base_types.push(
            unit.base_type
                .clone()
                .unwrap_or_else(|| unit.kind.default_base_type().to_string()),
        );
        class.base_types.extend(unit.interfaces.iter().cloned());
        if !self.has_code_behind() {
            class.members.extend(fields);
        }
        for (index, script) in unit.scripts.iter().enumerate() {
            class.members.push(CodeMember {
                name: format!("__script{}", index),
                kind: CodeMemberKind::Snippet {
                    text: script.code.clone(),
                },
            });
        }

        let root = self.tree().root();
        let mut methods = Vec::new();
        let statements = self.children_statements(root, &field_names, &mut methods);
        class.members.extend(methods);
        class.members.push(CodeMember {
            name: "__BuildControlTree".to_string(),
            kind: CodeMemberKind::Method {
                return_type: None,
                parameters: vec![("__ctrl".to_string(), CONTROL_TYPE.to_string())],
                statements,
            },
        });
        class.members.push(CodeMember {
            name: "FrameworkInitialize".to_string(),
            kind: CodeMemberKind::Method {
                return_type: None,
                parameters: Vec::new(),
                statements: vec![
                    S::Expression(E::invoke(E::Base, "FrameworkInitialize", Vec::new())),
                    S::Expression(E::invoke(E::This, "__BuildControlTree", vec![E::This])),
                ],
            },
        });

        let mut namespace = CodeNamespace::new(ns);
        namespace.imports = imports;
        namespace.types.push(class);
        compile_unit.namespaces.push(namespace);
        compile_unit
    }

    /// One field per control with an ID that lives outside any template.
    fn control_fields(&self) -> Vec<CodeMember> {
        let tree = self.tree();
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for id in tree.controls_with_ids() {
            let node = tree.node(id);
            let descriptor = match node.descriptor() {
                Some(descriptor) => descriptor,
                None => continue,
            };
            if self.inside_template(id) {
                continue;
            }
            if let Some(control_id) = &node.control_id {
                if seen.insert(control_id.clone()) {
                    fields.push(CodeMember::field(control_id, &descriptor.type_name));
                }
            }
        }
        fields
    }

    fn inside_template(&self, id: BuilderId) -> bool {
        let tree = self.tree();
        let mut current = tree.node(id).parent;
        while let Some(parent) = current {
            let node = tree.node(parent);
            if let BuilderKind::Property {
                kind: PropertyKind::Template,
                ..
            } = node.kind
            {
                return true;
            }
            current = node.parent;
        }
        false
    }

    fn method_name(&self, id: BuilderId) -> String {
        self.tree()
            .node(id)
            .method_name
            .clone()
            .unwrap_or_else(|| format!("__BuildControl__node{}", id.0))
    }

    fn line_pragma(&self, id: BuilderId, statements: Vec<S>) -> S {
        match &self.tree().node(id).location {
            Some(location) => S::LinePragma {
                file: location.filename.clone(),
                line: location.begin.line,
                statements,
            },
            None => S::LinePragma {
                file: self.parsed.unit.virtual_path.to_string(),
                line: 1,
                statements,
            },
        }
    }

    /// Build method of a control node; child methods are appended to
    /// `methods` before it.
    fn control_method(&self, id: BuilderId, fields: &HashSet<String>, methods: &mut Vec<CodeMember>) {
        let node = self.tree().node(id);
        let descriptor = match node.descriptor() {
            Some(descriptor) => descriptor,
            None => return,
        };
        let type_name = descriptor.type_name.clone();
        let ctrl = || E::Variable("__ctrl".to_string());

        let mut statements = vec![S::Declare {
            name: "__ctrl".to_string(),
            type_name: type_name.clone(),
            value: E::new_object(&type_name),
        }];
        if let Some(control_id) = &node.control_id {
            if fields.contains(control_id) && !self.inside_template(id) {
                statements.push(S::Assign {
                    target: E::field(E::This, control_id),
                    value: ctrl(),
                });
            }
            statements.push(S::Assign {
                target: E::field(ctrl(), "ID"),
                value: E::StringLiteral(control_id.clone()),
            });
        }

        for (name, value) in node.attributes.iter() {
            let value = match value {
                Some(value) if !value.contains("<%") => value,
                _ => continue,
            };
            if name.is_empty() || name.eq_ignore_ascii_case("runat") || name.eq_ignore_ascii_case("id") {
                continue;
            }
            if descriptor.is(ComponentFlags::HTML_CONTROL) {
                statements.push(S::Expression(E::invoke(
                    E::field(ctrl(), "Attributes"),
                    "Add",
                    vec![E::StringLiteral(name.to_string()), E::StringLiteral(value.to_string())],
                )));
            } else {
                statements.push(S::Assign {
                    target: E::field(ctrl(), name),
                    value: E::StringLiteral(value.to_string()),
                });
            }
        }

        if let Some(inner_text) = &node.inner_text {
            statements.push(S::Assign {
                target: E::field(ctrl(), "Text"),
                value: E::StringLiteral(inner_text.clone()),
            });
        }

        statements.extend(self.children_statements(id, fields, methods));
        statements.push(S::Return(ctrl()));

        methods.push(CodeMember {
            name: self.method_name(id),
            kind: CodeMemberKind::Method {
                return_type: Some(type_name),
                parameters: Vec::new(),
                statements,
            },
        });
    }

    /// Statements adding the children of `id` to `__ctrl`.
    fn children_statements(
        &self,
        id: BuilderId,
        fields: &HashSet<String>,
        methods: &mut Vec<CodeMember>,
    ) -> Vec<S> {
        let tree = self.tree();
        let node = tree.node(id);
        let ctrl = || E::Variable("__ctrl".to_string());
        let container = || E::Variable("parameterContainer".to_string());
        let writer = || E::Variable("__w".to_string());

        let uses_render_method = node.children.iter().any(|child| match child {
            BuilderChild::Builder(b) => matches!(
                tree.node(*b).kind,
                BuilderKind::CodeRender { .. } | BuilderKind::DataBinding { .. }
            ),
            BuilderChild::Literal(_) => false,
        });
        let collection = match &node.kind {
            BuilderKind::Control(d) if d.is(ComponentFlags::CHILDREN_AS_PROPERTIES) => {
                d.default_property.clone()
            }
            _ => None,
        };

        let mut statements = Vec::new();
        let mut render = Vec::new();
        let mut control_index = 0;

        for child in &node.children {
            let child_id = match child {
                BuilderChild::Literal(text) => {
                    if uses_render_method {
                        render.push(S::Expression(E::invoke(
                            writer(),
                            "Write",
                            vec![E::StringLiteral(text.clone())],
                        )));
                    } else {
                        statements.push(S::Expression(E::invoke(
                            E::field(ctrl(), "Controls"),
                            "Add",
                            vec![E::New(
                                "System.Web.UI.LiteralControl".to_string(),
                                vec![E::StringLiteral(text.clone())],
                            )],
                        )));
                    }
                    continue;
                }
                BuilderChild::Builder(b) => *b,
            };

            let child_node = tree.node(child_id);
            match &child_node.kind {
                BuilderKind::Control(_) => {
                    self.control_method(child_id, fields, methods);
                    let build = E::invoke(E::This, &self.method_name(child_id), Vec::new());
                    let add = match &collection {
                        Some(property) => E::invoke(E::field(ctrl(), property), "Add", vec![build]),
                        None => E::invoke(E::field(ctrl(), "Controls"), "Add", vec![build]),
                    };
                    statements.push(self.line_pragma(child_id, vec![S::Expression(add)]));
                    if uses_render_method {
                        render.push(S::Expression(E::invoke(
                            E::Index(Box::new(E::field(container(), "Controls")), control_index),
                            "RenderControl",
                            vec![writer()],
                        )));
                    }
                    control_index += 1;
                }
                BuilderKind::Property { name, kind } => match kind {
                    PropertyKind::Template => {
                        let method = self.method_name(child_id);
                        let body = self.children_statements(child_id, fields, methods);
                        methods.push(CodeMember {
                            name: method.clone(),
                            kind: CodeMemberKind::Method {
                                return_type: None,
                                parameters: vec![("__ctrl".to_string(), CONTROL_TYPE.to_string())],
                                statements: body,
                            },
                        });
                        statements.push(S::Assign {
                            target: E::field(ctrl(), name),
                            value: E::New(
                                "System.Web.UI.CompiledTemplateBuilder".to_string(),
                                vec![E::Delegate {
                                    type_name: "System.Web.UI.BuildTemplateMethod".to_string(),
                                    method,
                                }],
                            ),
                        });
                    }
                    PropertyKind::Collection => {
                        for item in tree.child_builders(child_id) {
                            if tree.node(item).descriptor().is_none() {
                                continue;
                            }
                            self.control_method(item, fields, methods);
                            let build = E::invoke(E::This, &self.method_name(item), Vec::new());
                            statements.push(self.line_pragma(
                                item,
                                vec![S::Expression(E::invoke(E::field(ctrl(), name), "Add", vec![build]))],
                            ));
                        }
                    }
                    PropertyKind::Inner => {
                        let text = child_node
                            .inner_text
                            .clone()
                            .unwrap_or_else(|| tree.literal_text(child_id));
                        statements.push(S::Assign {
                            target: E::field(ctrl(), name),
                            value: E::StringLiteral(text),
                        });
                    }
                },
                BuilderKind::CodeRender { code, mode } => {
                    let statement = match mode {
                        CodeRenderMode::Statement => S::Snippet(code.clone()),
                        CodeRenderMode::Expression => S::Expression(E::invoke(
                            writer(),
                            "Write",
                            vec![E::Snippet(code.clone())],
                        )),
                        CodeRenderMode::Encode => S::Expression(E::invoke(
                            writer(),
                            "Write",
                            vec![E::invoke(
                                E::Variable("System.Web.HttpUtility".to_string()),
                                "HtmlEncode",
                                vec![E::Snippet(code.clone())],
                            )],
                        )),
                    };
                    render.push(self.line_pragma(child_id, vec![statement]));
                }
                BuilderKind::DataBinding { code } => {
                    let value = E::invoke(
                        E::Variable("System.Convert".to_string()),
                        "ToString",
                        vec![E::Snippet(code.clone())],
                    );
                    render.push(self.line_pragma(
                        child_id,
                        vec![S::Expression(E::invoke(writer(), "Write", vec![value]))],
                    ));
                }
                BuilderKind::Root => {}
            }
        }

        if uses_render_method {
            let render_name = format!("__Render{}", self.method_name(id).trim_start_matches("__Build"));
            methods.push(CodeMember {
                name: render_name.clone(),
                kind: CodeMemberKind::Method {
                    return_type: None,
                    parameters: vec![
                        ("__w".to_string(), WRITER_TYPE.to_string()),
                        ("parameterContainer".to_string(), CONTROL_TYPE.to_string()),
                    ],
                    statements: render,
                },
            });
            statements.push(S::Expression(E::invoke(
                ctrl(),
                "SetRenderMethodDelegate",
                vec![E::Delegate {
                    type_name: "System.Web.UI.RenderMethod".to_string(),
                    method: render_name,
                }],
            )));
        }
        statements
    }
}
