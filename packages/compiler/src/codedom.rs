//! Code object model
//!
//! Language neutral description of the generated code and the emitters
//! turning it into C# or Visual Basic source text.

use serde::{Deserialize, Serialize};

const INDENT_WITH: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CodeExpression {
    This,
    Base,
    Variable(String),
    /// `target.name`
    Field(Box<CodeExpression>, String),
    /// `target[index]`
    Index(Box<CodeExpression>, usize),
    /// `new T(args)`
    New(String, Vec<CodeExpression>),
    /// Delegate of type `type_name` bound to `this.method`.
    Delegate {
        type_name: String,
        method: String,
    },
    StringLiteral(String),
    Invoke {
        target: Box<CodeExpression>,
        method: String,
        args: Vec<CodeExpression>,
    },
    /// User code, emitted as is.
    Snippet(String),
}

impl CodeExpression {
    pub fn field(target: CodeExpression, name: &str) -> Self {
        CodeExpression::Field(Box::new(target), name.to_string())
    }

    pub fn new_object(type_name: &str) -> Self {
        CodeExpression::New(type_name.to_string(), Vec::new())
    }

    pub fn invoke(target: CodeExpression, method: &str, args: Vec<CodeExpression>) -> Self {
        CodeExpression::Invoke {
            target: Box::new(target),
            method: method.to_string(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CodeStatement {
    Assign {
        target: CodeExpression,
        value: CodeExpression,
    },
    Expression(CodeExpression),
    Return(CodeExpression),
    /// Local variable declaration with initializer.
    Declare {
        name: String,
        type_name: String,
        value: CodeExpression,
    },
    Snippet(String),
    /// Statements attributed to a line of the markup file.
    LinePragma {
        file: String,
        line: usize,
        statements: Vec<CodeStatement>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CodeMemberKind {
    Field {
        type_name: String,
    },
    Method {
        return_type: Option<String>,
        parameters: Vec<(String, String)>,
        statements: Vec<CodeStatement>,
    },
    Property {
        type_name: String,
        getter: Vec<CodeStatement>,
    },
    /// Member written directly in the target language (server scripts).
    Snippet {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeMember {
    pub name: String,
    pub kind: CodeMemberKind,
}

impl CodeMember {
    pub fn field(name: &str, type_name: &str) -> Self {
        CodeMember {
            name: name.to_string(),
            kind: CodeMemberKind::Field {
                type_name: type_name.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeTypeDeclaration {
    pub name: String,
    pub is_partial: bool,
    /// Base class first, then interfaces.
    pub base_types: Vec<String>,
    pub members: Vec<CodeMember>,
}

impl CodeTypeDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        CodeTypeDeclaration {
            name: name.into(),
            is_partial: false,
            base_types: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CodeNamespace {
    pub name: String,
    pub imports: Vec<String>,
    pub types: Vec<CodeTypeDeclaration>,
}

impl CodeNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        CodeNamespace {
            name: name.into(),
            ..Default::default()
        }
    }

    /// `Namespace.Type`, or the bare type name in the global namespace.
    pub fn qualify(&self, type_name: &str) -> String {
        if self.name.is_empty() {
            type_name.to_string()
        } else {
            format!("{}.{}", self.name, type_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CodeCompileUnit {
    pub namespaces: Vec<CodeNamespace>,
    pub referenced_assemblies: Vec<String>,
}

impl CodeCompileUnit {
    /// Every type declaration with its qualified name.
    pub fn types(&self) -> impl Iterator<Item = (String, &CodeTypeDeclaration)> {
        self.namespaces
            .iter()
            .flat_map(|ns| ns.types.iter().map(move |t| (ns.qualify(&t.name), t)))
    }
}

#[derive(Debug, Clone)]
struct EmittedLine {
    parts: Vec<String>,
    indent: usize,
}

impl EmittedLine {
    fn new(indent: usize) -> Self {
        EmittedLine {
            parts: Vec::new(),
            indent,
        }
    }
}

/// Line buffer with indentation tracking.
pub struct EmitterContext {
    lines: Vec<EmittedLine>,
    indent: usize,
}

impl EmitterContext {
    pub fn new() -> Self {
        EmitterContext {
            lines: vec![EmittedLine::new(0)],
            indent: 0,
        }
    }

    pub fn println(&mut self, part: &str) {
        self.print(part, true);
    }

    pub fn print(&mut self, part: &str, new_line: bool) {
        if !part.is_empty() {
            if let Some(line) = self.lines.last_mut() {
                line.parts.push(part.to_string());
            }
        }
        if new_line {
            self.lines.push(EmittedLine::new(self.indent));
        }
    }

    pub fn line_is_empty(&self) -> bool {
        self.lines.last().map_or(true, |l| l.parts.is_empty())
    }

    pub fn inc_indent(&mut self) {
        self.indent += 1;
        let indent = self.indent;
        if self.line_is_empty() {
            if let Some(line) = self.lines.last_mut() {
                line.indent = indent;
            }
        }
    }

    pub fn dec_indent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        let indent = self.indent;
        if self.line_is_empty() {
            if let Some(line) = self.lines.last_mut() {
                line.indent = indent;
            }
        }
    }

    pub fn to_source(&self) -> String {
        let mut lines: &[EmittedLine] = &self.lines;
        if let Some((last, rest)) = lines.split_last() {
            if last.parts.is_empty() {
                lines = rest;
            }
        }
        lines
            .iter()
            .map(|l| {
                if l.parts.is_empty() {
                    String::new()
                } else {
                    format!("{}{}", INDENT_WITH.repeat(l.indent), l.parts.join(""))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for EmitterContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceSyntax {
    CSharp,
    VisualBasic,
}

impl SourceSyntax {
    pub fn file_extension(&self) -> &'static str {
        match self {
            SourceSyntax::CSharp => "cs",
            SourceSyntax::VisualBasic => "vb",
        }
    }

    pub fn emit(&self, unit: &CodeCompileUnit) -> String {
        let mut ctx = EmitterContext::new();
        match self {
            SourceSyntax::CSharp => CSharpEmitter.emit_unit(unit, &mut ctx),
            SourceSyntax::VisualBasic => VisualBasicEmitter.emit_unit(unit, &mut ctx),
        }
        ctx.to_source()
    }
}

trait Emitter {
    fn emit_unit(&self, unit: &CodeCompileUnit, ctx: &mut EmitterContext);
    fn expression(&self, expr: &CodeExpression) -> String;
    fn statement(&self, stmt: &CodeStatement, ctx: &mut EmitterContext);

    fn statements(&self, stmts: &[CodeStatement], ctx: &mut EmitterContext) {
        for stmt in stmts {
            self.statement(stmt, ctx);
        }
    }

    fn args(&self, args: &[CodeExpression]) -> String {
        args.iter()
            .map(|a| self.expression(a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn snippet(&self, text: &str, ctx: &mut EmitterContext) {
        for line in text.lines() {
            let line = line.trim_end();
            if !line.is_empty() {
                ctx.println(line.trim_start());
            }
        }
    }
}

struct CSharpEmitter;

impl CSharpEmitter {
    fn literal(text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 2);
        out.push('"');
        for ch in text.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            }
        }
        out.push('"');
        out
    }

    fn type_declaration(&self, decl: &CodeTypeDeclaration, ctx: &mut EmitterContext) {
        let partial = if decl.is_partial { "partial " } else { "" };
        let bases = if decl.base_types.is_empty() {
            String::new()
        } else {
            format!(" : {}", decl.base_types.join(", "))
        };
        ctx.println(&format!("public {}class {}{} {{", partial, decl.name, bases));
        ctx.inc_indent();
        for member in &decl.members {
            self.member(member, ctx);
        }
        ctx.dec_indent();
        ctx.println("}");
    }

    fn member(&self, member: &CodeMember, ctx: &mut EmitterContext) {
        match &member.kind {
            CodeMemberKind::Field { type_name } => {
                ctx.println(&format!("protected {} {};", type_name, member.name));
            }
            CodeMemberKind::Method {
                return_type,
                parameters,
                statements,
            } => {
                let params = parameters
                    .iter()
                    .map(|(name, ty)| format!("{} {}", ty, name))
                    .collect::<Vec<_>>()
                    .join(", ");
                ctx.println(&format!(
                    "public {} {}({}) {{",
                    return_type.as_deref().unwrap_or("void"),
                    member.name,
                    params
                ));
                ctx.inc_indent();
                self.statements(statements, ctx);
                ctx.dec_indent();
                ctx.println("}");
            }
            CodeMemberKind::Property { type_name, getter } => {
                ctx.println(&format!("public {} {} {{", type_name, member.name));
                ctx.inc_indent();
                ctx.println("get {");
                ctx.inc_indent();
                self.statements(getter, ctx);
                ctx.dec_indent();
                ctx.println("}");
                ctx.dec_indent();
                ctx.println("}");
            }
            CodeMemberKind::Snippet { text } => self.snippet(text, ctx),
        }
    }
}

impl Emitter for CSharpEmitter {
    fn emit_unit(&self, unit: &CodeCompileUnit, ctx: &mut EmitterContext) {
        for ns in &unit.namespaces {
            let named = !ns.name.is_empty();
            if named {
                ctx.println(&format!("namespace {} {{", ns.name));
                ctx.inc_indent();
            }
            for import in &ns.imports {
                ctx.println(&format!("using {};", import));
            }
            for decl in &ns.types {
                ctx.println("");
                self.type_declaration(decl, ctx);
            }
            if named {
                ctx.dec_indent();
                ctx.println("}");
            }
        }
    }

    fn expression(&self, expr: &CodeExpression) -> String {
        match expr {
            CodeExpression::This => "this".to_string(),
            CodeExpression::Base => "base".to_string(),
            CodeExpression::Variable(name) => name.clone(),
            CodeExpression::Field(target, name) => format!("{}.{}", self.expression(target), name),
            CodeExpression::Index(target, index) => format!("{}[{}]", self.expression(target), index),
            CodeExpression::New(type_name, args) => format!("new {}({})", type_name, self.args(args)),
            CodeExpression::Delegate { type_name, method } => {
                format!("new {}(this.{})", type_name, method)
            }
            CodeExpression::StringLiteral(text) => CSharpEmitter::literal(text),
            CodeExpression::Invoke { target, method, args } => {
                format!("{}.{}({})", self.expression(target), method, self.args(args))
            }
            CodeExpression::Snippet(code) => code.trim().to_string(),
        }
    }

    fn statement(&self, stmt: &CodeStatement, ctx: &mut EmitterContext) {
        match stmt {
            CodeStatement::Assign { target, value } => ctx.println(&format!(
                "{} = {};",
                self.expression(target),
                self.expression(value)
            )),
            CodeStatement::Expression(expr) => ctx.println(&format!("{};", self.expression(expr))),
            CodeStatement::Return(expr) => ctx.println(&format!("return {};", self.expression(expr))),
            CodeStatement::Declare {
                name,
                type_name,
                value,
            } => ctx.println(&format!("{} {} = {};", type_name, name, self.expression(value))),
            CodeStatement::Snippet(code) => self.snippet(code, ctx),
            CodeStatement::LinePragma {
                file,
                line,
                statements,
            } => {
                ctx.println(&format!("#line {} {}", line, CSharpEmitter::literal(file)));
                self.statements(statements, ctx);
                ctx.println("#line default");
            }
        }
    }
}

struct VisualBasicEmitter;

impl VisualBasicEmitter {
    fn literal(text: &str) -> String {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars().peekable();
        let flush = |current: &mut String, parts: &mut Vec<String>| {
            if !current.is_empty() {
                parts.push(format!("\"{}\"", current.replace('"', "\"\"")));
                current.clear();
            }
        };
        while let Some(ch) = chars.next() {
            match ch {
                '\r' if chars.peek() == Some(&'\n') => {
                    chars.next();
                    flush(&mut current, &mut parts);
                    parts.push("vbCrLf".to_string());
                }
                '\r' => {
                    flush(&mut current, &mut parts);
                    parts.push("vbCr".to_string());
                }
                '\n' => {
                    flush(&mut current, &mut parts);
                    parts.push("vbLf".to_string());
                }
                '\t' => {
                    flush(&mut current, &mut parts);
                    parts.push("vbTab".to_string());
                }
                _ => current.push(ch),
            }
        }
        flush(&mut current, &mut parts);
        if parts.is_empty() {
            return "\"\"".to_string();
        }
        parts.join(" & ")
    }

    fn type_declaration(&self, decl: &CodeTypeDeclaration, ctx: &mut EmitterContext) {
        let partial = if decl.is_partial { "Partial " } else { "" };
        ctx.println(&format!("{}Public Class {}", partial, decl.name));
        ctx.inc_indent();
        let mut bases = decl.base_types.iter();
        if let Some(base) = bases.next() {
            ctx.println(&format!("Inherits {}", base));
        }
        for interface in bases {
            ctx.println(&format!("Implements {}", interface));
        }
        for member in &decl.members {
            self.member(member, ctx);
        }
        ctx.dec_indent();
        ctx.println("End Class");
    }

    fn member(&self, member: &CodeMember, ctx: &mut EmitterContext) {
        match &member.kind {
            CodeMemberKind::Field { type_name } => {
                ctx.println(&format!("Protected {} As {}", member.name, type_name));
            }
            CodeMemberKind::Method {
                return_type,
                parameters,
                statements,
            } => {
                let params = parameters
                    .iter()
                    .map(|(name, ty)| format!("ByVal {} As {}", name, ty))
                    .collect::<Vec<_>>()
                    .join(", ");
                let (keyword, suffix) = match return_type {
                    Some(ty) => ("Function", format!(" As {}", ty)),
                    None => ("Sub", String::new()),
                };
                ctx.println(&format!("Public {} {}({}){}", keyword, member.name, params, suffix));
                ctx.inc_indent();
                self.statements(statements, ctx);
                ctx.dec_indent();
                ctx.println(&format!("End {}", keyword));
            }
            CodeMemberKind::Property { type_name, getter } => {
                ctx.println(&format!("Public ReadOnly Property {} As {}", member.name, type_name));
                ctx.inc_indent();
                ctx.println("Get");
                ctx.inc_indent();
                self.statements(getter, ctx);
                ctx.dec_indent();
                ctx.println("End Get");
                ctx.dec_indent();
                ctx.println("End Property");
            }
            CodeMemberKind::Snippet { text } => self.snippet(text, ctx),
        }
    }
}

impl Emitter for VisualBasicEmitter {
    fn emit_unit(&self, unit: &CodeCompileUnit, ctx: &mut EmitterContext) {
        for ns in &unit.namespaces {
            for import in &ns.imports {
                ctx.println(&format!("Imports {}", import));
            }
        }
        for ns in &unit.namespaces {
            let named = !ns.name.is_empty();
            if named {
                ctx.println(&format!("Namespace {}", ns.name));
                ctx.inc_indent();
            }
            for decl in &ns.types {
                ctx.println("");
                self.type_declaration(decl, ctx);
            }
            if named {
                ctx.dec_indent();
                ctx.println("End Namespace");
            }
        }
    }

    fn expression(&self, expr: &CodeExpression) -> String {
        match expr {
            CodeExpression::This => "Me".to_string(),
            CodeExpression::Base => "MyBase".to_string(),
            CodeExpression::Variable(name) => name.clone(),
            CodeExpression::Field(target, name) => format!("{}.{}", self.expression(target), name),
            CodeExpression::Index(target, index) => format!("{}({})", self.expression(target), index),
            CodeExpression::New(type_name, args) => format!("New {}({})", type_name, self.args(args)),
            CodeExpression::Delegate { type_name, method } => {
                format!("New {}(AddressOf Me.{})", type_name, method)
            }
            CodeExpression::StringLiteral(text) => VisualBasicEmitter::literal(text),
            CodeExpression::Invoke { target, method, args } => {
                format!("{}.{}({})", self.expression(target), method, self.args(args))
            }
            CodeExpression::Snippet(code) => code.trim().to_string(),
        }
    }

    fn statement(&self, stmt: &CodeStatement, ctx: &mut EmitterContext) {
        match stmt {
            CodeStatement::Assign { target, value } => ctx.println(&format!(
                "{} = {}",
                self.expression(target),
                self.expression(value)
            )),
            CodeStatement::Expression(expr) => ctx.println(&self.expression(expr)),
            CodeStatement::Return(expr) => ctx.println(&format!("Return {}", self.expression(expr))),
            CodeStatement::Declare {
                name,
                type_name,
                value,
            } => ctx.println(&format!(
                "Dim {} As {} = {}",
                name,
                type_name,
                self.expression(value)
            )),
            CodeStatement::Snippet(code) => self.snippet(code, ctx),
            CodeStatement::LinePragma {
                file,
                line,
                statements,
            } => {
                ctx.println(&format!("#ExternalSource({}, {})", VisualBasicEmitter::literal(file), line));
                self.statements(statements, ctx);
                ctx.println("#End ExternalSource");
            }
        }
    }
}
