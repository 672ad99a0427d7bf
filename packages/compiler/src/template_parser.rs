//! Parse unit
//!
//! Per-file compilation state gathered while a markup file is parsed:
//! directives, tag registrations, dependencies, server scripts and the
//! filter hook consulted for code and controls.

use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::foundry::{ComponentDescriptor, ComponentRegistry, Foundry};
use crate::ml_parser::TagAttributes;
use crate::parse_util::{Location, ParseError, ParseResult};
use crate::vpath::VirtualPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Page,
    UserControl,
    Master,
    Application,
}

impl UnitKind {
    pub fn from_extension(extension: &str) -> Option<UnitKind> {
        match extension.to_ascii_lowercase().as_str() {
            ".aspx" => Some(UnitKind::Page),
            ".ascx" => Some(UnitKind::UserControl),
            ".master" => Some(UnitKind::Master),
            ".asax" => Some(UnitKind::Application),
            _ => None,
        }
    }

    /// Directive used when `<%@ %>` names none.
    pub fn main_directive(&self) -> &'static str {
        match self {
            UnitKind::Page => "Page",
            UnitKind::UserControl => "Control",
            UnitKind::Master => "Master",
            UnitKind::Application => "Application",
        }
    }

    pub fn default_base_type(&self) -> &'static str {
        match self {
            UnitKind::Page => "System.Web.UI.Page",
            UnitKind::UserControl => "System.Web.UI.UserControl",
            UnitKind::Master => "System.Web.UI.MasterPage",
            UnitKind::Application => "System.Web.HttpApplication",
        }
    }

    fn allows_directive(&self, name: &str) -> bool {
        const PAGE_DIRECTIVES: &[&str] = &[
            "Import",
            "Register",
            "Assembly",
            "Reference",
            "Implements",
            "OutputCache",
            "MasterType",
            "PreviousPageType",
        ];
        const APPLICATION_DIRECTIVES: &[&str] = &["Import", "Assembly"];

        if name.eq_ignore_ascii_case(self.main_directive()) {
            return true;
        }
        let allowed = match self {
            UnitKind::Application => APPLICATION_DIRECTIVES,
            _ => PAGE_DIRECTIVES,
        };
        allowed.iter().any(|d| d.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CodeConstructKind {
    CodeSnippet,
    ExpressionSnippet,
    EncodedExpressionSnippet,
    DataBinding,
    ScriptTag,
}

/// Hook consulted while a file is parsed.
pub trait PageParserFilter: Send + Sync {
    /// False turns every code block into an error.
    fn allow_code(&self) -> bool {
        true
    }

    /// False drops the construct without an error.
    fn process_code_construct(&self, _kind: CodeConstructKind, _code: &str) -> bool {
        true
    }

    fn allow_control(&self, _descriptor: &ComponentDescriptor) -> bool {
        true
    }

    fn allow_server_side_include(&self, _path: &VirtualPath) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSideScript {
    pub code: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveRecord {
    pub name: String,
    pub attributes: TagAttributes,
    pub location: Location,
}

pub struct TemplateParser {
    pub virtual_path: VirtualPath,
    pub kind: UnitKind,
    language: Option<String>,
    language_explicit: bool,
    pub base_type: Option<String>,
    pub code_file: Option<VirtualPath>,
    pub class_name: Option<String>,
    pub master_page_file: Option<VirtualPath>,
    pub imports: Vec<String>,
    pub assemblies: Vec<String>,
    pub interfaces: Vec<String>,
    pub directives: Vec<DirectiveRecord>,
    pub scripts: Vec<ServerSideScript>,
    pub checksum: Option<String>,
    dependencies: IndexSet<VirtualPath>,
    main_directive_seen: bool,
    foundry: Foundry,
    filter: Option<Arc<dyn PageParserFilter>>,
}

impl TemplateParser {
    pub fn new(virtual_path: VirtualPath, kind: UnitKind, registry: Arc<ComponentRegistry>) -> Self {
        TemplateParser {
            virtual_path,
            kind,
            language: None,
            language_explicit: false,
            base_type: None,
            code_file: None,
            class_name: None,
            master_page_file: None,
            imports: Vec::new(),
            assemblies: Vec::new(),
            interfaces: Vec::new(),
            directives: Vec::new(),
            scripts: Vec::new(),
            checksum: None,
            dependencies: IndexSet::new(),
            main_directive_seen: false,
            foundry: Foundry::new(registry),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn PageParserFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filter(&self) -> Option<&Arc<dyn PageParserFilter>> {
        self.filter.as_ref()
    }

    pub fn foundry(&self) -> &Foundry {
        &self.foundry
    }

    pub fn is_application(&self) -> bool {
        self.kind == UnitKind::Application
    }

    /// Language declared by the unit, if any.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Language taken from a `<script runat="server">` tag. Only applies
    /// while no directive named one.
    pub fn set_implicit_language(&mut self, language: &str) {
        if !self.language_explicit {
            self.language = Some(language.to_string());
        }
    }

    pub fn add_dependency(&mut self, path: VirtualPath) {
        if path != self.virtual_path {
            self.dependencies.insert(path);
        }
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &VirtualPath> {
        self.dependencies.iter()
    }

    /// Resolve a path written in this unit (`~/`, absolute or relative to
    /// the unit's directory).
    pub fn resolve_path(&self, location: &Location, path: &str) -> ParseResult<VirtualPath> {
        self.virtual_path
            .combine_with_directory(path)
            .ok_or_else(|| {
                ParseError::include(
                    location.clone(),
                    "Cannot use a leading .. to exit above the top directory.",
                )
            })
    }

    pub fn add_directive(
        &mut self,
        name: &str,
        attributes: &TagAttributes,
        location: &Location,
    ) -> ParseResult<()> {
        if !self.kind.allows_directive(name) {
            return Err(ParseError::directive(
                location.clone(),
                format!("The directive '{}' is not allowed in this file.", name),
            ));
        }
        self.directives.push(DirectiveRecord {
            name: name.to_string(),
            attributes: attributes.clone(),
            location: location.clone(),
        });

        let missing = |attribute: &str| {
            ParseError::directive(
                location.clone(),
                format!("The directive '{}' is missing a '{}' attribute.", name, attribute),
            )
        };

        match name.to_ascii_lowercase().as_str() {
            "import" => {
                let namespace = attributes.get("namespace").ok_or_else(|| missing("namespace"))?;
                if !self.imports.iter().any(|i| i == namespace) {
                    self.imports.push(namespace.to_string());
                }
            }
            "register" => self.process_register(attributes, location, &missing)?,
            "assembly" => {
                if let Some(src) = attributes.get("src") {
                    let path = self.resolve_path(location, src)?;
                    self.add_dependency(path);
                } else {
                    let assembly = attributes.get("name").ok_or_else(|| missing("name"))?;
                    self.assemblies.push(assembly.to_string());
                }
            }
            "reference" => {
                let target = attributes
                    .get("virtualpath")
                    .or_else(|| attributes.get("page"))
                    .or_else(|| attributes.get("control"))
                    .ok_or_else(|| missing("VirtualPath"))?;
                let path = self.resolve_path(location, target)?;
                self.add_dependency(path);
            }
            "implements" => {
                let interface = attributes.get("interface").ok_or_else(|| missing("interface"))?;
                self.interfaces.push(interface.to_string());
            }
            "mastertype" | "previouspagetype" => {
                if let Some(target) = attributes.get("virtualpath") {
                    let path = self.resolve_path(location, target)?;
                    self.add_dependency(path);
                }
            }
            "outputcache" => {}
            _ => self.process_main_directive(name, attributes, location)?,
        }
        Ok(())
    }

    fn process_register(
        &mut self,
        attributes: &TagAttributes,
        location: &Location,
        missing: &dyn Fn(&str) -> ParseError,
    ) -> ParseResult<()> {
        let prefix = attributes.get("tagprefix").ok_or_else(|| missing("TagPrefix"))?;
        if prefix.is_empty() {
            return Err(missing("TagPrefix"));
        }
        if let Some(namespace) = attributes.get("namespace") {
            self.foundry.register_namespace(prefix, namespace);
            if let Some(assembly) = attributes.get("assembly") {
                if !self.assemblies.iter().any(|a| a == assembly) {
                    self.assemblies.push(assembly.to_string());
                }
            }
            return Ok(());
        }
        match (attributes.get("tagname"), attributes.get("src")) {
            (Some(tag_name), Some(src)) => {
                let source = self.resolve_path(location, src)?;
                self.foundry.register_user_control(prefix, tag_name, source.clone());
                self.add_dependency(source);
                Ok(())
            }
            (None, _) => Err(missing("TagName")),
            (_, None) => Err(missing("Src")),
        }
    }

    fn process_main_directive(
        &mut self,
        name: &str,
        attributes: &TagAttributes,
        location: &Location,
    ) -> ParseResult<()> {
        if self.main_directive_seen {
            return Err(ParseError::directive(
                location.clone(),
                format!("Only one '{}' directive is allowed.", name),
            ));
        }
        self.main_directive_seen = true;

        if let Some(language) = attributes.get("language") {
            self.language = Some(language.to_string());
            self.language_explicit = true;
        }
        if let Some(inherits) = attributes.get("inherits") {
            self.base_type = Some(inherits.to_string());
        }
        if let Some(class_name) = attributes.get("classname") {
            self.class_name = Some(class_name.to_string());
        }
        let code_file = attributes
            .get("codefile")
            .or_else(|| attributes.get("src"))
            .or_else(|| attributes.get("codebehind"));
        if let Some(code_file) = code_file {
            let path = self.resolve_path(location, code_file)?;
            self.code_file = Some(path.clone());
            self.add_dependency(path);
        }
        if let Some(master) = attributes.get("masterpagefile") {
            if self.kind == UnitKind::Application || self.kind == UnitKind::UserControl {
                return Err(ParseError::directive(
                    location.clone(),
                    "MasterPageFile is only allowed on pages and master pages.",
                ));
            }
            let path = self.resolve_path(location, master)?;
            self.master_page_file = Some(path.clone());
            self.add_dependency(path);
        }
        Ok(())
    }

    pub fn add_script(&mut self, code: String, location: Location) {
        self.scripts.push(ServerSideScript { code, location });
    }
}
