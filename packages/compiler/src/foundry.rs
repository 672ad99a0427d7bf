//! Component registry
//!
//! Maps markup tag names to component descriptors. The registry is filled
//! at startup by explicit registration calls; a [`Foundry`] layers the
//! tag prefixes and user controls a single file declares through
//! `<%@ Register %>` on top of it.

use std::sync::Arc;

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::vpath::VirtualPath;

bitflags! {
    /// How a component treats its markup body.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ComponentFlags: u32 {
        const NONE = 0;
        /// Starts a new scope for control IDs.
        const NAMING_CONTAINER = 1 << 0;
        /// Non self-closing tags are pushed and need a matching close tag.
        const HAS_BODY = 1 << 1;
        /// Child tags are property tags, not child controls.
        const CHILDREN_AS_PROPERTIES = 1 << 2;
        const HTML_FORM = 1 << 3;
        const HTML_TABLE = 1 << 4;
        const OBJECT_TAG = 1 << 5;
        /// Literal body text becomes the component's inner text.
        const INNER_TEXT = 1 << 6;
        const USER_CONTROL = 1 << 7;
        const HTML_CONTROL = 1 << 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum PropertyKind {
    /// Body is a control subtree instantiated per item.
    Template,
    /// Body is a list of item components, resolved without `runat`.
    Collection,
    /// Body is literal text.
    Inner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    /// Fully qualified type the generated code instantiates.
    pub type_name: String,
    pub flags: ComponentFlags,
    /// Property tags, keyed by lower-cased name.
    pub properties: IndexMap<String, PropertyDescriptor>,
    /// Collection receiving child tags that are not property tags.
    pub default_property: Option<String>,
    /// Attributes accepted on the tag; `None` accepts anything.
    pub allowed_attributes: Option<Vec<String>>,
    /// Source of a user control.
    pub source: Option<VirtualPath>,
}

impl ComponentDescriptor {
    pub fn new(type_name: impl Into<String>, flags: ComponentFlags) -> Self {
        ComponentDescriptor {
            type_name: type_name.into(),
            flags,
            properties: IndexMap::new(),
            default_property: None,
            allowed_attributes: None,
            source: None,
        }
    }

    pub fn with_property(mut self, name: &str, kind: PropertyKind) -> Self {
        self.properties.insert(
            name.to_ascii_lowercase(),
            PropertyDescriptor {
                name: name.to_string(),
                kind,
            },
        );
        self
    }

    pub fn with_default_property(mut self, name: &str) -> Self {
        self.default_property = Some(name.to_string());
        self.with_property(name, PropertyKind::Collection)
    }

    pub fn with_allowed_attributes(mut self, names: &[&str]) -> Self {
        self.allowed_attributes = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(&name.to_ascii_lowercase())
    }

    pub fn is(&self, flag: ComponentFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Whether `attribute` may appear on the tag. `runat` and `id` always may.
    pub fn accepts_attribute(&self, attribute: &str) -> bool {
        if attribute.eq_ignore_ascii_case("runat") || attribute.eq_ignore_ascii_case("id") {
            return true;
        }
        match &self.allowed_attributes {
            Some(allowed) => allowed.iter().any(|a| a.eq_ignore_ascii_case(attribute)),
            None => true,
        }
    }

    /// Short type name, used in generated identifiers and messages.
    pub fn short_name(&self) -> &str {
        self.type_name.rsplit('.').next().unwrap_or(&self.type_name)
    }
}

pub const WEB_CONTROLS: &str = "System.Web.UI.WebControls";
pub const HTML_CONTROLS: &str = "System.Web.UI.HtmlControls";

/// Process wide table of known components.
pub struct ComponentRegistry {
    namespaces: IndexMap<String, IndexMap<String, Arc<ComponentDescriptor>>>,
    prefixes: IndexMap<String, Vec<String>>,
    html_controls: IndexMap<String, Arc<ComponentDescriptor>>,
    html_generic: Arc<ComponentDescriptor>,
    object_tag: Arc<ComponentDescriptor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry {
            namespaces: IndexMap::new(),
            prefixes: IndexMap::new(),
            html_controls: IndexMap::new(),
            html_generic: Arc::new(ComponentDescriptor::new(
                format!("{}.HtmlGenericControl", HTML_CONTROLS),
                ComponentFlags::HAS_BODY | ComponentFlags::HTML_CONTROL,
            )),
            object_tag: Arc::new(ComponentDescriptor::new(
                "System.Web.UI.ObjectTag",
                ComponentFlags::OBJECT_TAG,
            )),
        }
    }

    /// Registry with the standard web controls under `asp:` and the HTML
    /// controls used for unprefixed `runat="server"` tags.
    pub fn with_builtins() -> Self {
        use ComponentFlags as F;
        use PropertyKind::{Collection, Template};

        let mut registry = ComponentRegistry::new();
        registry.register_prefix("asp", WEB_CONTROLS);

        let web = |name: &str, flags: ComponentFlags| {
            ComponentDescriptor::new(format!("{}.{}", WEB_CONTROLS, name), flags)
        };
        let simple = [
            "Button",
            "Label",
            "TextBox",
            "HyperLink",
            "Image",
            "Panel",
            "PlaceHolder",
            "ScriptManager",
            "Content",
            "ContentPlaceHolder",
        ];
        for name in simple {
            registry.register(WEB_CONTROLS, name, web(name, F::HAS_BODY));
        }
        registry.register(WEB_CONTROLS, "Literal", web("Literal", F::HAS_BODY | F::INNER_TEXT));
        registry.register(WEB_CONTROLS, "ListItem", web("ListItem", F::HAS_BODY | F::INNER_TEXT));
        registry.register(WEB_CONTROLS, "BoundField", web("BoundField", F::HAS_BODY));
        registry.register(
            WEB_CONTROLS,
            "TemplateField",
            web("TemplateField", F::HAS_BODY | F::CHILDREN_AS_PROPERTIES)
                .with_property("ItemTemplate", Template)
                .with_property("HeaderTemplate", Template),
        );

        let repeater_like = |name: &str| {
            let mut descriptor = web(
                name,
                F::HAS_BODY | F::NAMING_CONTAINER | F::CHILDREN_AS_PROPERTIES,
            );
            for template in [
                "HeaderTemplate",
                "ItemTemplate",
                "AlternatingItemTemplate",
                "SeparatorTemplate",
                "FooterTemplate",
            ] {
                descriptor = descriptor.with_property(template, Template);
            }
            descriptor
        };
        registry.register(WEB_CONTROLS, "Repeater", repeater_like("Repeater"));
        registry.register(
            WEB_CONTROLS,
            "DataList",
            repeater_like("DataList").with_property("SelectedItemTemplate", Template),
        );
        registry.register(
            WEB_CONTROLS,
            "GridView",
            web("GridView", F::HAS_BODY | F::NAMING_CONTAINER | F::CHILDREN_AS_PROPERTIES)
                .with_property("Columns", Collection)
                .with_property("EmptyDataTemplate", Template),
        );
        registry.register(
            WEB_CONTROLS,
            "DropDownList",
            web("DropDownList", F::HAS_BODY | F::CHILDREN_AS_PROPERTIES)
                .with_default_property("Items"),
        );
        registry.register(
            WEB_CONTROLS,
            "Table",
            web("Table", F::HAS_BODY | F::CHILDREN_AS_PROPERTIES).with_default_property("Rows"),
        );
        registry.register(
            WEB_CONTROLS,
            "TableRow",
            web("TableRow", F::HAS_BODY | F::CHILDREN_AS_PROPERTIES)
                .with_default_property("Cells"),
        );
        registry.register(WEB_CONTROLS, "TableCell", web("TableCell", F::HAS_BODY));
        registry.register(
            WEB_CONTROLS,
            "Login",
            web("Login", F::HAS_BODY | F::NAMING_CONTAINER | F::CHILDREN_AS_PROPERTIES)
                .with_property("LayoutTemplate", Template),
        );

        let html = |name: &str, flags: ComponentFlags| {
            ComponentDescriptor::new(format!("{}.{}", HTML_CONTROLS, name), flags | F::HTML_CONTROL)
        };
        registry.register_html("form", html("HtmlForm", F::HAS_BODY | F::HTML_FORM));
        registry.register_html("table", html("HtmlTable", F::HAS_BODY | F::HTML_TABLE));
        registry.register_html("tr", html("HtmlTableRow", F::HAS_BODY));
        registry.register_html("td", html("HtmlTableCell", F::HAS_BODY));
        registry.register_html("input", html("HtmlInputControl", F::NONE));
        registry.register_html("img", html("HtmlImage", F::NONE));
        registry.register_html("a", html("HtmlAnchor", F::HAS_BODY));
        registry.register_html("head", html("HtmlHead", F::HAS_BODY));
        registry.register_html("title", html("HtmlTitle", F::HAS_BODY | F::INNER_TEXT));
        registry
    }

    pub fn register(&mut self, namespace: &str, tag_name: &str, descriptor: ComponentDescriptor) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(tag_name.to_ascii_lowercase(), Arc::new(descriptor));
    }

    pub fn register_prefix(&mut self, prefix: &str, namespace: &str) {
        let namespaces = self.prefixes.entry(prefix.to_ascii_lowercase()).or_default();
        if !namespaces.iter().any(|n| n == namespace) {
            namespaces.push(namespace.to_string());
        }
    }

    pub fn register_html(&mut self, tag_name: &str, descriptor: ComponentDescriptor) {
        self.html_controls
            .insert(tag_name.to_ascii_lowercase(), Arc::new(descriptor));
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    pub fn lookup_in_namespace(&self, namespace: &str, tag_name: &str) -> Option<Arc<ComponentDescriptor>> {
        self.namespaces
            .get(namespace)?
            .get(&tag_name.to_ascii_lowercase())
            .cloned()
    }

    pub fn prefix_namespaces(&self, prefix: &str) -> &[String] {
        self.prefixes
            .get(&prefix.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Descriptor for an unprefixed server tag.
    pub fn html_control(&self, tag_name: &str) -> Arc<ComponentDescriptor> {
        if tag_name.eq_ignore_ascii_case("object") {
            return self.object_tag.clone();
        }
        self.html_controls
            .get(&tag_name.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| self.html_generic.clone())
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Per-file view of the registry.
pub struct Foundry {
    registry: Arc<ComponentRegistry>,
    prefixes: IndexMap<String, Vec<String>>,
    user_controls: IndexMap<String, Arc<ComponentDescriptor>>,
}

impl Foundry {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Foundry {
            registry,
            prefixes: IndexMap::new(),
            user_controls: IndexMap::new(),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn register_namespace(&mut self, prefix: &str, namespace: &str) {
        let namespaces = self.prefixes.entry(prefix.to_ascii_lowercase()).or_default();
        if !namespaces.iter().any(|n| n == namespace) {
            namespaces.push(namespace.to_string());
        }
    }

    pub fn register_user_control(&mut self, prefix: &str, tag_name: &str, source: VirtualPath) {
        let key = format!("{}:{}", prefix, tag_name).to_ascii_lowercase();
        let mut descriptor = ComponentDescriptor::new(
            generated_type_name(&source),
            ComponentFlags::NAMING_CONTAINER | ComponentFlags::HAS_BODY | ComponentFlags::USER_CONTROL,
        );
        descriptor.source = Some(source);
        self.user_controls.insert(key, Arc::new(descriptor));
    }

    /// Resolve a server tag. The error is the message to report.
    pub fn lookup(&self, tag_name: &str) -> Result<Arc<ComponentDescriptor>, String> {
        let (prefix, name) = match tag_name.split_once(':') {
            Some(parts) => parts,
            None => return Ok(self.registry.html_control(tag_name)),
        };

        if let Some(descriptor) = self.user_controls.get(&tag_name.to_ascii_lowercase()) {
            return Ok(descriptor.clone());
        }

        let local = self
            .prefixes
            .get(&prefix.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        local
            .iter()
            .chain(self.registry.prefix_namespaces(prefix))
            .find_map(|namespace| self.registry.lookup_in_namespace(namespace, name))
            .ok_or_else(|| format!("Unknown server tag '{}'.", tag_name))
    }
}

/// Name of the class generated for the file at `path`: `ASP.<dir_file_ext>`.
pub fn generated_type_name(path: &VirtualPath) -> String {
    format!("ASP.{}", mangle_path(path))
}

/// Turn a virtual path into an identifier, e.g. `/sub/default.aspx` to
/// `sub_default_aspx`.
pub fn mangle_path(path: &VirtualPath) -> String {
    let joined = path.segments().collect::<Vec<_>>().join("_");
    let mut mangled: String = joined
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if mangled.is_empty() || mangled.starts_with(|c: char| c.is_ascii_digit()) {
        mangled.insert(0, '_');
    }
    mangled
}
