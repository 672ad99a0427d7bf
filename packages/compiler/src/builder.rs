//! Control tree
//!
//! Builder nodes live in an arena owned by [`ControlTree`] and refer to each
//! other by [`BuilderId`]. Nodes are attached to their parent when their tag
//! opens and are never removed.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::foundry::{ComponentDescriptor, ComponentFlags, PropertyKind};
use crate::ml_parser::TagAttributes;
use crate::parse_util::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BuilderId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CodeRenderMode {
    /// `<% statements %>`
    Statement,
    /// `<%= expression %>`
    Expression,
    /// `<%: expression %>`, HTML encoded on output.
    Encode,
}

#[derive(Debug, Clone)]
pub enum BuilderKind {
    Root,
    Control(Arc<ComponentDescriptor>),
    Property { name: String, kind: PropertyKind },
    CodeRender { code: String, mode: CodeRenderMode },
    DataBinding { code: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderChild {
    Literal(String),
    Builder(BuilderId),
}

#[derive(Debug, Clone)]
pub struct BuilderNode {
    pub kind: BuilderKind,
    pub tag_name: String,
    /// Value of the `ID` attribute.
    pub control_id: Option<String>,
    pub attributes: TagAttributes,
    pub parent: Option<BuilderId>,
    pub children: Vec<BuilderChild>,
    pub location: Option<Location>,
    /// Set by the code generator's naming pass.
    pub method_name: Option<String>,
    pub inner_text: Option<String>,
}

impl BuilderNode {
    pub fn descriptor(&self) -> Option<&Arc<ComponentDescriptor>> {
        match &self.kind {
            BuilderKind::Control(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    pub fn has_flag(&self, flag: ComponentFlags) -> bool {
        self.descriptor().map_or(false, |d| d.is(flag))
    }

    /// The root, naming-container controls and templates each start a new
    /// scope for control IDs.
    pub fn is_naming_container(&self) -> bool {
        match &self.kind {
            BuilderKind::Root => true,
            BuilderKind::Control(d) => d.is(ComponentFlags::NAMING_CONTAINER),
            BuilderKind::Property { kind, .. } => *kind == PropertyKind::Template,
            _ => false,
        }
    }

    /// Whether child tags must be property tags (or default collection items).
    pub fn children_as_properties(&self) -> bool {
        match &self.kind {
            BuilderKind::Control(d) => d.is(ComponentFlags::CHILDREN_AS_PROPERTIES),
            BuilderKind::Property { kind, .. } => *kind == PropertyKind::Collection,
            _ => false,
        }
    }

    /// Whether literal body text is kept as inner text instead of children.
    pub fn collects_inner_text(&self) -> bool {
        match &self.kind {
            BuilderKind::Control(d) => d.is(ComponentFlags::INNER_TEXT),
            BuilderKind::Property { kind, .. } => *kind == PropertyKind::Inner,
            _ => false,
        }
    }

    pub fn type_name(&self) -> &str {
        match &self.kind {
            BuilderKind::Root => "Root",
            BuilderKind::Control(d) => &d.type_name,
            BuilderKind::Property { name, .. } => name,
            BuilderKind::CodeRender { .. } => "CodeRender",
            BuilderKind::DataBinding { .. } => "DataBinding",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlTree {
    nodes: Vec<BuilderNode>,
}

impl ControlTree {
    pub fn new() -> Self {
        ControlTree {
            nodes: vec![BuilderNode {
                kind: BuilderKind::Root,
                tag_name: String::new(),
                control_id: None,
                attributes: TagAttributes::new(),
                parent: None,
                children: Vec::new(),
                location: None,
                method_name: None,
                inner_text: None,
            }],
        }
    }

    pub fn root(&self) -> BuilderId {
        BuilderId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: BuilderId) -> &BuilderNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: BuilderId) -> &mut BuilderNode {
        &mut self.nodes[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = BuilderId> {
        (0..self.nodes.len()).map(BuilderId)
    }

    /// Create a node and attach it as the last child of `parent`.
    pub fn add(
        &mut self,
        parent: BuilderId,
        kind: BuilderKind,
        tag_name: &str,
        attributes: TagAttributes,
        location: Option<Location>,
    ) -> BuilderId {
        let id = BuilderId(self.nodes.len());
        let control_id = attributes.get("id").map(str::to_string);
        self.nodes.push(BuilderNode {
            kind,
            tag_name: tag_name.to_string(),
            control_id,
            attributes,
            parent: Some(parent),
            children: Vec::new(),
            location,
            method_name: None,
            inner_text: None,
        });
        self.nodes[parent.0].children.push(BuilderChild::Builder(id));
        id
    }

    /// Append literal text to `parent`, merging with a preceding literal.
    pub fn append_literal(&mut self, parent: BuilderId, text: &str) {
        if text.is_empty() {
            return;
        }
        let children = &mut self.nodes[parent.0].children;
        match children.last_mut() {
            Some(BuilderChild::Literal(last)) => last.push_str(text),
            _ => children.push(BuilderChild::Literal(text.to_string())),
        }
    }

    pub fn append_inner_text(&mut self, id: BuilderId, text: &str) {
        self.nodes[id.0]
            .inner_text
            .get_or_insert_with(String::new)
            .push_str(text);
    }

    pub fn children(&self, id: BuilderId) -> &[BuilderChild] {
        &self.nodes[id.0].children
    }

    pub fn child_builders(&self, id: BuilderId) -> impl Iterator<Item = BuilderId> + '_ {
        self.children(id).iter().filter_map(|child| match child {
            BuilderChild::Builder(b) => Some(*b),
            BuilderChild::Literal(_) => None,
        })
    }

    /// Concatenated literal children of `id`, in order.
    pub fn literal_text(&self, id: BuilderId) -> String {
        self.children(id)
            .iter()
            .filter_map(|child| match child {
                BuilderChild::Literal(text) => Some(text.as_str()),
                BuilderChild::Builder(_) => None,
            })
            .collect()
    }

    /// Nodes below `id` in document order, `id` excluded.
    pub fn descendants(&self, id: BuilderId) -> Vec<BuilderId> {
        let mut out = Vec::new();
        let mut stack: Vec<BuilderId> = self.child_builders(id).collect();
        stack.reverse();
        while let Some(next) = stack.pop() {
            out.push(next);
            let mut children: Vec<BuilderId> = self.child_builders(next).collect();
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Every node with an ID, in document order.
    pub fn controls_with_ids(&self) -> Vec<BuilderId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|id| self.node(*id).control_id.is_some())
            .collect()
    }

    pub fn to_json(&self) -> Value {
        self.node_json(self.root())
    }

    fn node_json(&self, id: BuilderId) -> Value {
        let node = self.node(id);
        let children: Vec<Value> = node
            .children
            .iter()
            .map(|child| match child {
                BuilderChild::Literal(text) => json!({ "literal": text }),
                BuilderChild::Builder(b) => self.node_json(*b),
            })
            .collect();
        let mut value = match &node.kind {
            BuilderKind::Root => json!({ "kind": "root" }),
            BuilderKind::Control(d) => json!({
                "kind": "control",
                "tag": node.tag_name,
                "type": d.type_name,
                "attributes": node.attributes,
            }),
            BuilderKind::Property { name, kind } => json!({
                "kind": "property",
                "name": name,
                "propertyKind": kind,
            }),
            BuilderKind::CodeRender { code, mode } => json!({
                "kind": "code",
                "mode": mode,
                "code": code,
            }),
            BuilderKind::DataBinding { code } => json!({ "kind": "dataBinding", "code": code }),
        };
        if let Some(obj) = value.as_object_mut() {
            if let Some(control_id) = &node.control_id {
                obj.insert("id".to_string(), json!(control_id));
            }
            if let Some(method) = &node.method_name {
                obj.insert("method".to_string(), json!(method));
            }
            if let Some(inner) = &node.inner_text {
                obj.insert("innerText".to_string(), json!(inner));
            }
            if let Some(location) = &node.location {
                obj.insert("line".to_string(), json!(location.begin.line));
            }
            if !children.is_empty() {
                obj.insert("children".to_string(), Value::Array(children));
            }
        }
        value
    }
}

impl Default for ControlTree {
    fn default() -> Self {
        Self::new()
    }
}
