//! Control tree generator
//!
//! [`AspGenerator`] receives the markup parser's events and builds the
//! control tree of one parse unit. It keeps the stack of open server
//! controls, resolves tags through the unit's foundry, routes text and
//! code blocks into the tree, and follows server side includes with a
//! nested parse per included file.

pub mod code_render;
pub mod stacks;
pub mod text_blocks;

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::sync::Arc;

use tracing::debug;

use crate::builder::{BuilderId, BuilderKind, CodeRenderMode, ControlTree};
use crate::chars;
use crate::foundry::{ComponentDescriptor, ComponentFlags, PropertyKind};
use crate::ml_parser::{
    remove_comments, AspParser, ParseEventHandler, TagAttributes, TagDisposition, TagType,
};
use crate::parse_util::{Location, ParseError, ParseResult};
use crate::template_parser::{CodeConstructKind, TemplateParser};
use crate::vpath::{VirtualPath, VirtualPathProvider};

pub use code_render::{CodeRenderParser, Fragment};
pub use stacks::{BuilderLocation, BuilderLocationStack, ParserStack};
pub use text_blocks::{TextBlock, TextBlockKind};

/// A fully parsed file: its directives and dependencies plus the tree.
pub struct ParsedUnit {
    pub unit: TemplateParser,
    pub tree: ControlTree,
}

impl fmt::Debug for ParsedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedUnit")
            .field("virtual_path", &self.unit.virtual_path)
            .field("kind", &self.unit.kind)
            .field("nodes", &self.tree.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagOutcome {
    Server,
    NotServer,
    /// Swallowed without output.
    Ignored,
}

pub struct AspGenerator<'a> {
    provider: &'a dyn VirtualPathProvider,
    unit: TemplateParser,
    tree: ControlTree,
    parser_stack: ParserStack,
    stack: BuilderLocationStack,
    /// Pending literal text and where it started.
    text: String,
    text_location: Option<Location>,
    in_script: bool,
    javascript: bool,
    ignore_text: bool,
    form_seen: bool,
}

impl<'a> AspGenerator<'a> {
    pub fn new(provider: &'a dyn VirtualPathProvider, unit: TemplateParser) -> Self {
        let tree = ControlTree::new();
        let stack = BuilderLocationStack::new(tree.root());
        AspGenerator {
            provider,
            unit,
            tree,
            parser_stack: ParserStack::new(),
            stack,
            text: String::new(),
            text_location: None,
            in_script: false,
            javascript: false,
            ignore_text: false,
            form_seen: false,
        }
    }

    /// Read the unit's file through the provider and parse it.
    pub fn parse(self) -> ParseResult<ParsedUnit> {
        let path = self.unit.virtual_path.clone();
        let source = self
            .provider
            .read_file(&path)
            .map_err(|e| ParseError::include(Location::file_start(path.as_str()), e.to_string()))?;
        self.parse_text(&source)
    }

    /// Parse `source` as the content of the unit's file.
    pub fn parse_text(mut self, source: &str) -> ParseResult<ParsedUnit> {
        let path = self.unit.virtual_path.clone();
        debug!(path = %path, kind = ?self.unit.kind, "parsing markup");

        self.parser_stack.push(&path);
        let mut parser = AspParser::new(path.as_str(), source);
        let result = parser.parse(&mut self);
        self.parser_stack.pop();
        result?;
        self.unit.checksum = parser.checksum().map(str::to_string);
        self.finish()
    }

    fn finish(mut self) -> ParseResult<ParsedUnit> {
        self.flush_text()?;
        if self.stack.len() > 1 {
            let top = self.stack.top();
            let location = top
                .location
                .clone()
                .unwrap_or_else(|| Location::file_start(self.unit.virtual_path.as_str()));
            let tag_name = self.tree.node(top.builder).tag_name.clone();
            return Err(ParseError::new(location, format!("Expecting </{}>", tag_name)));
        }
        check_duplicate_ids(&self.tree, self.tree.root(), &mut HashSet::new())?;
        debug!(
            path = %self.unit.virtual_path,
            nodes = self.tree.len(),
            dependencies = self.unit.dependencies().count(),
            "markup parsed"
        );
        Ok(ParsedUnit {
            unit: self.unit,
            tree: self.tree,
        })
    }

    fn parse_included(&mut self, path: &VirtualPath, source: String) -> ParseResult<()> {
        debug!(path = %path, "parsing include");
        self.parser_stack.push(path);
        let mut parser = AspParser::new(path.as_str(), source);
        let result = parser.parse(self);
        self.parser_stack.pop();
        result
    }

    fn append_text(&mut self, location: &Location, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.text.is_empty() {
            self.text_location = Some(location.clone());
        }
        self.text.push_str(text);
    }

    fn flush_text(&mut self) -> ParseResult<()> {
        if self.text.is_empty() {
            return Ok(());
        }
        let text = mem::take(&mut self.text);
        let location = self.text_location.take().unwrap_or_default();
        let parent = self.stack.builder();
        let node = self.tree.node(parent);

        if node.children_as_properties() {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(());
            }
            return Err(ParseError::resolution(
                location,
                format!(
                    "Literal content ('{}') is not allowed within a '{}'.",
                    trimmed,
                    node.type_name()
                ),
            ));
        }
        if node.collects_inner_text() {
            self.tree.append_inner_text(parent, &text);
        } else {
            self.tree.append_literal(parent, &text);
        }
        Ok(())
    }

    /// Route literal text, reparsing the parts that carry server constructs.
    fn process_text(&mut self, location: &Location, text: &str) -> ParseResult<()> {
        if self.ignore_text {
            return Ok(());
        }

        if self.in_script {
            if let Some(filter) = self.unit.filter().cloned() {
                if !filter.allow_code() {
                    return Err(ParseError::new(
                        location.clone(),
                        "Code blocks are not allowed in this file.",
                    ));
                }
                if !filter.process_code_construct(CodeConstructKind::ScriptTag, text) {
                    return Ok(());
                }
            }
            self.unit.add_script(text.to_string(), location.clone());
            return Ok(());
        }

        if self.unit.is_application() {
            if !text.trim().is_empty() {
                return Err(ParseError::new(
                    location.clone(),
                    "Content not valid for application file.",
                ));
            }
            return Ok(());
        }

        // Text can arrive with its server comments removed. Blocks are cut
        // from the source text instead so their locations line up with it;
        // reparsing a block drops the comments again.
        let text = if text != location.plain_text && remove_comments(&location.plain_text) == text {
            location.plain_text.as_str()
        } else {
            text
        };
        for block in text_blocks::split(text) {
            match block.kind {
                TextBlockKind::Literal => self.append_text(location, block.text),
                TextBlockKind::Code => {
                    let block_location = sub_location(location, text, block.offset, block.text);
                    self.flush_text()?;
                    for fragment in CodeRenderParser::parse(&block_location, block.text)? {
                        match fragment {
                            Fragment::Literal(literal) => self.append_text(&block_location, &literal),
                            Fragment::Code {
                                tag_type,
                                code,
                                location,
                            } => self.process_code(&location, tag_type, &code)?,
                        }
                    }
                }
                TextBlockKind::Comment => {
                    let block_location = sub_location(location, text, block.offset, block.text);
                    self.append_text(location, "<!--");
                    self.flush_text()?;
                    let mut parser = AspParser::nested(
                        location.filename.as_str(),
                        block.text,
                        block_location.begin,
                    );
                    parser.parse(self)?;
                    self.append_text(location, "-->");
                }
            }
        }
        Ok(())
    }

    fn process_code(&mut self, location: &Location, tag_type: TagType, code: &str) -> ParseResult<()> {
        if self.unit.is_application() {
            return Err(ParseError::new(
                location.clone(),
                "Invalid content for application file.",
            ));
        }

        let (construct, kind) = match tag_type {
            TagType::CodeRender => (
                CodeConstructKind::CodeSnippet,
                BuilderKind::CodeRender {
                    code: code.to_string(),
                    mode: CodeRenderMode::Statement,
                },
            ),
            TagType::CodeRenderExpression => (
                CodeConstructKind::ExpressionSnippet,
                BuilderKind::CodeRender {
                    code: code.to_string(),
                    mode: CodeRenderMode::Expression,
                },
            ),
            TagType::CodeRenderEncode => (
                CodeConstructKind::EncodedExpressionSnippet,
                BuilderKind::CodeRender {
                    code: code.to_string(),
                    mode: CodeRenderMode::Encode,
                },
            ),
            TagType::DataBinding => (
                CodeConstructKind::DataBinding,
                BuilderKind::DataBinding {
                    code: code.to_string(),
                },
            ),
            _ => return Ok(()),
        };

        if let Some(filter) = self.unit.filter().cloned() {
            if construct != CodeConstructKind::DataBinding && !filter.allow_code() {
                return Err(ParseError::new(
                    location.clone(),
                    "Code blocks are not allowed in this file.",
                ));
            }
            if !filter.process_code_construct(construct, code) {
                return Ok(());
            }
        }

        self.flush_text()?;
        let parent = self.stack.builder();
        if self.tree.node(parent).children_as_properties() {
            return Err(ParseError::new(
                location.clone(),
                "Code blocks are not supported in this context.",
            ));
        }
        self.tree
            .add(parent, kind, "", TagAttributes::new(), Some(location.clone()));
        Ok(())
    }

    /// `<script>` handling. `None` lets the tag through to the regular
    /// tag processing.
    fn process_script(
        &mut self,
        location: &Location,
        tag_type: TagType,
        attributes: Option<&TagAttributes>,
    ) -> ParseResult<Option<TagDisposition>> {
        if tag_type == TagType::Close {
            if self.in_script {
                self.in_script = false;
            } else if self.ignore_text {
                self.ignore_text = false;
            } else {
                self.javascript = false;
                self.process_text(location, &location.plain_text)?;
            }
            return Ok(Some(TagDisposition::Continue));
        }

        let attributes = match attributes {
            Some(attributes) if attributes.is_run_at_server() => attributes,
            _ => {
                self.process_text(location, &location.plain_text)?;
                if tag_type == TagType::SelfClosing {
                    return Ok(Some(TagDisposition::Continue));
                }
                self.javascript = true;
                return Ok(Some(TagDisposition::Verbatim("script".to_string())));
            }
        };

        if let Some(language) = attributes.get("language").filter(|l| !l.is_empty()) {
            self.unit.set_implicit_language(language);
        }

        let mut has_src = false;
        if let Some(src) = attributes.get("src") {
            if src.is_empty() {
                return Err(ParseError::new(location.clone(), "src cannot be an empty string"));
            }
            let path = self.unit.resolve_path(location, src)?;
            let code = self
                .provider
                .read_file(&path)
                .map_err(|e| ParseError::include(location.clone(), e.to_string()))?;
            self.unit.add_dependency(path);
            self.unit.add_script(code, location.clone());
            has_src = true;
        }

        if tag_type == TagType::Tag {
            self.javascript = false;
            if has_src {
                self.ignore_text = true;
            } else {
                self.in_script = true;
            }
            return Ok(Some(TagDisposition::Verbatim("script".to_string())));
        }
        Ok(Some(TagDisposition::Continue))
    }

    fn process_tag(
        &mut self,
        location: &Location,
        tag_type: TagType,
        tag_name: &str,
        attributes: &TagAttributes,
    ) -> ParseResult<TagOutcome> {
        if self.unit.is_application() && !tag_name.eq_ignore_ascii_case("object") {
            return Err(ParseError::new(location.clone(), "Invalid tag for application file."));
        }

        let parent = self.stack.builder();
        if self.tree.node(parent).has_flag(ComponentFlags::HTML_TABLE)
            && (tag_name.eq_ignore_ascii_case("thead") || tag_name.eq_ignore_ascii_case("tbody"))
        {
            return Ok(TagOutcome::Ignored);
        }

        let mut kind = None;
        if self.stack.len() > 1 {
            kind = self.create_sub_builder(location, parent, tag_name)?;
        }
        if kind.is_none() && attributes.is_run_at_server() {
            kind = Some(BuilderKind::Control(self.lookup_control(location, tag_name)?));
        }
        let kind = match kind {
            Some(kind) => kind,
            None => return Ok(TagOutcome::NotServer),
        };

        let push = match &kind {
            BuilderKind::Control(descriptor) => {
                self.check_control(location, descriptor, attributes)?;
                descriptor.is(ComponentFlags::HAS_BODY)
                    || (descriptor.is(ComponentFlags::OBJECT_TAG) && tag_type == TagType::Tag)
            }
            _ => true,
        };

        let id = self
            .tree
            .add(parent, kind, tag_name, attributes.clone(), Some(location.clone()));
        if push {
            self.stack.push(id, location.clone());
        }
        Ok(TagOutcome::Server)
    }

    /// Child tag of a control that parses its body as properties.
    fn create_sub_builder(
        &self,
        location: &Location,
        parent: BuilderId,
        tag_name: &str,
    ) -> ParseResult<Option<BuilderKind>> {
        match &self.tree.node(parent).kind {
            BuilderKind::Control(descriptor) if descriptor.is(ComponentFlags::CHILDREN_AS_PROPERTIES) => {
                if let Some(property) = descriptor.property(tag_name) {
                    return Ok(Some(BuilderKind::Property {
                        name: property.name.clone(),
                        kind: property.kind,
                    }));
                }
                if descriptor.default_property.is_some() && tag_name.contains(':') {
                    return self.lookup_control(location, tag_name).map(|d| Some(BuilderKind::Control(d)));
                }
                Err(ParseError::resolution(
                    location.clone(),
                    format!(
                        "Type '{}' does not have a public property named '{}'.",
                        descriptor.type_name, tag_name
                    ),
                ))
            }
            BuilderKind::Property {
                kind: PropertyKind::Collection,
                ..
            } if tag_name.contains(':') => self
                .lookup_control(location, tag_name)
                .map(|d| Some(BuilderKind::Control(d))),
            _ => Ok(None),
        }
    }

    fn lookup_control(&self, location: &Location, tag_name: &str) -> ParseResult<Arc<ComponentDescriptor>> {
        self.unit
            .foundry()
            .lookup(tag_name)
            .map_err(|message| ParseError::resolution(location.clone(), message))
    }

    fn check_control(
        &mut self,
        location: &Location,
        descriptor: &ComponentDescriptor,
        attributes: &TagAttributes,
    ) -> ParseResult<()> {
        if let Some(id) = attributes.get("id") {
            if !chars::is_valid_identifier(id) {
                return Err(ParseError::resolution(
                    location.clone(),
                    format!("'{}' is not a valid identifier", id),
                ));
            }
        }
        if let Some(filter) = self.unit.filter() {
            if !filter.allow_control(descriptor) {
                return Err(ParseError::resolution(
                    location.clone(),
                    format!("The control type '{}' is not allowed in this file.", descriptor.type_name),
                ));
            }
        }
        if let Some((name, _)) = attributes
            .iter()
            .find(|(name, _)| !name.is_empty() && !descriptor.accepts_attribute(name))
        {
            return Err(ParseError::resolution(
                location.clone(),
                format!(
                    "Type '{}' does not have a public property named '{}'.",
                    descriptor.type_name, name
                ),
            ));
        }
        if descriptor.is(ComponentFlags::HTML_FORM) {
            if self.form_seen {
                return Err(ParseError::new(location.clone(), "Only one <form> allowed."));
            }
            self.form_seen = true;
        }
        if let Some(source) = &descriptor.source {
            self.unit.add_dependency(source.clone());
        }
        Ok(())
    }

    /// Close the innermost server control if `tag_name` matches it.
    fn close_control(&mut self, location: &Location, tag_name: &str) -> ParseResult<bool> {
        if self.stack.len() <= 1 {
            return Ok(false);
        }
        let current = self.stack.builder();
        let node = self.tree.node(current);

        let is_section = tag_name.eq_ignore_ascii_case("thead") || tag_name.eq_ignore_ascii_case("tbody");
        if is_section && node.has_flag(ComponentFlags::HTML_TABLE) {
            self.flush_text()?;
            return Ok(true);
        }
        if tag_name.eq_ignore_ascii_case("tbody") && !node.tag_name.eq_ignore_ascii_case("tbody") {
            if !node.children_as_properties() {
                self.process_text(location, &location.plain_text)?;
                self.flush_text()?;
            }
            return Ok(true);
        }
        if !tag_name.eq_ignore_ascii_case(&node.tag_name) {
            return Ok(false);
        }

        self.flush_text()?;
        self.stack.pop();
        Ok(true)
    }

    /// Text of a tag that is not a server control. Attribute values may still
    /// hold code blocks, except when the first one is a `<%$ %>` expression.
    fn process_plain_tag(&mut self, location: &Location) -> ParseResult<()> {
        let text = location.plain_text.as_str();
        match (text.find("<%"), text.find("<%$")) {
            (Some(code), Some(expression)) if code == expression => {
                self.append_text(location, text);
                Ok(())
            }
            _ => self.process_text(location, text),
        }
    }

    fn process_include(&mut self, location: &Location, attributes: Option<&TagAttributes>) -> ParseResult<()> {
        let current = self
            .parser_stack
            .current()
            .cloned()
            .unwrap_or_else(|| self.unit.virtual_path.clone());
        let (virtual_target, file_target) = match attributes {
            Some(attributes) => (attributes.get("virtual"), attributes.get("file")),
            None => (None, None),
        };

        let target = if let Some(path) = virtual_target {
            current.combine_with_directory(path)
        } else if let Some(path) = file_target {
            self.provider
                .resolve_contained(&current.directory(), path)
                .map_err(|e| ParseError::include(location.clone(), e.to_string()))?
        } else {
            return Err(ParseError::include(location.clone(), "Empty file name."));
        };
        let target = target.ok_or_else(|| {
            ParseError::include(
                location.clone(),
                "Cannot use a leading .. to exit above the top directory.",
            )
        })?;

        if let Some(filter) = self.unit.filter() {
            if !filter.allow_server_side_include(&target) {
                return Err(ParseError::include(
                    location.clone(),
                    format!("The server side include '{}' is not allowed.", target),
                ));
            }
        }
        if !self.provider.file_exists(&target) {
            return Err(ParseError::include(
                location.clone(),
                format!("The file '{}' does not exist.", target),
            ));
        }
        if self.parser_stack.contains(&target) {
            return Err(ParseError::include(
                location.clone(),
                format!("Infinite recursion detected including file: {}", target),
            ));
        }

        let source = self
            .provider
            .read_file(&target)
            .map_err(|e| ParseError::include(location.clone(), e.to_string()))?;
        self.unit.add_dependency(target.clone());
        self.flush_text()?;
        self.parse_included(&target, source)
    }
}

impl ParseEventHandler for AspGenerator<'_> {
    fn tag_parsed(
        &mut self,
        location: &Location,
        tag_type: TagType,
        id: &str,
        attributes: Option<&TagAttributes>,
    ) -> ParseResult<TagDisposition> {
        self.flush_text()?;

        if id.eq_ignore_ascii_case("script")
            && matches!(tag_type, TagType::Tag | TagType::SelfClosing | TagType::Close)
        {
            if let Some(disposition) = self.process_script(location, tag_type, attributes)? {
                return Ok(disposition);
            }
        }

        match tag_type {
            TagType::Directive => {
                let name = if id.is_empty() {
                    self.unit.kind.main_directive().to_string()
                } else {
                    id.to_string()
                };
                let empty = TagAttributes::new();
                self.unit
                    .add_directive(&name, attributes.unwrap_or(&empty), location)?;
            }
            TagType::Tag | TagType::SelfClosing => {
                let empty = TagAttributes::new();
                let attributes = attributes.unwrap_or(&empty);
                let depth = self.stack.len();
                match self.process_tag(location, tag_type, id, attributes)? {
                    TagOutcome::Server => {
                        if tag_type == TagType::SelfClosing && self.stack.len() > depth {
                            self.stack.pop();
                        }
                    }
                    TagOutcome::NotServer => {
                        if tag_type == TagType::Tag {
                            self.stack.add_other_tag(id);
                        }
                        self.process_plain_tag(location)?;
                    }
                    TagOutcome::Ignored => {}
                }
            }
            TagType::Close => {
                if self.stack.try_remove_other_tag(id) || !self.close_control(location, id)? {
                    self.process_text(location, &location.plain_text)?;
                }
            }
            TagType::CodeRender
            | TagType::CodeRenderExpression
            | TagType::CodeRenderEncode
            | TagType::DataBinding => self.process_code(location, tag_type, id)?,
            TagType::Include => self.process_include(location, attributes)?,
            TagType::Text | TagType::ServerComment => {}
        }
        Ok(TagDisposition::Continue)
    }

    fn text_parsed(&mut self, location: &Location, text: &str) -> ParseResult<()> {
        self.process_text(location, text)
    }

    fn parsing_complete(&mut self) -> ParseResult<()> {
        self.flush_text()
    }
}

/// Location of `part`, found at byte `offset` of `text`, which itself
/// starts at `outer`.
fn sub_location(outer: &Location, text: &str, offset: usize, part: &str) -> Location {
    let prefix = text.get(..offset).unwrap_or("");
    let begin = outer.begin.advance(prefix);
    Location::new(outer.filename.as_str(), begin, begin.advance(part), part)
}

/// Walk the tree and reject an ID used twice inside one naming scope.
fn check_duplicate_ids(tree: &ControlTree, id: BuilderId, seen: &mut HashSet<String>) -> ParseResult<()> {
    for child in tree.child_builders(id) {
        let node = tree.node(child);
        if let Some(control_id) = &node.control_id {
            if !seen.insert(control_id.to_ascii_lowercase()) {
                return Err(ParseError::resolution(
                    node.location.clone().unwrap_or_default(),
                    format!("Id '{}' is already used by another control.", control_id),
                ));
            }
        }
        if node.is_naming_container() {
            check_duplicate_ids(tree, child, &mut HashSet::new())?;
        } else {
            check_duplicate_ids(tree, child, seen)?;
        }
    }
    Ok(())
}
