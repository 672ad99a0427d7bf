//! Generator stacks
//!
//! [`ParserStack`] tracks the chain of files being parsed through server side
//! includes. [`BuilderLocationStack`] mirrors the nesting of open server
//! controls.

use std::collections::HashSet;

use crate::builder::BuilderId;
use crate::parse_util::Location;
use crate::vpath::VirtualPath;

/// Active file parses, outermost first.
#[derive(Debug, Default)]
pub struct ParserStack {
    files: Vec<VirtualPath>,
    /// Lower-cased paths of `files`.
    active: HashSet<String>,
}

impl ParserStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `path`, refusing it when it is already being parsed.
    pub fn push(&mut self, path: &VirtualPath) -> bool {
        if !self.active.insert(path.as_str().to_ascii_lowercase()) {
            return false;
        }
        self.files.push(path.clone());
        true
    }

    pub fn pop(&mut self) -> Option<VirtualPath> {
        let path = self.files.pop()?;
        self.active.remove(&path.as_str().to_ascii_lowercase());
        Some(path)
    }

    pub fn contains(&self, path: &VirtualPath) -> bool {
        self.active.contains(&path.as_str().to_ascii_lowercase())
    }

    /// File currently being parsed.
    pub fn current(&self) -> Option<&VirtualPath> {
        self.files.last()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BuilderLocation {
    pub builder: BuilderId,
    pub location: Option<Location>,
    /// Plain HTML tags opened inside this builder and not closed yet.
    pub other_tags: Vec<String>,
}

#[derive(Debug)]
pub struct BuilderLocationStack {
    frames: Vec<BuilderLocation>,
}

impl BuilderLocationStack {
    pub fn new(root: BuilderId) -> Self {
        BuilderLocationStack {
            frames: vec![BuilderLocation {
                builder: root,
                location: None,
                other_tags: Vec::new(),
            }],
        }
    }

    pub fn push(&mut self, builder: BuilderId, location: Location) {
        self.frames.push(BuilderLocation {
            builder,
            location: Some(location),
            other_tags: Vec::new(),
        });
    }

    /// Pop the innermost builder. The root frame is never popped.
    pub fn pop(&mut self) -> Option<BuilderLocation> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> &BuilderLocation {
        // Always holds the root frame.
        &self.frames[self.frames.len() - 1]
    }

    pub fn builder(&self) -> BuilderId {
        self.top().builder
    }

    pub fn add_other_tag(&mut self, tag_name: &str) {
        let last = self.frames.len() - 1;
        self.frames[last].other_tags.push(tag_name.to_string());
    }

    /// Remove the most recent plain tag named `tag_name` from the innermost
    /// builder. Returns false when no such tag is open there.
    pub fn try_remove_other_tag(&mut self, tag_name: &str) -> bool {
        let last = self.frames.len() - 1;
        let tags = &mut self.frames[last].other_tags;
        match tags.iter().rposition(|t| t.eq_ignore_ascii_case(tag_name)) {
            Some(index) => {
                tags.remove(index);
                true
            }
            None => false,
        }
    }
}
