#![deny(clippy::all)]

//! ASPX markup compiler front end
//!
//! Tokenizes and parses page, user control, master page and application
//! files, builds their control tree and turns it into a code object model
//! the build layer hands to a language compiler.

pub mod builder;
pub mod chars;
pub mod checksum;
pub mod codedom;
pub mod codegen;
pub mod foundry;
pub mod generator;
pub mod ml_parser;
pub mod parse_util;
pub mod template_parser;
pub mod vpath;

use std::sync::Arc;

pub use builder::{BuilderId, BuilderKind, ControlTree};
pub use codedom::{CodeCompileUnit, SourceSyntax};
pub use codegen::{assign_method_names, TemplateCodeGenerator};
pub use foundry::{ComponentDescriptor, ComponentFlags, ComponentRegistry};
pub use generator::{AspGenerator, ParsedUnit};
pub use parse_util::{Location, ParseError, ParseErrorKind, ParseResult};
pub use template_parser::{PageParserFilter, TemplateParser, UnitKind};
pub use vpath::{MemoryPathProvider, PhysicalPathProvider, VirtualPath, VirtualPathProvider};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse the markup file at `path` and assign build method names to its
/// tree. The unit kind follows from the file extension.
pub fn parse_file(
    provider: &dyn VirtualPathProvider,
    registry: Arc<ComponentRegistry>,
    filter: Option<Arc<dyn PageParserFilter>>,
    path: &VirtualPath,
) -> ParseResult<ParsedUnit> {
    let kind = UnitKind::from_extension(&path.extension()).ok_or_else(|| {
        ParseError::directive(
            Location::file_start(path.as_str()),
            format!("'{}' is not a markup file.", path),
        )
    })?;
    let mut unit = TemplateParser::new(path.clone(), kind, registry);
    if let Some(filter) = filter {
        unit = unit.with_filter(filter);
    }
    let mut parsed = AspGenerator::new(provider, unit).parse()?;
    assign_method_names(&mut parsed.tree);
    Ok(parsed)
}
