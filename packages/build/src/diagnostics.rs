//! Build errors
//!
//! The failure taxonomy of the build layer and the text shown to users.
//! Recompile budget overflow is not here: it restarts the application
//! instead of failing a request.

use std::fmt;
use std::io;
use std::path::PathBuf;

use aspx_compiler::{ParseError, VirtualPath};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One message reported by a language compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerDiagnostic {
    /// Virtual path of the source the message points into.
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub code: String,
    pub message: String,
    pub is_warning: bool,
}

impl CompilerDiagnostic {
    pub fn error(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        CompilerDiagnostic {
            file: file.into(),
            line,
            column: 1,
            code: String::new(),
            message: message.into(),
            is_warning: false,
        }
    }
}

impl fmt::Display for CompilerDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = if self.is_warning { "warning" } else { "error" };
        write!(f, "{}({},{}): {}", self.file, self.line, self.column, severity)?;
        if !self.code.is_empty() {
            write!(f, " {}", self.code)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// A generated source handed to the compiler, kept for inspection when the
/// configuration asks for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Compilation of '{assembly}' failed with {} error(s)", error_count(.diagnostics))]
pub struct CompilationError {
    pub assembly: String,
    pub diagnostics: Vec<CompilerDiagnostic>,
    /// Filled only in debug configurations.
    pub sources: Vec<GeneratedSource>,
}

fn error_count(diagnostics: &[CompilerDiagnostic]) -> usize {
    diagnostics.iter().filter(|d| !d.is_warning).count()
}

impl CompilationError {
    pub fn errors(&self) -> impl Iterator<Item = &CompilerDiagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_warning)
    }

    /// Errors whose file is `path`, matched without regard to case.
    pub fn errors_in<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a CompilerDiagnostic> {
        self.errors().filter(move |d| d.file.eq_ignore_ascii_case(path))
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error("The file '{virtual_path}' does not exist.")]
    NotFound { virtual_path: VirtualPath },

    #[error("Circular file dependencies detected while building '{virtual_path}': {}", .path.join(" -> "))]
    DependencyCycle {
        virtual_path: VirtualPath,
        path: Vec<String>,
    },

    #[error("Circular file references are not allowed: '{virtual_path}'.")]
    CircularReference { virtual_path: VirtualPath },

    #[error("The file '{virtual_path}' has not been pre-compiled, and cannot be requested.")]
    PrecompiledAppNotUpdatable { virtual_path: VirtualPath },

    #[error("There is no build provider registered for the extension '{extension}'.")]
    NoBuildProvider { extension: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Text for the error response. With `diagnostic_mode` on it names the
    /// file, line and message; otherwise it gives nothing away.
    pub fn user_message(&self, diagnostic_mode: bool) -> String {
        if !diagnostic_mode {
            return match self {
                BuildError::NotFound { .. } => "The resource cannot be found.".to_string(),
                _ => "An error occurred while compiling a resource required to service this request."
                    .to_string(),
            };
        }

        match self {
            BuildError::Parse(err) => format!(
                "Parser Error\n\nSource File: {}    Line: {}\n\n{}",
                err.location.filename, err.location.begin.line, err.message
            ),
            BuildError::Compilation(err) => {
                let mut out = String::from("Compilation Error\n");
                match err.errors().next() {
                    Some(first) => {
                        out.push_str(&format!(
                            "\nSource File: {}    Line: {}\n\n",
                            first.file, first.line
                        ));
                        for diagnostic in err.errors() {
                            out.push_str(&diagnostic.to_string());
                            out.push('\n');
                        }
                    }
                    None => {
                        out.push('\n');
                        out.push_str(&err.to_string());
                    }
                }
                out
            }
            other => other.to_string(),
        }
    }

    /// Virtual path of the file the error points at, if there is one.
    pub fn source_path(&self) -> Option<VirtualPath> {
        match self {
            BuildError::Parse(err) => Some(VirtualPath::new(&err.location.filename)),
            BuildError::Compilation(err) => {
                err.errors().next().map(|d| VirtualPath::new(&d.file))
            }
            BuildError::NotFound { virtual_path }
            | BuildError::DependencyCycle { virtual_path, .. }
            | BuildError::CircularReference { virtual_path }
            | BuildError::PrecompiledAppNotUpdatable { virtual_path } => {
                Some(virtual_path.clone())
            }
            _ => None,
        }
    }
}
