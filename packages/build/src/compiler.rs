//! Language compiler seam
//!
//! Turning generated sources into a loadable assembly is delegated to a
//! [`LanguageCompiler`]. The build layer only decides what goes into each
//! compilation and what to do with the outcome.

use std::fs;
use std::path::PathBuf;

use aspx_compiler::{SourceSyntax, VirtualPath};
use serde::Serialize;

use crate::config::CompilerInfo;
use crate::diagnostics::{BuildError, CompilerDiagnostic};

/// Resolved language of a build provider or group. Two types are the same
/// compiler when their canonical language names match.
#[derive(Debug, Clone, Serialize)]
pub struct CompilerType {
    pub language: String,
    pub extension: String,
    pub syntax: SourceSyntax,
}

impl PartialEq for CompilerType {
    fn eq(&self, other: &Self) -> bool {
        self.language.eq_ignore_ascii_case(&other.language)
    }
}

impl Eq for CompilerType {}

impl From<&CompilerInfo> for CompilerType {
    fn from(info: &CompilerInfo) -> Self {
        CompilerType {
            language: info.language.clone(),
            extension: info.extension.clone(),
            syntax: info.syntax,
        }
    }
}

/// Maps `Language` attribute values and code file extensions onto
/// compiler types.
#[derive(Debug, Clone)]
pub struct CompilerRegistry {
    compilers: Vec<CompilerInfo>,
}

impl CompilerRegistry {
    pub fn new(compilers: Vec<CompilerInfo>) -> Self {
        CompilerRegistry { compilers }
    }

    pub fn for_language(&self, language: &str) -> Option<CompilerType> {
        let language = language.trim();
        self.compilers
            .iter()
            .find(|info| {
                info.language.eq_ignore_ascii_case(language)
                    || info.aliases.iter().any(|a| a.eq_ignore_ascii_case(language))
            })
            .map(CompilerType::from)
    }

    /// Compiler for a source file extension, with or without the dot.
    pub fn for_extension(&self, extension: &str) -> Option<CompilerType> {
        let extension = extension.trim_start_matches('.');
        self.compilers
            .iter()
            .find(|info| info.extension.eq_ignore_ascii_case(extension))
            .map(CompilerType::from)
    }
}

/// A source file in a compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Name diagnostics refer to: the virtual path of the markup or code file
    /// the text came from.
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub assembly_name: String,
    pub compiler_type: CompilerType,
    pub sources: Vec<SourceFile>,
    pub references: Vec<String>,
    /// Qualified names of the types the sources declare.
    pub type_names: Vec<String>,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledAssembly {
    pub name: String,
    pub types: Vec<String>,
    /// Where the compiler left the assembly, if anywhere.
    pub location: Option<PathBuf>,
}

impl CompiledAssembly {
    pub fn new(name: impl Into<String>, types: Vec<String>) -> Self {
        CompiledAssembly {
            name: name.into(),
            types,
            location: None,
        }
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.iter().any(|t| t == type_name)
    }
}

pub trait LanguageCompiler: Send + Sync {
    /// Compile one group. On failure the diagnostics name the offending
    /// sources by [`SourceFile::name`].
    fn compile(&self, request: &CompileRequest)
        -> Result<CompiledAssembly, Vec<CompilerDiagnostic>>;

    /// Load an assembly produced by an earlier precompilation.
    fn load_assembly(&self, name: &str) -> Option<CompiledAssembly>;
}

/// Writes every compilation's sources under `output` and reports success
/// with the declared types. Stands in for a real compiler when only the
/// generated code is of interest.
pub struct EmitOnlyCompiler {
    output: PathBuf,
}

impl EmitOnlyCompiler {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        EmitOnlyCompiler {
            output: output.into(),
        }
    }

    fn write(&self, request: &CompileRequest) -> Result<PathBuf, BuildError> {
        let dir = self.output.join(&request.assembly_name);
        fs::create_dir_all(&dir).map_err(|source| BuildError::Io {
            path: dir.clone(),
            source,
        })?;
        for (i, source) in request.sources.iter().enumerate() {
            let stem = VirtualPath::new(&source.name).file_name().replace('.', "_");
            let path = dir.join(format!("{}.{}.{}", i, stem, request.compiler_type.extension));
            fs::write(&path, &source.text).map_err(|source| BuildError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(dir)
    }
}

impl LanguageCompiler for EmitOnlyCompiler {
    fn compile(
        &self,
        request: &CompileRequest,
    ) -> Result<CompiledAssembly, Vec<CompilerDiagnostic>> {
        match self.write(request) {
            Ok(dir) => Ok(CompiledAssembly {
                name: request.assembly_name.clone(),
                types: request.type_names.clone(),
                location: Some(dir),
            }),
            Err(err) => Err(vec![CompilerDiagnostic::error(
                request.assembly_name.as_str(),
                0,
                err.to_string(),
            )]),
        }
    }

    fn load_assembly(&self, name: &str) -> Option<CompiledAssembly> {
        let dir = self.output.join(name);
        dir.is_dir().then(|| CompiledAssembly {
            name: name.to_string(),
            types: Vec::new(),
            location: Some(dir),
        })
    }
}
