//! Assembly builder
//!
//! Collects the generated code of one provider group, merges partial type
//! fragments and hands the result to the language compiler. Diagnostics are
//! mapped back to the providers whose sources they point into.

use std::collections::{HashMap, HashSet};

use aspx_compiler::{CodeCompileUnit, VirtualPath};
use indexmap::IndexSet;
use tracing::debug;

use crate::compiler::{CompileRequest, CompiledAssembly, CompilerType, LanguageCompiler, SourceFile};
use crate::diagnostics::{BuildError, CompilationError, GeneratedSource};
use crate::providers::{BuildContext, BuildProvider};

pub struct AssemblyBuilder {
    name: String,
    compiler_type: CompilerType,
    units: Vec<(VirtualPath, CodeCompileUnit)>,
    code_files: Vec<(VirtualPath, SourceFile)>,
    references: IndexSet<String>,
    /// Lower-cased source name to the provider that produced it.
    origins: HashMap<String, VirtualPath>,
}

impl AssemblyBuilder {
    pub fn new(name: impl Into<String>, compiler_type: CompilerType) -> Self {
        AssemblyBuilder {
            name: name.into(),
            compiler_type,
            units: Vec::new(),
            code_files: Vec::new(),
            references: IndexSet::new(),
            origins: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compiler_type(&self) -> &CompilerType {
        &self.compiler_type
    }

    pub fn add_assembly_reference(&mut self, assembly: &str) {
        if assembly != self.name {
            self.references.insert(assembly.to_string());
        }
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(String::as_str)
    }

    pub fn add_code_compile_unit(&mut self, owner: &VirtualPath, unit: CodeCompileUnit) {
        for assembly in &unit.referenced_assemblies {
            self.add_assembly_reference(assembly);
        }
        self.origins
            .insert(owner.as_str().to_ascii_lowercase(), owner.clone());
        self.units.push((owner.clone(), unit));
    }

    /// Add a hand-written source. A file several providers share (one
    /// code-behind class for many pages) is compiled once.
    pub fn add_code_file(&mut self, owner: &VirtualPath, path: &VirtualPath, text: String) {
        if self.code_files.iter().any(|(_, f)| f.name.eq_ignore_ascii_case(path.as_str())) {
            return;
        }
        self.origins
            .insert(path.as_str().to_ascii_lowercase(), owner.clone());
        self.code_files.push((
            owner.clone(),
            SourceFile {
                name: path.as_str().to_string(),
                text,
            },
        ));
    }

    /// Generate the provider's code and read the code files it brings along.
    /// Nothing is added when either step fails.
    pub fn add_provider(
        &mut self,
        provider: &dyn BuildProvider,
        ctx: &BuildContext<'_>,
    ) -> Result<(), BuildError> {
        let owner = provider.virtual_path().clone();
        let generated = provider.generate_code(ctx)?;
        let code_files = generated
            .source_files
            .into_iter()
            .map(|path| match ctx.provider.read_file(&path) {
                Ok(text) => Ok((path, text)),
                Err(_) => Err(BuildError::NotFound { virtual_path: path }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        for unit in generated.units {
            self.add_code_compile_unit(&owner, unit);
        }
        for (path, text) in code_files {
            self.add_code_file(&owner, &path, text);
        }
        Ok(())
    }

    /// Strip members of partial type fragments that an earlier fragment of
    /// the same type already declares. Returns how many were removed.
    pub fn merge_partial_types(&mut self) -> usize {
        let mut seen: HashMap<String, HashSet<String>> = HashMap::new();
        let mut removed = 0;
        for (owner, unit) in &mut self.units {
            for namespace in &mut unit.namespaces {
                for i in 0..namespace.types.len() {
                    if !namespace.types[i].is_partial {
                        continue;
                    }
                    let qualified = namespace.qualify(&namespace.types[i].name);
                    let declared = seen.entry(qualified.clone()).or_default();
                    let fragment = &mut namespace.types[i];
                    let before = fragment.members.len();
                    fragment.members.retain(|m| !declared.contains(&m.name));
                    let dropped = before - fragment.members.len();
                    if dropped > 0 {
                        debug!(
                            type_name = %qualified,
                            owner = %owner,
                            dropped,
                            "removed duplicate partial members"
                        );
                    }
                    removed += dropped;
                    declared.extend(fragment.members.iter().map(|m| m.name.clone()));
                }
            }
        }
        removed
    }

    /// Qualified names of every type the generated units declare.
    pub fn type_names(&self) -> Vec<String> {
        let mut names = IndexSet::new();
        for (_, unit) in &self.units {
            for (name, _) in unit.types() {
                names.insert(name);
            }
        }
        names.into_iter().collect()
    }

    /// Sources in the order they were added: generated units first, then
    /// code files.
    pub fn sources(&self) -> Vec<SourceFile> {
        let syntax = self.compiler_type.syntax;
        self.units
            .iter()
            .map(|(owner, unit)| SourceFile {
                name: owner.as_str().to_string(),
                text: syntax.emit(unit),
            })
            .chain(self.code_files.iter().map(|(_, file)| file.clone()))
            .collect()
    }

    /// Merge partial types and compile.
    pub fn compile(
        &mut self,
        compiler: &dyn LanguageCompiler,
        debug: bool,
    ) -> Result<CompiledAssembly, CompilationError> {
        self.merge_partial_types();
        let request = CompileRequest {
            assembly_name: self.name.clone(),
            compiler_type: self.compiler_type.clone(),
            sources: self.sources(),
            references: self.references.iter().cloned().collect(),
            type_names: self.type_names(),
            debug,
        };
        match compiler.compile(&request) {
            Ok(assembly) => {
                debug!(
                    assembly = %assembly.name,
                    language = %self.compiler_type.language,
                    sources = request.sources.len(),
                    "compiled assembly"
                );
                Ok(assembly)
            }
            Err(diagnostics) => Err(CompilationError {
                assembly: self.name.clone(),
                diagnostics,
                sources: if debug {
                    request
                        .sources
                        .into_iter()
                        .map(|s| GeneratedSource {
                            name: s.name,
                            text: s.text,
                        })
                        .collect()
                } else {
                    Vec::new()
                },
            }),
        }
    }

    /// Providers the errors of `err` point into, in the order they were
    /// added. Errors in files this builder does not know are ignored.
    pub fn failed_providers(&self, err: &CompilationError) -> Vec<VirtualPath> {
        let mut failed = IndexSet::new();
        for diagnostic in err.errors() {
            if let Some(owner) = self.origins.get(&diagnostic.file.to_ascii_lowercase()) {
                failed.insert(owner.clone());
            }
        }
        let mut ordered: Vec<VirtualPath> = Vec::new();
        for (owner, _) in &self.units {
            if failed.contains(owner) && !ordered.contains(owner) {
                ordered.push(owner.clone());
            }
        }
        ordered
    }
}
