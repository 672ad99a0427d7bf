//! Compilation configuration
//!
//! The process-wide settings the build layer reads: language descriptors,
//! the extension registry, batching, the recompile budget and the
//! precompiled deployment switches. Loaded from JSON, every field optional.

use std::fs;
use std::path::{Path, PathBuf};

use aspx_compiler::{SourceSyntax, VirtualPath};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::diagnostics::BuildError;

/// Kind of build provider an extension maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Page,
    UserControl,
    Master,
    Application,
    Theme,
}

/// A language the configured compiler understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerInfo {
    /// Canonical language name reported in diagnostics (`C#`, `VB`).
    pub language: String,
    /// Source file extension without the dot.
    pub extension: String,
    /// Names accepted in `Language` attributes, compared without case.
    pub aliases: Vec<String>,
    pub syntax: SourceSyntax,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilationConfig {
    pub default_language: String,
    pub batch: bool,
    pub max_batch_size: usize,
    pub num_recompiles_before_app_restart: u32,
    pub debug: bool,
    pub diagnostic_mode: bool,
    pub ignored_paths: Vec<String>,
    pub themes_directory: String,
    pub compilers: Vec<CompilerInfo>,
    pub build_providers: IndexMap<String, ProviderKind>,
    pub referenced_assemblies: Vec<String>,
    pub precompiled_dir: Option<PathBuf>,
    pub non_updatable_precompiled: bool,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        let mut build_providers = IndexMap::new();
        build_providers.insert(".aspx".to_string(), ProviderKind::Page);
        build_providers.insert(".ascx".to_string(), ProviderKind::UserControl);
        build_providers.insert(".master".to_string(), ProviderKind::Master);
        build_providers.insert(".asax".to_string(), ProviderKind::Application);

        CompilationConfig {
            default_language: "C#".to_string(),
            batch: true,
            max_batch_size: 1000,
            num_recompiles_before_app_restart: 15,
            debug: false,
            diagnostic_mode: true,
            ignored_paths: [
                "/App_Data",
                "/bin",
                "/App_Browsers",
                "/App_LocalResources",
                "/App_GlobalResources",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            themes_directory: "/App_Themes".to_string(),
            compilers: vec![
                CompilerInfo {
                    language: "C#".to_string(),
                    extension: "cs".to_string(),
                    aliases: vec!["c#".to_string(), "cs".to_string(), "csharp".to_string()],
                    syntax: SourceSyntax::CSharp,
                },
                CompilerInfo {
                    language: "VB".to_string(),
                    extension: "vb".to_string(),
                    aliases: vec![
                        "vb".to_string(),
                        "vbs".to_string(),
                        "visualbasic".to_string(),
                        "vbscript".to_string(),
                    ],
                    syntax: SourceSyntax::VisualBasic,
                },
            ],
            build_providers,
            referenced_assemblies: vec!["System".to_string(), "System.Web".to_string()],
            precompiled_dir: None,
            non_updatable_precompiled: false,
        }
    }
}

impl CompilationConfig {
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let content = fs::read_to_string(path).map_err(|source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CompilationConfig = serde_json::from_str(&content)
            .map_err(|e| BuildError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.max_batch_size == 0 {
            return Err(BuildError::Config("maxBatchSize must be at least 1".to_string()));
        }
        if let Some(ext) = self.build_providers.keys().find(|ext| !ext.starts_with('.')) {
            return Err(BuildError::Config(format!(
                "Build provider extension '{}' must start with a dot",
                ext
            )));
        }
        Ok(())
    }

    /// True if discovery must skip `path` (matched against the ignore list
    /// without regard to case).
    pub fn is_ignored(&self, path: &VirtualPath) -> bool {
        self.ignored_paths
            .iter()
            .any(|ignored| path.is_within(&VirtualPath::new(ignored)))
    }

    /// The theme directory `path` lies in, e.g. `/App_Themes/Blue` for
    /// `/App_Themes/Blue/site.css`.
    pub fn theme_directory(&self, path: &VirtualPath) -> Option<VirtualPath> {
        let themes = VirtualPath::new(&self.themes_directory);
        if !path.is_within(&themes) {
            return None;
        }
        let name = path.segments().nth(themes.segments().count())?;
        themes.combine(name)
    }
}
