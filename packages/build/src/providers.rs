//! Build providers
//!
//! One [`BuildProvider`] per file taking part in a build. Markup files are
//! parsed when their provider is created, since language and dependencies
//! are only known after the directives have been read.

use std::fmt;
use std::sync::Arc;

use aspx_compiler::codedom::{
    CodeExpression, CodeMember, CodeMemberKind, CodeNamespace, CodeStatement, CodeTypeDeclaration,
};
use aspx_compiler::{
    assign_method_names, AspGenerator, CodeCompileUnit, ComponentRegistry, Location, PageParserFilter,
    ParseError, ParsedUnit, TemplateCodeGenerator, TemplateParser, UnitKind, VirtualPath,
    VirtualPathProvider,
};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::compiler::{CompiledAssembly, CompilerRegistry, CompilerType};
use crate::config::{CompilationConfig, ProviderKind};
use crate::diagnostics::BuildError;

/// Everything a provider needs to parse and generate code.
#[derive(Clone)]
pub struct BuildContext<'a> {
    pub provider: &'a dyn VirtualPathProvider,
    pub registry: Arc<ComponentRegistry>,
    pub filter: Option<Arc<dyn PageParserFilter>>,
    pub compilers: &'a CompilerRegistry,
    pub config: &'a CompilationConfig,
}

impl<'a> BuildContext<'a> {
    pub fn default_compiler(&self) -> Result<CompilerType, BuildError> {
        self.compilers
            .for_language(&self.config.default_language)
            .ok_or_else(|| {
                BuildError::Config(format!(
                    "The default language '{}' has no compiler.",
                    self.config.default_language
                ))
            })
    }
}

/// Output of [`BuildProvider::generate_code`].
#[derive(Debug, Clone, Default)]
pub struct GeneratedCode {
    pub units: Vec<CodeCompileUnit>,
    /// Hand-written sources compiled along with the units (code files).
    pub source_files: Vec<VirtualPath>,
}

pub trait BuildProvider {
    fn virtual_path(&self) -> &VirtualPath;

    fn kind(&self) -> ProviderKind;

    /// `None` when the provider can be compiled by any language.
    fn compiler_type(&self) -> Option<&CompilerType>;

    /// Other virtual paths the result depends on.
    fn dependencies(&self) -> &[VirtualPath];

    fn generate_code(&self, ctx: &BuildContext<'_>) -> Result<GeneratedCode, BuildError>;

    /// Type the cache hands out for this provider's path.
    fn generated_type_name(&self) -> Option<String>;

    fn custom_string(&self, _assembly: &CompiledAssembly) -> Option<String> {
        None
    }
}

impl fmt::Debug for dyn BuildProvider + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildProvider")
            .field("virtual_path", self.virtual_path())
            .field("kind", &self.kind())
            .finish()
    }
}

fn unit_kind(kind: ProviderKind) -> Option<UnitKind> {
    match kind {
        ProviderKind::Page => Some(UnitKind::Page),
        ProviderKind::UserControl => Some(UnitKind::UserControl),
        ProviderKind::Master => Some(UnitKind::Master),
        ProviderKind::Application => Some(UnitKind::Application),
        ProviderKind::Theme => None,
    }
}

/// Page, user control, master page and application files.
pub struct TemplateBuildProvider {
    virtual_path: VirtualPath,
    kind: ProviderKind,
    parsed: ParsedUnit,
    compiler_type: CompilerType,
    dependencies: Vec<VirtualPath>,
}

impl TemplateBuildProvider {
    pub fn open(
        ctx: &BuildContext<'_>,
        virtual_path: &VirtualPath,
        kind: ProviderKind,
    ) -> Result<Self, BuildError> {
        let unit_kind = unit_kind(kind).ok_or_else(|| BuildError::NoBuildProvider {
            extension: virtual_path.extension(),
        })?;
        if !ctx.provider.file_exists(virtual_path) {
            return Err(BuildError::NotFound {
                virtual_path: virtual_path.clone(),
            });
        }

        let mut unit = TemplateParser::new(virtual_path.clone(), unit_kind, ctx.registry.clone());
        if let Some(filter) = &ctx.filter {
            unit = unit.with_filter(filter.clone());
        }
        let mut parsed = AspGenerator::new(ctx.provider, unit).parse()?;
        assign_method_names(&mut parsed.tree);

        let compiler_type = match parsed.unit.language() {
            Some(language) => ctx.compilers.for_language(language).ok_or_else(|| {
                ParseError::directive(
                    Location::file_start(virtual_path.as_str()),
                    format!("The language '{}' is not supported.", language),
                )
            })?,
            None => ctx.default_compiler()?,
        };
        let dependencies: Vec<VirtualPath> = parsed.unit.dependencies().cloned().collect();
        debug!(
            path = %virtual_path,
            language = %compiler_type.language,
            dependencies = dependencies.len(),
            "parsed build provider"
        );

        Ok(TemplateBuildProvider {
            virtual_path: virtual_path.clone(),
            kind,
            parsed,
            compiler_type,
            dependencies,
        })
    }

    pub fn parsed(&self) -> &ParsedUnit {
        &self.parsed
    }
}

impl BuildProvider for TemplateBuildProvider {
    fn virtual_path(&self) -> &VirtualPath {
        &self.virtual_path
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn compiler_type(&self) -> Option<&CompilerType> {
        Some(&self.compiler_type)
    }

    fn dependencies(&self) -> &[VirtualPath] {
        &self.dependencies
    }

    fn generate_code(&self, _ctx: &BuildContext<'_>) -> Result<GeneratedCode, BuildError> {
        let generator = TemplateCodeGenerator::new(&self.parsed);
        let mut source_files = Vec::new();
        if generator.has_code_behind() {
            if let Some(code_file) = &self.parsed.unit.code_file {
                source_files.push(code_file.clone());
            }
        }
        Ok(GeneratedCode {
            units: vec![generator.generate()],
            source_files,
        })
    }

    fn generated_type_name(&self) -> Option<String> {
        Some(TemplateCodeGenerator::new(&self.parsed).generated_type_name())
    }
}

/// A theme directory under the themes root, compiled as one unit.
pub struct ThemeBuildProvider {
    virtual_path: VirtualPath,
    name: String,
    files: Vec<VirtualPath>,
}

impl ThemeBuildProvider {
    pub fn open(ctx: &BuildContext<'_>, theme_dir: &VirtualPath) -> Result<Self, BuildError> {
        if !ctx.provider.directory_exists(theme_dir) {
            return Err(BuildError::NotFound {
                virtual_path: theme_dir.clone(),
            });
        }
        let entries = ctx
            .provider
            .list_directory(theme_dir)
            .map_err(|source| BuildError::Io {
                path: theme_dir.as_str().into(),
                source,
            })?;
        let files = entries
            .into_iter()
            .filter(|e| !e.is_directory)
            .filter_map(|e| theme_dir.combine(&e.name))
            .collect();
        Ok(ThemeBuildProvider {
            virtual_path: theme_dir.clone(),
            name: theme_dir.file_name().to_string(),
            files,
        })
    }

    fn class_name(&self) -> String {
        let mangled: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("theme_{}", mangled)
    }
}

impl BuildProvider for ThemeBuildProvider {
    fn virtual_path(&self) -> &VirtualPath {
        &self.virtual_path
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Theme
    }

    fn compiler_type(&self) -> Option<&CompilerType> {
        None
    }

    fn dependencies(&self) -> &[VirtualPath] {
        &self.files
    }

    fn generate_code(&self, _ctx: &BuildContext<'_>) -> Result<GeneratedCode, BuildError> {
        let mut class = CodeTypeDeclaration::new(self.class_name());
        class.base_types.push("System.Web.UI.PageTheme".to_string());
        class.members.push(CodeMember {
            name: "AppRelativeTemplateSourceDirectory".to_string(),
            kind: CodeMemberKind::Property {
                type_name: "System.String".to_string(),
                getter: vec![CodeStatement::Return(CodeExpression::StringLiteral(format!(
                    "~{}",
                    self.virtual_path
                )))],
            },
        });
        let mut namespace = CodeNamespace::new("ASP");
        namespace.imports.push("System".to_string());
        namespace.types.push(class);
        Ok(GeneratedCode {
            units: vec![CodeCompileUnit {
                namespaces: vec![namespace],
                referenced_assemblies: Vec::new(),
            }],
            source_files: Vec::new(),
        })
    }

    fn generated_type_name(&self) -> Option<String> {
        Some(format!("ASP.{}", self.class_name()))
    }

    fn custom_string(&self, _assembly: &CompiledAssembly) -> Option<String> {
        Some(self.name.clone())
    }
}

/// Extension to provider kind lookup.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    extensions: IndexMap<String, ProviderKind>,
}

impl ProviderRegistry {
    pub fn new(extensions: IndexMap<String, ProviderKind>) -> Self {
        ProviderRegistry { extensions }
    }

    pub fn kind_for(&self, path: &VirtualPath) -> Option<ProviderKind> {
        let extension = path.extension();
        if extension.is_empty() {
            return None;
        }
        self.extensions
            .iter()
            .find(|(ext, _)| ext.eq_ignore_ascii_case(&extension))
            .map(|(_, kind)| *kind)
    }

    pub fn create(
        &self,
        ctx: &BuildContext<'_>,
        path: &VirtualPath,
    ) -> Result<Box<dyn BuildProvider>, BuildError> {
        match self.kind_for(path) {
            Some(ProviderKind::Theme) => Ok(Box::new(ThemeBuildProvider::open(ctx, path)?)),
            Some(kind) => Ok(Box::new(TemplateBuildProvider::open(ctx, path, kind)?)),
            None => Err(BuildError::NoBuildProvider {
                extension: path.extension(),
            }),
        }
    }
}

static CULTURE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z0-9]{1,8})*$").unwrap());

/// True for `.resx` and `.resources` files, which never become build
/// providers of their own.
pub fn is_resource_file(path: &VirtualPath) -> bool {
    matches!(path.extension().as_str(), ".resx" | ".resources")
}

/// Culture part of a resource file name: `fr-FR` in `Strings.fr-FR.resx`.
/// Returns `None` for culture-neutral names.
pub fn try_parse_culture_suffix(file_name: &str) -> Option<&str> {
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => return None,
    };
    let (_, suffix) = stem.rsplit_once('.')?;
    CULTURE_NAME.is_match(suffix).then_some(suffix)
}
