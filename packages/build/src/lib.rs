#![deny(clippy::all)]

//! ASPX build layer
//!
//! Turns requests for virtual paths into compiled results: discovers the
//! files to batch with a request, groups them into assemblies, drives the
//! language compiler and caches the outcome until a watched file changes.

pub mod assembly_builder;
pub mod build_manager;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod directory_builder;
pub mod precompilation;
pub mod providers;
pub mod sync;

pub use assembly_builder::AssemblyBuilder;
pub use build_manager::{BuildEvent, BuildEventHook, BuildManager};
pub use cache::{
    BuildCache, BuildManagerCacheItem, FileChangeMonitor, ManualChangeMonitor,
    PollingChangeMonitor, RemovalReason,
};
pub use compiler::{
    CompileRequest, CompiledAssembly, CompilerRegistry, CompilerType, EmitOnlyCompiler,
    LanguageCompiler, SourceFile,
};
pub use config::{CompilationConfig, CompilerInfo, ProviderKind};
pub use diagnostics::{BuildError, CompilationError, CompilerDiagnostic};
pub use directory_builder::{BuildProviderGroup, DirectoryBuilder, GroupSummary};
pub use precompilation::{BuildResultType, PrecompilationData, PreservationRecord};
pub use providers::{BuildContext, BuildProvider, ProviderRegistry};
