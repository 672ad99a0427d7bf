//! Build manager
//!
//! Entry point of the build layer. A request for a virtual path is served
//! from the cache when possible. Otherwise the path is compiled under the
//! process-wide compilation lock, usually together with its neighbours:
//!
//! 1. cache check without the lock, then again with it held;
//! 2. precompiled results, when the deployment ships preservation records;
//! 3. discovery and grouping by the [`DirectoryBuilder`];
//! 4. one assembly per group, retried without the files that broke it;
//! 5. one cache entry per compiled file, watched for changes.
//!
//! Builds that need another markup file compiled first re-enter the lock
//! and always build in single mode. Assemblies produced during one
//! top-level build are referenced by every later compilation of that build.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use aspx_compiler::{ComponentRegistry, PageParserFilter, VirtualPath, VirtualPathProvider};
use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::assembly_builder::AssemblyBuilder;
use crate::cache::{
    cache_key, BuildCache, BuildManagerCacheItem, FileChangeMonitor, ManualChangeMonitor,
    RemovalCallback, RemovalReason,
};
use crate::compiler::{CompiledAssembly, CompilerRegistry, LanguageCompiler};
use crate::config::CompilationConfig;
use crate::diagnostics::BuildError;
use crate::directory_builder::{BuildProviderGroup, DirectoryBuilder};
use crate::precompilation::{BuildResultType, PrecompilationData, PreservationRecord};
use crate::providers::{BuildContext, BuildProvider, ProviderRegistry};
use crate::sync::ReentrantLock;

/// Compilations of one group before it is given up.
pub const MAX_COMPILE_ATTEMPTS: usize = 3;

/// Something the build manager did that the host may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Compiled {
        assembly: String,
        members: Vec<VirtualPath>,
        attempt: usize,
    },
    /// A file was left out of its group's assembly.
    ProviderDropped {
        virtual_path: VirtualPath,
        reason: String,
    },
    /// The recompile budget ran out and compiled results were discarded.
    AppRestart { recompiles: u32 },
}

pub type BuildEventHook = Arc<dyn Fn(&BuildEvent) + Send + Sync>;

/// State of the top-level build in progress. Only touched with the
/// compilation lock held.
#[derive(Default)]
struct BuildSession {
    references: IndexSet<String>,
    batched_dirs: HashSet<String>,
    build_stack: SmallVec<[VirtualPath; 4]>,
}

#[derive(Default)]
struct RecompileState {
    compiled: HashSet<String>,
    count: u32,
}

pub struct BuildManager {
    config: CompilationConfig,
    provider: Arc<dyn VirtualPathProvider>,
    registry: Arc<ComponentRegistry>,
    filter: Option<Arc<dyn PageParserFilter>>,
    compilers: CompilerRegistry,
    extensions: ProviderRegistry,
    compiler: Arc<dyn LanguageCompiler>,
    cache: Arc<BuildCache>,
    monitor: Arc<dyn FileChangeMonitor>,
    precompiled: Option<PrecompilationData>,
    lock: ReentrantLock,
    session: Mutex<BuildSession>,
    recompiles: Mutex<RecompileState>,
    hooks: RwLock<Vec<BuildEventHook>>,
}

impl BuildManager {
    /// Create a manager. Preservation records are read from the configured
    /// precompiled directory, if any.
    pub fn new(
        config: CompilationConfig,
        provider: Arc<dyn VirtualPathProvider>,
        compiler: Arc<dyn LanguageCompiler>,
    ) -> Result<Self, BuildError> {
        let precompiled = match &config.precompiled_dir {
            Some(dir) => {
                let data = PrecompilationData::load(dir)?;
                info!(records = data.len(), dir = %dir.display(), "loaded precompiled results");
                Some(data)
            }
            None => None,
        };
        let cache = Arc::new(BuildCache::new());
        let monitor: Arc<dyn FileChangeMonitor> = Arc::new(ManualChangeMonitor::new());
        connect_monitor(&cache, &monitor);

        Ok(BuildManager {
            compilers: CompilerRegistry::new(config.compilers.clone()),
            extensions: ProviderRegistry::new(config.build_providers.clone()),
            config,
            provider,
            registry: Arc::new(ComponentRegistry::with_builtins()),
            filter: None,
            compiler,
            cache,
            monitor,
            precompiled,
            lock: ReentrantLock::new(),
            session: Mutex::new(BuildSession::default()),
            recompiles: Mutex::new(RecompileState::default()),
            hooks: RwLock::new(Vec::new()),
        })
    }

    pub fn with_registry(mut self, registry: Arc<ComponentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn PageParserFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Use `monitor` for file change notifications instead of the default
    /// manual one.
    pub fn with_monitor(mut self, monitor: Arc<dyn FileChangeMonitor>) -> Self {
        connect_monitor(&self.cache, &monitor);
        self.monitor = monitor;
        self
    }

    pub fn with_precompiled(mut self, data: PrecompilationData) -> Self {
        self.precompiled = Some(data);
        self
    }

    pub fn config(&self) -> &CompilationConfig {
        &self.config
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn recompile_count(&self) -> u32 {
        self.recompiles().count
    }

    pub fn subscribe_events(&self, hook: BuildEventHook) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    pub fn subscribe_removed(&self, callback: RemovalCallback) {
        self.cache.subscribe_removed(callback);
    }

    /// The build result for `path`, compiling it if needed. Paths inside a
    /// theme directory resolve to the whole theme.
    pub fn get_cache_item(
        &self,
        path: &VirtualPath,
    ) -> Result<Arc<BuildManagerCacheItem>, BuildError> {
        let target = self.config.theme_directory(path).unwrap_or_else(|| path.clone());
        if let Some(item) = self.cache.get(&target) {
            return Ok(item);
        }

        let guard = self.lock.lock();
        let outermost = guard.is_outermost();
        let result = self.build_locked(&target, !outermost);
        if outermost {
            *self.session() = BuildSession::default();
        }
        result
    }

    /// Name of the type compiled for `path`.
    pub fn get_compiled_type(&self, path: &VirtualPath) -> Result<Option<String>, BuildError> {
        Ok(self.get_cache_item(path)?.type_name.clone())
    }

    pub fn get_compiled_assembly(
        &self,
        path: &VirtualPath,
    ) -> Result<Arc<CompiledAssembly>, BuildError> {
        Ok(self.get_cache_item(path)?.assembly.clone())
    }

    pub fn get_compiled_custom_string(
        &self,
        path: &VirtualPath,
    ) -> Result<Option<String>, BuildError> {
        Ok(self.get_cache_item(path)?.custom_string.clone())
    }

    /// Files whose change invalidates the result for `path`, the path
    /// itself first. Parses the file if it has not been built.
    pub fn get_virtual_path_dependencies(
        &self,
        path: &VirtualPath,
    ) -> Result<Vec<VirtualPath>, BuildError> {
        if let Some(item) = self.cache.get(path) {
            return Ok(item.dependencies.clone());
        }
        if let Some(record) = self.precompiled_record(path) {
            return Ok(record_dependencies(record));
        }
        let ctx = self.context();
        let provider = self.extensions.create(&ctx, path)?;
        Ok(watch_list(provider.as_ref()))
    }

    /// Drop every result depending on `path`, given as a physical path
    /// under the application root or as a virtual path. Returns the paths
    /// whose results were dropped.
    pub fn invalidate(&self, path: &str) -> Vec<VirtualPath> {
        let virtual_path = self
            .provider
            .virtual_path_for(Path::new(path))
            .unwrap_or_else(|| VirtualPath::new(path));
        self.cache
            .invalidate(&virtual_path)
            .iter()
            .map(|item| item.virtual_path.clone())
            .collect()
    }

    /// Preservation record describing the cached result for `path`.
    pub fn preservation_record(&self, path: &VirtualPath) -> Option<PreservationRecord> {
        let item = self.cache.get(path)?;
        let result_type = if item.custom_string.is_some() {
            BuildResultType::CustomString
        } else if item.type_name.is_some() {
            BuildResultType::CompiledType
        } else {
            BuildResultType::Assembly
        };
        Some(PreservationRecord {
            virtual_path: item.virtual_path.clone(),
            assembly: item.assembly.name.clone(),
            type_name: item.type_name.clone(),
            result_type,
            custom_string: item.custom_string.clone(),
            hash: self.provider.content_hash(&item.virtual_path).ok(),
            file_dependencies: item.dependencies.clone(),
        })
    }

    fn context(&self) -> BuildContext<'_> {
        BuildContext {
            provider: self.provider.as_ref(),
            registry: self.registry.clone(),
            filter: self.filter.clone(),
            compilers: &self.compilers,
            config: &self.config,
        }
    }

    fn session(&self) -> MutexGuard<'_, BuildSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recompiles(&self) -> MutexGuard<'_, RecompileState> {
        self.recompiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: BuildEvent) {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner).clone();
        for hook in &hooks {
            hook(&event);
        }
    }

    fn on_build_stack(&self, path: &VirtualPath) -> bool {
        let key = cache_key(path);
        self.session().build_stack.iter().any(|p| cache_key(p) == key)
    }

    fn precompiled_record(&self, path: &VirtualPath) -> Option<&PreservationRecord> {
        self.precompiled.as_ref()?.get(path)
    }

    /// Runs with the compilation lock held.
    fn build_locked(
        &self,
        path: &VirtualPath,
        nested: bool,
    ) -> Result<Arc<BuildManagerCacheItem>, BuildError> {
        if let Some(item) = self.cache.get(path) {
            return Ok(item);
        }
        if let Some(item) = self.load_precompiled(path)? {
            return Ok(item);
        }
        if self.on_build_stack(path) {
            return Err(BuildError::CircularReference {
                virtual_path: path.clone(),
            });
        }

        self.session().build_stack.push(path.clone());
        let result = self.build_uncached(path, nested);
        self.session().build_stack.pop();
        result
    }

    /// Serve `path` from the precompiled deployment. `Ok(None)` means it
    /// has to be compiled.
    fn load_precompiled(
        &self,
        path: &VirtualPath,
    ) -> Result<Option<Arc<BuildManagerCacheItem>>, BuildError> {
        if self.precompiled.is_none() {
            return Ok(None);
        }
        let not_updatable = self.config.non_updatable_precompiled;
        let record = match self.precompiled_record(path) {
            Some(record) => record,
            None if not_updatable => {
                return Err(BuildError::PrecompiledAppNotUpdatable {
                    virtual_path: path.clone(),
                })
            }
            None => return Ok(None),
        };

        if !not_updatable {
            if let Some(hash) = &record.hash {
                if self.provider.content_hash(path).ok().as_ref() != Some(hash) {
                    debug!(path = %path, "precompiled result is stale");
                    return Ok(None);
                }
            }
        }
        let assembly = match self.compiler.load_assembly(&record.assembly) {
            Some(assembly) => assembly,
            None if not_updatable => {
                return Err(BuildError::PrecompiledAppNotUpdatable {
                    virtual_path: path.clone(),
                })
            }
            None => {
                warn!(path = %path, assembly = %record.assembly, "cannot load precompiled assembly");
                return Ok(None);
            }
        };

        let item = BuildManagerCacheItem {
            virtual_path: path.clone(),
            assembly: Arc::new(assembly),
            type_name: record.type_name.clone(),
            custom_string: record.custom_string.clone(),
            dependencies: record_dependencies(record),
        };
        debug!(path = %path, assembly = %record.assembly, "serving precompiled result");
        Ok(Some(self.store_item(item)))
    }

    fn build_uncached(
        &self,
        path: &VirtualPath,
        nested: bool,
    ) -> Result<Arc<BuildManagerCacheItem>, BuildError> {
        let is_theme = self.config.theme_directory(path).is_some();
        let exists = if is_theme {
            self.provider.directory_exists(path)
        } else {
            self.provider.file_exists(path)
        };
        if !exists {
            return Err(BuildError::NotFound {
                virtual_path: path.clone(),
            });
        }

        let ctx = self.context();
        let builder = DirectoryBuilder::new(&ctx, &self.extensions);
        let batch = self.config.batch
            && !nested
            && !is_theme
            && self.session().batched_dirs.insert(cache_key(&path.directory()));
        let skip = |p: &VirtualPath| {
            self.cache.contains(p) || self.on_build_stack(p) || self.precompiled_record(p).is_some()
        };

        let groups = builder.build(path, !batch, &skip)?;
        let mut requested_error = None;
        for group in groups {
            let master = group.master;
            let prefix = group.name_prefix.clone();
            if let Err(err) = self.compile_group(&ctx, group, path) {
                if master {
                    requested_error = Some(err);
                } else {
                    warn!(group = %prefix, error = %err, "group failed to compile");
                }
            }
        }
        if let Some(item) = self.cache.get(path) {
            return Ok(item);
        }

        let err = requested_error.unwrap_or_else(|| BuildError::NotFound {
            virtual_path: path.clone(),
        });
        if !batch || !matches!(err, BuildError::Compilation(_)) {
            return Err(err);
        }
        debug!(path = %path, "batch compilation failed, building the file alone");
        for group in builder.build(path, true, &skip)? {
            self.compile_group(&ctx, group, path)?;
        }
        self.cache.get(path).ok_or(err)
    }

    /// Compile one group into an assembly, retrying without the files the
    /// compiler blamed. A failure of the requested file ends the attempt.
    fn compile_group(
        &self,
        ctx: &BuildContext<'_>,
        group: BuildProviderGroup,
        requested: &VirtualPath,
    ) -> Result<(), BuildError> {
        let compiler_type = match &group.compiler_type {
            Some(compiler_type) => compiler_type.clone(),
            None => ctx.default_compiler()?,
        };
        let requested_key = cache_key(requested);
        let is_requested = |p: &dyn BuildProvider| cache_key(p.virtual_path()) == requested_key;

        let mut references: IndexSet<String> =
            self.config.referenced_assemblies.iter().cloned().collect();
        let mut providers = Vec::with_capacity(group.len());
        for provider in group.providers {
            match self.build_dependencies(provider.as_ref()) {
                Ok(assemblies) => {
                    references.extend(assemblies);
                    providers.push(provider);
                }
                Err(err) if is_requested(provider.as_ref()) => return Err(err),
                Err(err) => self.drop_provider(provider.virtual_path(), &err),
            }
        }
        references.extend(self.session().references.iter().cloned());
        self.charge_recompile(&providers);

        for attempt in 1..=MAX_COMPILE_ATTEMPTS {
            let mut builder =
                AssemblyBuilder::new(assembly_name(&group.name_prefix, &providers), compiler_type.clone());
            for reference in &references {
                builder.add_assembly_reference(reference);
            }
            let mut generated = Vec::with_capacity(providers.len());
            for provider in providers {
                match builder.add_provider(provider.as_ref(), ctx) {
                    Ok(()) => generated.push(provider),
                    Err(err) if is_requested(provider.as_ref()) => return Err(err),
                    Err(err) => self.drop_provider(provider.virtual_path(), &err),
                }
            }
            providers = generated;
            if providers.is_empty() {
                break;
            }

            match builder.compile(self.compiler.as_ref(), self.config.debug) {
                Ok(assembly) => {
                    self.store(assembly, &providers, attempt);
                    return Ok(());
                }
                Err(err) => {
                    let failed = builder.failed_providers(&err);
                    if attempt == MAX_COMPILE_ATTEMPTS
                        || failed.is_empty()
                        || failed.iter().any(|p| cache_key(p) == requested_key)
                    {
                        return Err(err.into());
                    }
                    let reason = err.to_string();
                    let (dropped, kept): (Vec<_>, Vec<_>) = providers
                        .into_iter()
                        .partition(|p| failed.contains(p.virtual_path()));
                    for provider in &dropped {
                        warn!(
                            path = %provider.virtual_path(),
                            assembly = %err.assembly,
                            attempt,
                            "leaving file out after compilation errors"
                        );
                        self.emit(BuildEvent::ProviderDropped {
                            virtual_path: provider.virtual_path().clone(),
                            reason: reason.clone(),
                        });
                    }
                    providers = kept;
                }
            }
        }
        Ok(())
    }

    /// Build the markup files `provider` depends on that are not compiled
    /// yet. Returns the assemblies holding them.
    fn build_dependencies(&self, provider: &dyn BuildProvider) -> Result<Vec<String>, BuildError> {
        let mut assemblies = Vec::new();
        for dependency in provider.dependencies() {
            if self.extensions.kind_for(dependency).is_none() {
                continue;
            }
            let item = self.get_cache_item(dependency)?;
            assemblies.push(item.assembly.name.clone());
        }
        Ok(assemblies)
    }

    fn drop_provider(&self, path: &VirtualPath, err: &BuildError) {
        warn!(path = %path, error = %err, "leaving file out of the batch");
        self.emit(BuildEvent::ProviderDropped {
            virtual_path: path.clone(),
            reason: err.to_string(),
        });
    }

    /// Count a build of files compiled before. Past the budget every
    /// compiled result is discarded.
    fn charge_recompile(&self, providers: &[Box<dyn BuildProvider>]) {
        let restart = {
            let mut state = self.recompiles();
            let update = providers
                .iter()
                .any(|p| state.compiled.contains(&cache_key(p.virtual_path())));
            if update {
                state.count += 1;
            }
            if state.count > self.config.num_recompiles_before_app_restart {
                let recompiles = state.count;
                *state = RecompileState::default();
                Some(recompiles)
            } else {
                None
            }
        };
        if let Some(recompiles) = restart {
            warn!(
                recompiles,
                limit = self.config.num_recompiles_before_app_restart,
                "recompile limit exceeded, discarding compiled results"
            );
            self.emit(BuildEvent::AppRestart { recompiles });
            self.cache.clear(RemovalReason::AppRestart);
        }
    }

    fn store(
        &self,
        assembly: CompiledAssembly,
        providers: &[Box<dyn BuildProvider>],
        attempt: usize,
    ) {
        let assembly = Arc::new(assembly);
        info!(
            assembly = %assembly.name,
            members = providers.len(),
            attempt,
            "compiled assembly"
        );
        self.recompiles()
            .compiled
            .extend(providers.iter().map(|p| cache_key(p.virtual_path())));
        self.session().references.insert(assembly.name.clone());

        for provider in providers {
            self.store_item(BuildManagerCacheItem {
                virtual_path: provider.virtual_path().clone(),
                assembly: assembly.clone(),
                type_name: provider.generated_type_name(),
                custom_string: provider.custom_string(&assembly),
                dependencies: watch_list(provider.as_ref()),
            });
        }
        self.emit(BuildEvent::Compiled {
            assembly: assembly.name.clone(),
            members: providers.iter().map(|p| p.virtual_path().clone()).collect(),
            attempt,
        });
    }

    fn store_item(&self, item: BuildManagerCacheItem) -> Arc<BuildManagerCacheItem> {
        for dependency in &item.dependencies {
            self.monitor.start_monitoring(dependency);
        }
        self.cache.insert(item)
    }
}

/// Route file changes from `monitor` into `cache`, and release the watches
/// of every entry leaving it.
fn connect_monitor(cache: &Arc<BuildCache>, monitor: &Arc<dyn FileChangeMonitor>) {
    let weak_cache = Arc::downgrade(cache);
    monitor.subscribe(Arc::new(move |path| {
        if let Some(cache) = weak_cache.upgrade() {
            cache.invalidate(path);
        }
    }));

    let weak_monitor = Arc::downgrade(monitor);
    cache.subscribe_removed(Arc::new(move |item, _| {
        if let Some(monitor) = weak_monitor.upgrade() {
            for dependency in &item.dependencies {
                monitor.stop_monitoring(dependency);
            }
        }
    }));
}

/// The provider's own path followed by its dependencies.
fn watch_list(provider: &dyn BuildProvider) -> Vec<VirtualPath> {
    let mut paths = IndexSet::new();
    paths.insert(provider.virtual_path().clone());
    paths.extend(provider.dependencies().iter().cloned());
    paths.into_iter().collect()
}

fn record_dependencies(record: &PreservationRecord) -> Vec<VirtualPath> {
    if record.file_dependencies.is_empty() {
        vec![record.virtual_path.clone()]
    } else {
        record.file_dependencies.clone()
    }
}

/// Assembly name for a group: its prefix plus a digest of the members, so a
/// retry with fewer files gets a fresh name.
fn assembly_name(prefix: &str, providers: &[Box<dyn BuildProvider>]) -> String {
    let members: Vec<String> = providers.iter().map(|p| cache_key(p.virtual_path())).collect();
    format!("{}.{:08x}", prefix, xxh3_64(members.join("|").as_bytes()) as u32)
}
