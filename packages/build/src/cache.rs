//! Build result cache
//!
//! Compiled results keyed by virtual path, each watching its own file and
//! its dependencies. A change to any watched file removes exactly the
//! entries that depend on it and tells the removal subscribers. Nothing is
//! rebuilt here: the next request for the path misses and compiles again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use aspx_compiler::{VirtualPath, VirtualPathProvider};
use tracing::debug;

use crate::compiler::CompiledAssembly;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildManagerCacheItem {
    pub virtual_path: VirtualPath,
    pub assembly: Arc<CompiledAssembly>,
    pub type_name: Option<String>,
    pub custom_string: Option<String>,
    /// Files whose change invalidates this item, its own file included.
    pub dependencies: Vec<VirtualPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// A watched file changed.
    DependencyChanged,
    /// The compiled-code universe was reset.
    AppRestart,
    /// A newer result for the same path was stored.
    Replaced,
}

pub type RemovalCallback = Arc<dyn Fn(&BuildManagerCacheItem, RemovalReason) + Send + Sync>;

pub(crate) fn cache_key(path: &VirtualPath) -> String {
    path.as_str().to_ascii_lowercase()
}

#[derive(Default)]
struct CacheInner {
    items: HashMap<String, Arc<BuildManagerCacheItem>>,
    /// Watched file to the keys of the items depending on it.
    watchers: HashMap<String, HashSet<String>>,
}

impl CacheInner {
    fn unwatch(&mut self, key: &str, item: &BuildManagerCacheItem) {
        for dependency in &item.dependencies {
            let watched = cache_key(dependency);
            if let Some(keys) = self.watchers.get_mut(&watched) {
                keys.remove(key);
                if keys.is_empty() {
                    self.watchers.remove(&watched);
                }
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<Arc<BuildManagerCacheItem>> {
        let item = self.items.remove(key)?;
        self.unwatch(key, &item);
        Some(item)
    }
}

#[derive(Default)]
pub struct BuildCache {
    inner: RwLock<CacheInner>,
    subscribers: RwLock<Vec<RemovalCallback>>,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &VirtualPath) -> Option<Arc<BuildManagerCacheItem>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.get(&cache_key(path)).cloned()
    }

    pub fn contains(&self, path: &VirtualPath) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `item`, replacing any earlier entry for the same path.
    pub fn insert(&self, item: BuildManagerCacheItem) -> Arc<BuildManagerCacheItem> {
        let key = cache_key(&item.virtual_path);
        let item = Arc::new(item);
        let replaced = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let replaced = inner.remove(&key);
            for dependency in &item.dependencies {
                inner
                    .watchers
                    .entry(cache_key(dependency))
                    .or_default()
                    .insert(key.clone());
            }
            inner.items.insert(key, item.clone());
            replaced
        };
        if let Some(old) = replaced {
            self.notify(&[old], RemovalReason::Replaced);
        }
        item
    }

    /// Drop every entry watching `changed`. Returns the removed entries.
    pub fn invalidate(&self, changed: &VirtualPath) -> Vec<Arc<BuildManagerCacheItem>> {
        let removed: Vec<Arc<BuildManagerCacheItem>> = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let keys = inner.watchers.remove(&cache_key(changed)).unwrap_or_default();
            let mut keys: Vec<String> = keys.into_iter().collect();
            keys.sort();
            keys.iter().filter_map(|key| inner.remove(key)).collect()
        };
        if !removed.is_empty() {
            debug!(changed = %changed, removed = removed.len(), "invalidated cache entries");
        }
        self.notify(&removed, RemovalReason::DependencyChanged);
        removed
    }

    /// Empty the cache.
    pub fn clear(&self, reason: RemovalReason) -> Vec<Arc<BuildManagerCacheItem>> {
        let removed: Vec<Arc<BuildManagerCacheItem>> = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            inner.watchers.clear();
            let mut items: Vec<_> = inner.items.drain().collect();
            items.sort_by(|a, b| a.0.cmp(&b.0));
            items.into_iter().map(|(_, item)| item).collect()
        };
        self.notify(&removed, reason);
        removed
    }

    /// Every file some entry watches.
    pub fn watched_paths(&self) -> Vec<VirtualPath> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<VirtualPath> = inner
            .items
            .values()
            .flat_map(|item| item.dependencies.iter().cloned())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    pub fn subscribe_removed(&self, callback: RemovalCallback) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    fn notify(&self, removed: &[Arc<BuildManagerCacheItem>], reason: RemovalReason) {
        if removed.is_empty() {
            return;
        }
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for item in removed {
            for callback in &subscribers {
                callback(item, reason);
            }
        }
    }
}

pub type ChangeCallback = Arc<dyn Fn(&VirtualPath) + Send + Sync>;

/// Source of file change notifications.
pub trait FileChangeMonitor: Send + Sync {
    /// Report changes to `path` from now on. Calls for the same path nest.
    fn start_monitoring(&self, path: &VirtualPath);

    /// Undo one `start_monitoring`. The path is dropped when none is left.
    fn stop_monitoring(&self, path: &VirtualPath);

    fn subscribe(&self, callback: ChangeCallback);
}

#[derive(Default)]
struct Callbacks(RwLock<Vec<ChangeCallback>>);

impl Callbacks {
    fn push(&self, callback: ChangeCallback) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    fn fire(&self, path: &VirtualPath) {
        let callbacks = self.0.read().unwrap_or_else(PoisonError::into_inner).clone();
        for callback in &callbacks {
            callback(path);
        }
    }
}

/// Changes are reported by calling [`ManualChangeMonitor::notify`].
#[derive(Default)]
pub struct ManualChangeMonitor {
    watched: Mutex<HashMap<String, usize>>,
    callbacks: Callbacks,
}

impl ManualChangeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_monitoring(&self, path: &VirtualPath) -> bool {
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&cache_key(path))
    }

    pub fn monitored_count(&self) -> usize {
        self.watched.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Report a change to `path`. Returns false, firing nothing, if the path
    /// is not monitored.
    pub fn notify(&self, path: &VirtualPath) -> bool {
        let watched = self.is_monitoring(path);
        if watched {
            self.callbacks.fire(path);
        }
        watched
    }
}

impl FileChangeMonitor for ManualChangeMonitor {
    fn start_monitoring(&self, path: &VirtualPath) {
        *self
            .watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cache_key(path))
            .or_insert(0) += 1;
    }

    fn stop_monitoring(&self, path: &VirtualPath) {
        let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
        let key = cache_key(path);
        if let Some(count) = watched.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                watched.remove(&key);
            }
        }
    }

    fn subscribe(&self, callback: ChangeCallback) {
        self.callbacks.push(callback);
    }
}

/// Detects changes by comparing content digests on every
/// [`PollingChangeMonitor::poll`]. A file that disappears or appears counts
/// as changed.
pub struct PollingChangeMonitor {
    provider: Arc<dyn VirtualPathProvider>,
    digests: Mutex<HashMap<VirtualPath, PolledFile>>,
    callbacks: Callbacks,
}

struct PolledFile {
    digest: Option<String>,
    watchers: usize,
}

impl PollingChangeMonitor {
    pub fn new(provider: Arc<dyn VirtualPathProvider>) -> Self {
        PollingChangeMonitor {
            provider,
            digests: Mutex::new(HashMap::new()),
            callbacks: Callbacks::default(),
        }
    }

    fn digest(&self, path: &VirtualPath) -> Option<String> {
        self.provider.content_hash(path).ok()
    }

    /// Check every monitored file and report the changed ones.
    pub fn poll(&self) -> Vec<VirtualPath> {
        let changed: Vec<VirtualPath> = {
            let mut digests = self.digests.lock().unwrap_or_else(PoisonError::into_inner);
            let mut changed = Vec::new();
            for (path, file) in digests.iter_mut() {
                let current = self.digest(path);
                if current != file.digest {
                    file.digest = current;
                    changed.push(path.clone());
                }
            }
            changed.sort();
            changed
        };
        for path in &changed {
            self.callbacks.fire(path);
        }
        changed
    }
}

impl FileChangeMonitor for PollingChangeMonitor {
    fn start_monitoring(&self, path: &VirtualPath) {
        let mut digests = self.digests.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = digests.get_mut(path) {
            file.watchers += 1;
            return;
        }
        let digest = self.digest(path);
        digests.insert(
            path.clone(),
            PolledFile {
                digest,
                watchers: 1,
            },
        );
    }

    fn stop_monitoring(&self, path: &VirtualPath) {
        let mut digests = self.digests.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = digests.get_mut(path) {
            file.watchers -= 1;
            if file.watchers == 0 {
                digests.remove(path);
            }
        }
    }

    fn subscribe(&self, callback: ChangeCallback) {
        self.callbacks.push(callback);
    }
}
