use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::path::VirtualPath;
use super::provider::{not_found, DirectoryEntry, VirtualPathProvider};

/// In-memory application tree. Directories exist implicitly as soon as a
/// file below them exists. Clones share the same tree.
#[derive(Clone, Default)]
pub struct MemoryPathProvider {
    files: Arc<Mutex<BTreeMap<VirtualPath, String>>>,
}

impl MemoryPathProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_with_files(files: Vec<(&str, &str)>) -> Self {
        let provider = Self::new();
        for (path, content) in files {
            provider.write_file(path, content);
        }
        provider
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<VirtualPath, String>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write_file(&self, path: &str, content: &str) {
        self.lock()
            .insert(VirtualPath::new(path), content.to_string());
    }

    pub fn remove_file(&self, path: &str) -> bool {
        self.lock().remove(&VirtualPath::new(path)).is_some()
    }
}

impl VirtualPathProvider for MemoryPathProvider {
    fn file_exists(&self, path: &VirtualPath) -> bool {
        self.lock().contains_key(path)
    }

    fn directory_exists(&self, path: &VirtualPath) -> bool {
        if path.is_root() {
            return true;
        }
        self.lock()
            .keys()
            .any(|file| file != path && file.is_within(path))
    }

    fn read_file(&self, path: &VirtualPath) -> io::Result<String> {
        self.lock().get(path).cloned().ok_or_else(|| not_found(path))
    }

    fn list_directory(&self, path: &VirtualPath) -> io::Result<Vec<DirectoryEntry>> {
        if !self.directory_exists(path) {
            return Err(not_found(path));
        }
        let files = self.lock();
        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        let depth = path.segments().count();
        for file in files.keys() {
            if file == path || !file.is_within(path) {
                continue;
            }
            let segments: Vec<&str> = file.segments().collect();
            if segments.len() <= depth {
                continue;
            }
            let is_directory = segments.len() > depth + 1;
            let entry = entries.entry(segments[depth].to_string()).or_insert(false);
            *entry |= is_directory;
        }
        Ok(entries
            .into_iter()
            .map(|(name, is_directory)| DirectoryEntry { name, is_directory })
            .collect())
    }
}
