use std::io;
use std::path::{Path, PathBuf};

use super::path::VirtualPath;
use crate::checksum;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
}

/// Access to application files by virtual path.
///
/// Every read the compiler performs goes through this seam, so the
/// application can live on disk or entirely in memory.
pub trait VirtualPathProvider: Send + Sync {
    fn file_exists(&self, path: &VirtualPath) -> bool;

    fn directory_exists(&self, path: &VirtualPath) -> bool;

    fn read_file(&self, path: &VirtualPath) -> io::Result<String>;

    /// Entries of a directory, sorted by name.
    fn list_directory(&self, path: &VirtualPath) -> io::Result<Vec<DirectoryEntry>>;

    /// Physical location backing a virtual path, if there is one.
    fn map_path(&self, _path: &VirtualPath) -> Option<PathBuf> {
        None
    }

    /// Inverse of [`VirtualPathProvider::map_path`].
    fn virtual_path_for(&self, _physical: &Path) -> Option<VirtualPath> {
        None
    }

    /// Resolve a physical-style include path relative to `directory` and
    /// check that the target stays inside the application root.
    ///
    /// Returns `Ok(None)` when the target escapes the root.
    fn resolve_contained(
        &self,
        directory: &VirtualPath,
        relative: &str,
    ) -> io::Result<Option<VirtualPath>> {
        Ok(directory.combine(relative))
    }

    /// Content digest used to detect changed files.
    fn content_hash(&self, path: &VirtualPath) -> io::Result<String> {
        Ok(checksum::content_hash(&self.read_file(path)?))
    }
}

pub(crate) fn not_found(path: &VirtualPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("The file '{}' does not exist.", path),
    )
}
