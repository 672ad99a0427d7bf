use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::path::VirtualPath;
use super::provider::{DirectoryEntry, VirtualPathProvider};

/// Serves virtual paths from a directory on disk.
pub struct PhysicalPathProvider {
    root: PathBuf,
}

impl PhysicalPathProvider {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        Ok(PhysicalPathProvider {
            root: fs::canonicalize(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn physical(&self, path: &VirtualPath) -> PathBuf {
        let mut physical = self.root.clone();
        for segment in path.segments() {
            physical.push(segment);
        }
        physical
    }

    fn to_virtual(&self, physical: &Path) -> Option<VirtualPath> {
        let relative = physical.strip_prefix(&self.root).ok()?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        Some(VirtualPath::new(format!("/{}", relative)))
    }
}

impl VirtualPathProvider for PhysicalPathProvider {
    fn file_exists(&self, path: &VirtualPath) -> bool {
        self.physical(path).is_file()
    }

    fn directory_exists(&self, path: &VirtualPath) -> bool {
        self.physical(path).is_dir()
    }

    fn read_file(&self, path: &VirtualPath) -> io::Result<String> {
        fs::read_to_string(self.physical(path))
    }

    fn list_directory(&self, path: &VirtualPath) -> io::Result<Vec<DirectoryEntry>> {
        let mut result = Vec::new();
        for entry in fs::read_dir(self.physical(path))? {
            let entry = entry?;
            result.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_directory: entry.file_type()?.is_dir(),
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    fn map_path(&self, path: &VirtualPath) -> Option<PathBuf> {
        Some(self.physical(path))
    }

    fn virtual_path_for(&self, physical: &Path) -> Option<VirtualPath> {
        self.to_virtual(physical)
    }

    /// Canonicalizes the target's parent directory on disk, following
    /// symlinks, and requires it to stay under the canonical root.
    fn resolve_contained(
        &self,
        directory: &VirtualPath,
        relative: &str,
    ) -> io::Result<Option<VirtualPath>> {
        let joined = self.physical(directory).join(relative.replace('\\', "/"));
        let file_name = match joined.file_name() {
            Some(name) if !relative.ends_with("..") => name.to_os_string(),
            _ => return Ok(None),
        };
        let parent = match joined.parent() {
            Some(parent) => parent,
            None => return Ok(None),
        };
        let parent = fs::canonicalize(parent)?;
        if !parent.starts_with(&self.root) {
            return Ok(None);
        }
        Ok(self.to_virtual(&parent.join(file_name)))
    }
}
