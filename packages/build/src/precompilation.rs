//! Preservation records
//!
//! A precompiled deployment ships one `*.compiled` JSON record per build
//! result. They are read once when the build manager starts; a path with a
//! record is served from its assembly without compiling.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use aspx_compiler::VirtualPath;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::cache_key;
use crate::diagnostics::BuildError;

/// What a record's result is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildResultType {
    Assembly,
    CompiledType,
    CustomString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreservationRecord {
    pub virtual_path: VirtualPath,
    pub assembly: String,
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    pub result_type: BuildResultType,
    #[serde(default)]
    pub custom_string: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub file_dependencies: Vec<VirtualPath>,
}

impl PreservationRecord {
    /// Write the record as `<dir>/<mangled virtual path>.compiled`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, BuildError> {
        let file_name: String = self
            .virtual_path
            .as_str()
            .trim_start_matches('/')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        let path = dir.join(format!("{}.compiled", file_name));
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::Config(e.to_string()))?;
        fs::write(&path, json).map_err(|source| BuildError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Every preservation record of a deployment, by virtual path.
#[derive(Debug, Clone, Default)]
pub struct PrecompilationData {
    records: HashMap<String, PreservationRecord>,
}

impl PrecompilationData {
    pub fn load(dir: &Path) -> Result<Self, BuildError> {
        let pattern = dir.join("*.compiled");
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| BuildError::Config(format!("{}: {}", pattern, e)))?;

        let mut data = PrecompilationData::default();
        for entry in entries {
            let path = entry.map_err(|e| BuildError::Io {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            let content = fs::read_to_string(&path).map_err(|source| BuildError::Io {
                path: path.clone(),
                source,
            })?;
            let record: PreservationRecord = serde_json::from_str(&content)
                .map_err(|e| BuildError::Config(format!("{}: {}", path.display(), e)))?;
            debug!(path = %record.virtual_path, assembly = %record.assembly, "loaded preservation record");
            data.insert(record);
        }
        Ok(data)
    }

    pub fn insert(&mut self, record: PreservationRecord) {
        self.records.insert(cache_key(&record.virtual_path), record);
    }

    pub fn get(&self, path: &VirtualPath) -> Option<&PreservationRecord> {
        self.records.get(&cache_key(path))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
