//! Managed storage layout for installed extensions.
//!
//! The host owns a single storage root:
//!
//! ```text
//! <root>/
//!   extensions/<name>/   # one directory per installed extension
//!   permissions.json     # durable permission grants and policies
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Paths under the host's managed storage root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at `root`. No directories are created.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one subdirectory per installed extension.
    pub fn extensions_dir(&self) -> PathBuf {
        self.root.join("extensions")
    }

    /// Managed directory for a single extension.
    pub fn extension_dir(&self, name: &str) -> PathBuf {
        self.extensions_dir().join(name)
    }

    /// Path of the durable permission store.
    pub fn permissions_file(&self) -> PathBuf {
        self.root.join("permissions.json")
    }

    /// Ensure the storage root and extensions directory exist.
    pub fn ensure(&self) -> Result<()> {
        let dir = self.extensions_dir();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        Ok(())
    }

    /// List the names of extension directories currently present.
    pub fn installed_names(&self) -> Result<Vec<String>> {
        let dir = self.extensions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
