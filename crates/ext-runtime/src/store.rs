//! Durable permission state, persisted as a single JSON document.
//!
//! The store is rewritten atomically after every mutation. Shape:
//!
//! ```json
//! {
//!   "extensions": {
//!     "markdown-tools": {
//!       "granted_permissions": ["document-read"],
//!       "permission_history": [
//!         { "permission": "document-read", "action": "granted",
//!           "timestamp": "2026-01-01T00:00:00Z", "reason": null }
//!       ]
//!     }
//!   },
//!   "policies": { "global_deny_list": [], "require_approval_for": [],
//!                 "auto_grant_safe": true, "remember_decisions": true }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::permission::{Permission, PermissionHistoryEntry, PermissionPolicy};

/// Maximum history entries retained per extension; oldest evicted first.
pub const HISTORY_CAP: usize = 100;

/// Granted permissions and bounded history for one extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtensionGrants {
    #[serde(default)]
    pub granted_permissions: BTreeSet<Permission>,
    #[serde(default)]
    pub permission_history: Vec<PermissionHistoryEntry>,
}

impl ExtensionGrants {
    /// Append a history entry, evicting the oldest past [`HISTORY_CAP`].
    pub fn push_history(&mut self, entry: PermissionHistoryEntry) {
        self.permission_history.push(entry);
        if self.permission_history.len() > HISTORY_CAP {
            let excess = self.permission_history.len() - HISTORY_CAP;
            self.permission_history.drain(..excess);
        }
    }
}

/// The whole persisted permission state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PermissionStore {
    #[serde(default)]
    pub extensions: BTreeMap<String, ExtensionGrants>,
    #[serde(default)]
    pub policies: PermissionPolicy,
}

impl PermissionStore {
    /// Load the store from `path`; a missing file yields the default store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = ext_fs::read_text(path)?;
        serde_json::from_str(&content).map_err(|e| Error::StoreParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Persist the store to `path` with an atomic replace.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| Error::StoreSerialize(e.to_string()))?;
        ext_fs::write_text(path, &json)?;
        Ok(())
    }

    /// Mutable grants for `name`, created on first touch.
    pub fn grants_mut(&mut self, name: &str) -> &mut ExtensionGrants {
        self.extensions.entry(name.to_string()).or_default()
    }
}
