//! Extension manifest parsing for `extension.toml` files.
//!
//! A manifest declares an extension's identity, its dependency ranges, the
//! permissions it requests, and the hook kinds it supports. The canonical
//! filename is [`MANIFEST_FILENAME`](crate::MANIFEST_FILENAME)
//! (`extension.toml`).
//!
//! # Example TOML
//!
//! ```toml
//! [extension]
//! name = "markdown-tools"
//! version = "1.2.0"
//! description = "Markdown document processors and chat tools"
//! author = "someone"
//! permissions = ["document-read", "document-write"]
//! optional_permissions = ["network-access"]
//! hooks = ["document-processing", "chat"]
//!
//! [dependencies]
//! core = ">=1.0.0"
//! parent = "^1.0.0"
//! ```
//!
//! The `core` dependency key is reserved: it constrains the host itself and
//! is never resolved against the registry.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved dependency key referring to the host runtime itself.
pub const CORE_DEPENDENCY: &str = "core";

/// Complete extension manifest loaded from `extension.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExtensionManifest {
    /// The `[extension]` section.
    pub extension: ExtensionMeta,
    /// Dependency ranges keyed by extension name (may include `"core"`).
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// The `[extension]` section of a manifest.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExtensionMeta {
    /// Extension name (e.g., "markdown-tools").
    pub name: String,
    /// Semver version string.
    pub version: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Author attribution.
    #[serde(default)]
    pub author: Option<String>,
    /// Required permission names.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Optional permission names.
    #[serde(default)]
    pub optional_permissions: Vec<String>,
    /// Supported hook kind names.
    #[serde(default)]
    pub hooks: Vec<String>,
}

impl ExtensionManifest {
    /// Parse an extension manifest from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read and parse an extension manifest from a file path.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ManifestNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(&content)
    }

    /// Read the manifest from its canonical filename inside `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::from_path(&dir.join(crate::MANIFEST_FILENAME))
    }

    /// Serialize the manifest back to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ManifestSerialize(e.to_string()))
    }

    /// The extension name.
    pub fn name(&self) -> &str {
        &self.extension.name
    }

    /// The parsed semver version.
    ///
    /// Only valid after [`validate`](Self::validate) has succeeded, which
    /// every constructor enforces.
    pub fn version(&self) -> semver::Version {
        semver::Version::parse(&self.extension.version)
            .unwrap_or_else(|_| semver::Version::new(0, 0, 0))
    }

    /// Dependencies excluding the reserved `"core"` key, with parsed ranges.
    pub fn runtime_dependencies(&self) -> Vec<(String, semver::VersionReq)> {
        self.dependencies
            .iter()
            .filter(|(name, _)| name.as_str() != CORE_DEPENDENCY)
            .filter_map(|(name, range)| {
                semver::VersionReq::parse(range)
                    .ok()
                    .map(|req| (name.clone(), req))
            })
            .collect()
    }

    /// Required permission names.
    pub fn permissions(&self) -> &[String] {
        &self.extension.permissions
    }

    /// Optional permission names.
    pub fn optional_permissions(&self) -> &[String] {
        &self.extension.optional_permissions
    }

    /// Declared hook kind names.
    pub fn hooks(&self) -> &[String] {
        &self.extension.hooks
    }

    /// Names of dependencies excluding `"core"`.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies
            .keys()
            .filter(|name| name.as_str() != CORE_DEPENDENCY)
            .cloned()
            .collect()
    }

    /// Validate the manifest fields.
    ///
    /// Constructors run this; the registry re-runs it for manifests built
    /// programmatically.
    pub(crate) fn validate(&self) -> Result<()> {
        let name = &self.extension.name;
        if name.is_empty() {
            return Err(Error::InvalidName {
                name: name.clone(),
                reason: "extension name must not be empty".to_string(),
            });
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidName {
                name: name.clone(),
                reason: "extension name must contain only alphanumeric characters, hyphens, or underscores".to_string(),
            });
        }

        semver::Version::parse(&self.extension.version).map_err(|e| Error::InvalidVersion {
            version: self.extension.version.clone(),
            reason: e.to_string(),
        })?;

        // Every declared range must parse, including the reserved core range
        for (dep, range) in &self.dependencies {
            semver::VersionReq::parse(range).map_err(|e| Error::InvalidRange {
                dependency: dep.clone(),
                range: range.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}
