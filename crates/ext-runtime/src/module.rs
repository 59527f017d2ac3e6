//! The contract an extension module implements to join the runtime.
//!
//! Modules run in the host's address space and trust domain; there is no
//! process sandboxing. Callbacks are invoked synchronously and must return
//! promptly.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::hooks::{Capability, HookKind};
use crate::manifest::ExtensionManifest;
use crate::registry::ExtensionRegistry;

/// Error type for module-supplied callbacks.
pub type ModuleError = Box<dyn std::error::Error + Send + Sync>;

/// Context handed to a module's initialize callback.
pub struct InitContext<'a> {
    /// The registry the module was registered with.
    pub registry: &'a ExtensionRegistry,
    /// The hook kinds this module advertised.
    pub hooks: &'a [HookKind],
    /// The capabilities this module declared.
    pub capabilities: &'a [Capability],
}

/// A self-contained module registered with the runtime.
///
/// All methods beyond `name`/`version` are optional; the defaults declare
/// no hooks, no capabilities, and trivially succeeding callbacks.
pub trait ExtensionModule: Send + Sync {
    /// Unique extension name, matching the manifest.
    fn name(&self) -> &str;

    /// Semver version string, matching the manifest.
    fn version(&self) -> &str;

    /// Called once during activation. Must return promptly; the runtime
    /// does not preempt a stalled callback.
    fn initialize(&self, ctx: &InitContext<'_>) -> std::result::Result<(), ModuleError> {
        let _ = ctx;
        Ok(())
    }

    /// Called when the extension is deactivated, suspended, or uninstalled
    /// while active. Failures are logged, never propagated.
    fn deactivate(&self) -> std::result::Result<(), ModuleError> {
        Ok(())
    }

    /// Whether this module participates in the given hook kind.
    fn implements(&self, kind: HookKind) -> bool {
        let _ = kind;
        false
    }

    /// The capabilities this module contributes.
    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }
}

/// Produces a module object for an installed extension directory.
///
/// The host decides how manifests map to code: built-in modules, embedded
/// scripting, or anything else. The runtime only needs the resulting
/// [`ExtensionModule`].
pub trait ModuleLoader: Send + Sync {
    fn load(&self, manifest: &ExtensionManifest, dir: &Path) -> Result<Arc<dyn ExtensionModule>>;
}

/// A module backed only by its manifest: no hooks, no capabilities, and
/// callbacks that succeed trivially.
///
/// Useful for tests and for hosts whose extensions are pure capability
/// declarations.
#[derive(Debug, Clone)]
pub struct ManifestModule {
    name: String,
    version: String,
    hooks: Vec<HookKind>,
}

impl ManifestModule {
    pub fn new(manifest: &ExtensionManifest) -> Self {
        Self {
            name: manifest.name().to_string(),
            version: manifest.extension.version.clone(),
            hooks: manifest
                .hooks()
                .iter()
                .filter_map(|s| HookKind::parse(s))
                .collect(),
        }
    }
}

impl ExtensionModule for ManifestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn implements(&self, kind: HookKind) -> bool {
        self.hooks.contains(&kind)
    }
}

/// A loader that wraps every manifest in a [`ManifestModule`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestModuleLoader;

impl ModuleLoader for ManifestModuleLoader {
    fn load(&self, manifest: &ExtensionManifest, _dir: &Path) -> Result<Arc<dyn ExtensionModule>> {
        Ok(Arc::new(ManifestModule::new(manifest)))
    }
}
