//! Installing, uninstalling, and loading extensions from managed storage.
//!
//! Installation copies a source directory into the storage layout, registers
//! the loaded module, and activates it unless told otherwise. Loading walks
//! managed storage at startup and registers everything found, dependencies
//! first.

use std::path::Path;
use std::sync::{Arc, PoisonError};

use ext_fs::StorageLayout;

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::lifecycle::{DeactivateOptions, LifecycleManager, LifecycleState, NameLocks};
use crate::manifest::ExtensionManifest;
use crate::module::ModuleLoader;
use crate::registry::{ExtensionRecord, ExtensionRegistry};
use crate::resolver::{plan_load_order, scan_storage};

/// Options for [`Installer::install`].
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Activate immediately after installing. On by default.
    pub activate: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self { activate: true }
    }
}

/// Copies extension directories into managed storage and wires them into
/// the registry and lifecycle machine.
pub struct Installer {
    layout: StorageLayout,
    registry: Arc<ExtensionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    events: Arc<EventBus>,
    loader: Arc<dyn ModuleLoader>,
    /// Serializes install/uninstall per extension name.
    locks: NameLocks,
}

impl Installer {
    pub fn new(
        layout: StorageLayout,
        registry: Arc<ExtensionRegistry>,
        lifecycle: Arc<LifecycleManager>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let events = Arc::clone(registry.events());
        Self {
            layout,
            registry,
            lifecycle,
            events,
            loader,
            locks: NameLocks::default(),
        }
    }

    /// The storage layout this installer manages.
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Install an extension from `src_dir`.
    ///
    /// The source must contain a valid manifest. An already-installed name
    /// is an upgrade: the new version must be strictly greater and the old
    /// copy is force-deactivated before its files are replaced.
    pub fn install(&self, src_dir: &Path, opts: &InstallOptions) -> Result<ExtensionRecord> {
        if !src_dir.is_dir() {
            return Err(Error::InvalidSource {
                name: src_dir.display().to_string(),
                reason: "source is not a directory".to_string(),
            });
        }
        let manifest = ExtensionManifest::from_dir(src_dir)?;
        let name = manifest.name().to_string();
        let version = manifest.version();

        // Version check and file copy commit together, per name
        let name_lock = self.locks.acquire(&name);
        let _guard = name_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = self.registry.version_of(&name) {
            if version <= existing {
                return Err(Error::InvalidVersion {
                    version: version.to_string(),
                    reason: format!(
                        "'{name}' is already installed at {existing}, upgrade requires a strictly greater version"
                    ),
                });
            }
            self.lifecycle.deactivate(
                &name,
                DeactivateOptions {
                    force: true,
                    suspend: false,
                    reason: Some(format!("upgrading to {version}")),
                },
            )?;
            if let Err(e) =
                self.lifecycle
                    .update_state(&name, LifecycleState::Updating, Some("upgrading"))
            {
                tracing::debug!("skipping updating transition for '{name}': {e}");
            }
        }

        self.layout.ensure()?;
        let dest = self.layout.extension_dir(&name);
        if dest.exists() {
            ext_fs::remove_dir_best_effort(&dest);
        }
        ext_fs::copy_dir_recursive(src_dir, &dest)?;

        let module = self.loader.load(&manifest, &dest)?;
        let record = self.registry.register(module, manifest)?;
        self.lifecycle.record_install(&name, None);
        self.events.emit(&Event::Installed {
            name: name.clone(),
            version,
        });

        if opts.activate {
            self.lifecycle.activate(&name)?;
        }
        Ok(record)
    }

    /// Remove an extension completely: lifecycle, registry, and files.
    ///
    /// The extension is force-deactivated first so its deactivate callback
    /// runs. File removal is best-effort; a failure is logged, never fatal.
    pub fn uninstall(&self, name: &str) -> Result<()> {
        let name_lock = self.locks.acquire(name);
        let _guard = name_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.registry.contains(name) {
            return Err(Error::UnknownExtension(name.to_string()));
        }

        self.lifecycle.deactivate(
            name,
            DeactivateOptions {
                force: true,
                suspend: false,
                reason: Some("uninstalling".to_string()),
            },
        )?;
        self.lifecycle
            .update_state(name, LifecycleState::Uninstalling, None)?;

        self.registry.unregister(name);
        self.lifecycle.remove(name);
        ext_fs::remove_dir_best_effort(&self.layout.extension_dir(name));
        self.events.emit(&Event::Uninstalled {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Load every extension found in managed storage, dependencies first.
    ///
    /// Broken directories are skipped with a warning; one bad extension
    /// never prevents the rest from loading. Returns the names that were
    /// registered, in load order.
    pub fn load_installed(&self, activate: bool) -> Result<Vec<String>> {
        self.layout.ensure()?;
        let candidates = plan_load_order(scan_storage(&self.layout)?);

        let mut loaded = Vec::new();
        for candidate in candidates {
            let Some(manifest) = candidate.manifest else {
                tracing::warn!("skipping '{}': no readable manifest", candidate.dir_id);
                continue;
            };
            let name = manifest.name().to_string();
            let dir = self.layout.extension_dir(&candidate.dir_id);
            let module = match self.loader.load(&manifest, &dir) {
                Ok(module) => module,
                Err(e) => {
                    tracing::warn!("failed to load module for '{name}': {e}");
                    continue;
                }
            };
            if let Err(e) = self.registry.register(module, manifest) {
                tracing::warn!("failed to register '{name}': {e}");
                continue;
            }
            if activate {
                if let Err(e) = self.lifecycle.activate(&name) {
                    tracing::warn!("failed to activate '{name}': {e}");
                }
            }
            loaded.push(name);
        }
        Ok(loaded)
    }
}
