//! The assembled runtime: one struct owning every component, wired over a
//! shared event bus and a single storage root.

use std::path::Path;
use std::sync::Arc;

use ext_fs::StorageLayout;

use crate::error::Result;
use crate::events::{Event, EventBus, SubscriptionId};
use crate::installer::{InstallOptions, Installer};
use crate::lifecycle::{DeactivateOptions, LifecycleManager, LifecycleRecord};
use crate::module::ModuleLoader;
use crate::permissions::PermissionManager;
use crate::registry::{ExtensionRecord, ExtensionRegistry};

/// A fully wired extension runtime rooted at one storage directory.
///
/// Construction loads the durable permission store and subscribes the
/// permission manager to registration events; nothing else happens until
/// [`load_installed`](Self::load_installed) or an install call.
pub struct ExtensionHost {
    events: Arc<EventBus>,
    registry: Arc<ExtensionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    permissions: Arc<PermissionManager>,
    installer: Installer,
}

impl ExtensionHost {
    /// Build a host over `root` with the given module loader.
    pub fn new(root: &Path, loader: Arc<dyn ModuleLoader>) -> Result<Self> {
        let layout = StorageLayout::new(root);
        layout.ensure()?;

        let events = Arc::new(EventBus::new());
        let registry = Arc::new(ExtensionRegistry::new(Arc::clone(&events)));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&events),
        ));
        let permissions = Arc::new(PermissionManager::load(
            &layout.permissions_file(),
            Arc::clone(&events),
        )?);
        PermissionManager::subscribe_registrations(&permissions, &events);

        let installer = Installer::new(
            layout,
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
            loader,
        );

        Ok(Self {
            events,
            registry,
            lifecycle,
            permissions,
            installer,
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Subscribe to runtime events.
    pub fn subscribe(&self, callback: impl Fn(&Event) + Send + Sync + 'static) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    /// Install from a source directory. See [`Installer::install`].
    pub fn install(&self, src_dir: &Path, opts: &InstallOptions) -> Result<ExtensionRecord> {
        self.installer.install(src_dir, opts)
    }

    /// Remove an extension completely. See [`Installer::uninstall`].
    pub fn uninstall(&self, name: &str) -> Result<()> {
        self.installer.uninstall(name)
    }

    /// Load everything already in managed storage, dependencies first.
    pub fn load_installed(&self, activate: bool) -> Result<Vec<String>> {
        self.installer.load_installed(activate)
    }

    pub fn activate(&self, name: &str) -> Result<()> {
        self.lifecycle.activate(name)
    }

    pub fn deactivate(&self, name: &str, opts: DeactivateOptions) -> Result<()> {
        self.lifecycle.deactivate(name, opts)
    }

    pub fn suspend(&self, name: &str, reason: Option<&str>) -> Result<()> {
        self.lifecycle.suspend(name, reason)
    }

    pub fn resume(&self, name: &str) -> Result<()> {
        self.lifecycle.resume(name)
    }

    pub fn state_of(&self, name: &str) -> Option<LifecycleRecord> {
        self.lifecycle.state_of(name)
    }
}
