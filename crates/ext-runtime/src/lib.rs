//! Extension platform runtime
//!
//! Registers extension modules, resolves their declared dependencies,
//! drives an install/activate/deactivate/uninstall lifecycle, and gates
//! capability access through a permission policy engine. Everything is
//! explicitly constructed and injected; the runtime keeps no globals.
//!
//! The usual entry point is [`ExtensionHost`], which wires the registry,
//! lifecycle machine, permission manager, and installer over one storage
//! root and one event bus:
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use ext_runtime::{ExtensionHost, InstallOptions, ManifestModuleLoader};
//!
//! # fn main() -> ext_runtime::Result<()> {
//! let host = ExtensionHost::new(Path::new("/var/lib/host"), Arc::new(ManifestModuleLoader))?;
//! host.load_installed(true)?;
//! host.install(Path::new("/tmp/markdown-tools"), &InstallOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod hooks;
pub mod host;
pub mod installer;
pub mod lifecycle;
pub mod manifest;
pub mod module;
pub mod permission;
pub mod permissions;
pub mod registry;
pub mod resolver;
pub mod store;

pub use error::{Error, Result};
pub use events::{Event, EventBus, SubscriptionId};
pub use hooks::{Capability, CapabilityKind, HookKind};
pub use host::ExtensionHost;
pub use installer::{InstallOptions, Installer};
pub use lifecycle::{DeactivateOptions, LifecycleManager, LifecycleRecord, LifecycleState};
pub use manifest::{CORE_DEPENDENCY, ExtensionManifest, ExtensionMeta};
pub use module::{
    ExtensionModule, InitContext, ManifestModule, ManifestModuleLoader, ModuleError, ModuleLoader,
};
pub use permission::{
    Permission, PermissionAction, PermissionCategory, PermissionHistoryEntry, PermissionPolicy,
};
pub use permissions::{ApprovalOutcome, PermissionGuard, PermissionManager};
pub use registry::{
    DependencyIssue, DependencyIssueReason, ExtensionRecord, ExtensionRegistry, InternalState,
};
pub use resolver::DependencyGraph;
pub use store::{ExtensionGrants, HISTORY_CAP, PermissionStore};

/// Canonical manifest filename inside an extension directory.
pub const MANIFEST_FILENAME: &str = "extension.toml";
