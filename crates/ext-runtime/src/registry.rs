//! Capability registry: extension records, hook and capability indexes,
//! reverse dependency edges, and module initialization.
//!
//! The registry is the leaf component: everything else queries it. It keeps
//! a coarse internal state per extension (registered, initializing,
//! initialized, error) that the lifecycle machine derives its initial view
//! from.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::hooks::{Capability, CapabilityKind, HookKind};
use crate::lifecycle::{LifecycleState, NameLocks};
use crate::manifest::{CORE_DEPENDENCY, ExtensionManifest};
use crate::module::{ExtensionModule, InitContext};

/// Coarse registry-internal state, distinct from the lifecycle machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalState {
    Registered,
    Initializing,
    Initialized,
    Error { reason: String },
}

impl InternalState {
    /// The lossy derivation the lifecycle machine uses when it has no
    /// record of its own. Preserved exactly: `initializing` maps to
    /// `installed`, not to any transient state.
    pub fn coarse_lifecycle(&self) -> LifecycleState {
        match self {
            Self::Registered | Self::Initializing => LifecycleState::Installed,
            Self::Initialized => LifecycleState::Active,
            Self::Error { .. } => LifecycleState::Error,
        }
    }
}

/// A registered extension: identity, manifest, and the module handle.
#[derive(Clone)]
pub struct ExtensionRecord {
    pub name: String,
    pub version: semver::Version,
    pub manifest: ExtensionManifest,
    pub module: Arc<dyn ExtensionModule>,
}

impl fmt::Debug for ExtensionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRecord")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Why a declared dependency is unsatisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyIssueReason {
    /// The target extension is not registered.
    NotFound,
    /// The target is registered at an incompatible version.
    VersionMismatch { found: semver::Version },
}

/// One unsatisfied dependency reported by [`ExtensionRegistry::check_dependencies`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyIssue {
    /// Name of the required extension.
    pub name: String,
    /// The declared range.
    pub range: String,
    pub reason: DependencyIssueReason,
}

impl fmt::Display for DependencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            DependencyIssueReason::NotFound => {
                write!(f, "{}@{}: extension not found", self.name, self.range)
            }
            DependencyIssueReason::VersionMismatch { found } => {
                write!(
                    f,
                    "{}@{}: version mismatch (found {found})",
                    self.name, self.range
                )
            }
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    records: HashMap<String, ExtensionRecord>,
    internal: HashMap<String, InternalState>,
    /// Hook kind -> extensions implementing it.
    hooks: HashMap<HookKind, BTreeSet<String>>,
    /// Capability kind -> (extension, capability name) -> payload.
    capabilities: HashMap<CapabilityKind, BTreeMap<(String, String), serde_json::Value>>,
    /// Target extension -> extensions that declared a dependency on it.
    dependents: HashMap<String, BTreeSet<String>>,
}

impl RegistryInner {
    fn index_extension(&mut self, record: &ExtensionRecord) {
        for kind in HookKind::all() {
            if record.module.implements(*kind) {
                self.hooks.entry(*kind).or_default().insert(record.name.clone());
            }
        }
        for cap in record.module.capabilities() {
            self.capabilities
                .entry(cap.kind)
                .or_default()
                .insert((record.name.clone(), cap.name), cap.payload);
        }
        for dep in record.manifest.dependencies.keys() {
            if dep != CORE_DEPENDENCY {
                self.dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(record.name.clone());
            }
        }
    }

    fn unindex_extension(&mut self, name: &str) {
        for set in self.hooks.values_mut() {
            set.remove(name);
        }
        for map in self.capabilities.values_mut() {
            map.retain(|(ext, _), _| ext != name);
        }
        // Drop both directions: edges declared by `name` and edges onto it
        self.dependents.remove(name);
        for set in self.dependents.values_mut() {
            set.remove(name);
        }
    }
}

/// The extension registry. Explicitly constructed and injected, never a
/// global.
pub struct ExtensionRegistry {
    events: Arc<EventBus>,
    inner: RwLock<RegistryInner>,
    /// Serializes check-then-act sequences per extension name.
    locks: NameLocks,
}

impl ExtensionRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            inner: RwLock::new(RegistryInner::default()),
            locks: NameLocks::default(),
        }
    }

    /// The event bus this registry emits on.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Register a module with its manifest.
    ///
    /// Re-registering the same name at an equal version is idempotent: the
    /// existing record is returned unchanged and no events fire. A strictly
    /// greater version replaces the record (a replace event fires before the
    /// overwrite); an older version is rejected. Registrations for the same
    /// name are serialized, so the version check and the commit are atomic.
    pub fn register(
        &self,
        module: Arc<dyn ExtensionModule>,
        manifest: ExtensionManifest,
    ) -> Result<ExtensionRecord> {
        manifest.validate()?;
        let name = manifest.name().to_string();
        let version = manifest.version();

        if module.name() != name {
            return Err(Error::InvalidName {
                name: module.name().to_string(),
                reason: format!("module name does not match manifest name '{name}'"),
            });
        }
        if module.version() != manifest.extension.version {
            return Err(Error::InvalidVersion {
                version: module.version().to_string(),
                reason: format!(
                    "module version does not match manifest version '{}'",
                    manifest.extension.version
                ),
            });
        }

        for perm in manifest
            .permissions()
            .iter()
            .chain(manifest.optional_permissions())
        {
            if crate::permission::Permission::parse(perm).is_none() {
                tracing::warn!("extension '{name}' declares unknown permission '{perm}'");
            }
        }
        for hook in manifest.hooks() {
            if HookKind::parse(hook).is_none() {
                tracing::warn!("extension '{name}' declares unknown hook '{hook}'");
            }
        }

        let name_lock = self.locks.acquire(&name);
        let _guard = name_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Idempotency / replacement checks against the current record
        let replaced = {
            let inner = self.read();
            match inner.records.get(&name) {
                Some(existing) if existing.version == version => {
                    return Ok(existing.clone());
                }
                Some(existing) if existing.version > version => {
                    return Err(Error::InvalidVersion {
                        version: version.to_string(),
                        reason: format!(
                            "'{name}' is already registered at {}, replacement requires a strictly greater version",
                            existing.version
                        ),
                    });
                }
                Some(existing) => Some(existing.version.clone()),
                None => None,
            }
        };

        // Replace notification goes out before the overwrite
        if let Some(old_version) = &replaced {
            self.events.emit(&Event::Replaced {
                name: name.clone(),
                old_version: old_version.clone(),
                new_version: version.clone(),
            });
        }

        let record = ExtensionRecord {
            name: name.clone(),
            version: version.clone(),
            manifest,
            module,
        };

        {
            let mut inner = self.write();
            if replaced.is_some() {
                inner.unindex_extension(&name);
            }
            inner.index_extension(&record);
            inner.records.insert(name.clone(), record.clone());
            inner.internal.insert(name.clone(), InternalState::Registered);
        }

        self.events.emit(&Event::Registered {
            name,
            version,
            required_permissions: record.manifest.permissions().to_vec(),
            optional_permissions: record.manifest.optional_permissions().to_vec(),
        });

        Ok(record)
    }

    /// Remove an extension and everything indexed under it.
    ///
    /// Returns `false` if the name is unknown.
    pub fn unregister(&self, name: &str) -> bool {
        let name_lock = self.locks.acquire(name);
        let _guard = name_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let removed = {
            let mut inner = self.write();
            let removed = inner.records.remove(name).is_some();
            if removed {
                inner.internal.remove(name);
                inner.unindex_extension(name);
            }
            removed
        };
        if removed {
            self.events.emit(&Event::Unregistered {
                name: name.to_string(),
            });
        }
        removed
    }

    /// Report every unsatisfied dependency of `name`, not just the first.
    pub fn check_dependencies(&self, name: &str) -> Result<Vec<DependencyIssue>> {
        let inner = self.read();
        let record = inner
            .records
            .get(name)
            .ok_or_else(|| Error::UnknownExtension(name.to_string()))?;

        let mut issues = Vec::new();
        for (dep, range) in &record.manifest.dependencies {
            if dep == CORE_DEPENDENCY {
                continue;
            }
            // Ranges were validated when the manifest was parsed
            let Ok(req) = semver::VersionReq::parse(range) else {
                continue;
            };
            match inner.records.get(dep) {
                None => issues.push(DependencyIssue {
                    name: dep.clone(),
                    range: range.clone(),
                    reason: DependencyIssueReason::NotFound,
                }),
                Some(target) if !req.matches(&target.version) => issues.push(DependencyIssue {
                    name: dep.clone(),
                    range: range.clone(),
                    reason: DependencyIssueReason::VersionMismatch {
                        found: target.version.clone(),
                    },
                }),
                Some(_) => {}
            }
        }
        Ok(issues)
    }

    /// All extensions that declared a dependency on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.read()
            .dependents
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Run the module's initialize callback, tracking internal state.
    ///
    /// Idempotent no-op when already initialized. On failure the internal
    /// state moves to error with the captured reason and an error event is
    /// emitted.
    pub fn initialize_extension(&self, name: &str) -> Result<()> {
        let name_lock = self.locks.acquire(name);
        let _guard = name_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (module, hooks, capabilities) = {
            let inner = self.read();
            let record = inner
                .records
                .get(name)
                .ok_or_else(|| Error::UnknownExtension(name.to_string()))?;
            if inner.internal.get(name) == Some(&InternalState::Initialized) {
                return Ok(());
            }
            let hooks: Vec<HookKind> = HookKind::all()
                .iter()
                .copied()
                .filter(|kind| record.module.implements(*kind))
                .collect();
            (
                Arc::clone(&record.module),
                hooks,
                record.module.capabilities(),
            )
        };

        {
            let mut inner = self.write();
            inner
                .internal
                .insert(name.to_string(), InternalState::Initializing);
        }

        // Callback runs without the registry map locked so it may query freely
        let ctx = InitContext {
            registry: self,
            hooks: &hooks,
            capabilities: &capabilities,
        };
        match module.initialize(&ctx) {
            Ok(()) => {
                {
                    let mut inner = self.write();
                    inner
                        .internal
                        .insert(name.to_string(), InternalState::Initialized);
                }
                self.events.emit(&Event::Initialized {
                    name: name.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                {
                    let mut inner = self.write();
                    inner.internal.insert(
                        name.to_string(),
                        InternalState::Error {
                            reason: reason.clone(),
                        },
                    );
                }
                self.events.emit(&Event::ExtensionError {
                    name: name.to_string(),
                    reason: reason.clone(),
                });
                Err(Error::InitializationFailed {
                    name: name.to_string(),
                    reason,
                })
            }
        }
    }

    /// Look up a record by name.
    pub fn get(&self, name: &str) -> Option<ExtensionRecord> {
        self.read().records.get(name).cloned()
    }

    /// Whether an extension is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.read().records.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().records.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// The registered version of `name`, if any.
    pub fn version_of(&self, name: &str) -> Option<semver::Version> {
        self.read().records.get(name).map(|r| r.version.clone())
    }

    /// The coarse internal state of `name`, if registered.
    pub fn internal_state(&self, name: &str) -> Option<InternalState> {
        self.read().internal.get(name).cloned()
    }

    /// Hook kinds `name` implements.
    pub fn hooks_of(&self, name: &str) -> Vec<HookKind> {
        let inner = self.read();
        HookKind::all()
            .iter()
            .copied()
            .filter(|kind| {
                inner
                    .hooks
                    .get(kind)
                    .is_some_and(|set| set.contains(name))
            })
            .collect()
    }

    /// Extensions implementing a hook kind, sorted.
    pub fn extensions_with_hook(&self, kind: HookKind) -> Vec<String> {
        self.read()
            .hooks
            .get(&kind)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All capabilities of one kind across all extensions, as
    /// `(extension, capability name, payload)` sorted by extension then name.
    pub fn capabilities_of_kind(
        &self,
        kind: CapabilityKind,
    ) -> Vec<(String, String, serde_json::Value)> {
        self.read()
            .capabilities
            .get(&kind)
            .map(|map| {
                map.iter()
                    .map(|((ext, cap), payload)| (ext.clone(), cap.clone(), payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One capability payload keyed by (extension, kind, name).
    pub fn capability(
        &self,
        extension: &str,
        kind: CapabilityKind,
        name: &str,
    ) -> Option<serde_json::Value> {
        self.read()
            .capabilities
            .get(&kind)
            .and_then(|map| map.get(&(extension.to_string(), name.to_string())))
            .cloned()
    }

    /// Capabilities declared by a single extension.
    pub fn capabilities_of(&self, name: &str) -> Vec<Capability> {
        let inner = self.read();
        let mut out = Vec::new();
        for (kind, map) in &inner.capabilities {
            for ((ext, cap_name), payload) in map {
                if ext == name {
                    out.push(Capability::new(*kind, cap_name.clone(), payload.clone()));
                }
            }
        }
        out.sort_by(|a, b| (a.kind.as_str(), &a.name).cmp(&(b.kind.as_str(), &b.name)));
        out
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
