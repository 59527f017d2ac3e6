//! Lifecycle state machine for registered extensions.
//!
//! Each extension has at most one lifecycle record, mutated only here.
//! Transition legality is a fixed from -> allowed-set table. Operations on
//! the same extension name are serialized through a per-name lock so
//! check-then-act sequences commit atomically; operations on different
//! names proceed independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::registry::ExtensionRegistry;

/// An extension's current participation in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    /// Files present, module registered, not running.
    Installed,
    /// Initialized and participating in hooks.
    Active,
    /// Deactivated by choice; can be activated again.
    Inactive,
    /// Temporarily parked; only resume or uninstall apply.
    Suspended,
    /// A newer version is known to be available.
    Updatable,
    /// An upgrade is in flight.
    Updating,
    /// Teardown in progress.
    Uninstalling,
    /// A failure was recorded; the reason lives on the record.
    Error,
}

impl LifecycleState {
    /// All states.
    pub fn all() -> &'static [LifecycleState] {
        use LifecycleState::*;
        &[
            Installed,
            Active,
            Inactive,
            Suspended,
            Updatable,
            Updating,
            Uninstalling,
            Error,
        ]
    }

    /// The states this state may legally transition to.
    pub fn allowed_transitions(&self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Installed => &[Active, Uninstalling, Updating, Error],
            Active => &[Inactive, Suspended, Uninstalling, Updating, Error],
            Inactive => &[Active, Uninstalling, Updating, Error],
            Suspended => &[Active, Inactive, Uninstalling, Error],
            Updatable => &[Updating, Uninstalling, Error],
            Updating => &[Installed, Active, Error],
            Uninstalling => &[Error],
            Error => &[Installed, Active, Uninstalling],
        }
    }

    /// Whether `self -> to` is in the transition table.
    pub fn can_transition_to(&self, to: LifecycleState) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// The wire name of this state.
    pub fn as_str(&self) -> &'static str {
        use LifecycleState::*;
        match self {
            Installed => "installed",
            Active => "active",
            Inactive => "inactive",
            Suspended => "suspended",
            Updatable => "updatable",
            Updating => "updating",
            Uninstalling => "uninstalling",
            Error => "error",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extension's committed lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub state: LifecycleState,
    pub previous_state: Option<LifecycleState>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleRecord {
    fn new(state: LifecycleState, previous: Option<LifecycleState>, reason: Option<String>) -> Self {
        Self {
            state,
            previous_state: previous,
            reason,
            timestamp: Utc::now(),
        }
    }
}

/// Options for [`LifecycleManager::deactivate`].
#[derive(Debug, Clone, Default)]
pub struct DeactivateOptions {
    /// Deactivate even when active dependents exist.
    pub force: bool,
    /// Park in `Suspended` instead of `Inactive`.
    pub suspend: bool,
    /// Recorded on the committed lifecycle record.
    pub reason: Option<String>,
}

/// Per-name lock table serializing compound operations on one extension.
#[derive(Default)]
pub(crate) struct NameLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    pub(crate) fn acquire(&self, name: &str) -> Arc<Mutex<()>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(inner.entry(name.to_string()).or_default())
    }
}

/// The lifecycle state machine.
pub struct LifecycleManager {
    registry: Arc<ExtensionRegistry>,
    events: Arc<EventBus>,
    records: Mutex<HashMap<String, LifecycleRecord>>,
    locks: NameLocks,
}

impl LifecycleManager {
    pub fn new(registry: Arc<ExtensionRegistry>, events: Arc<EventBus>) -> Self {
        Self {
            registry,
            events,
            records: Mutex::new(HashMap::new()),
            locks: NameLocks::default(),
        }
    }

    /// The current lifecycle record for `name`.
    ///
    /// When no record exists but the extension is registered, the state is
    /// derived from the registry's coarse internal state and cached.
    pub fn state_of(&self, name: &str) -> Option<LifecycleRecord> {
        if let Some(record) = self.lock_records().get(name) {
            return Some(record.clone());
        }
        let internal = self.registry.internal_state(name)?;
        let derived = LifecycleRecord::new(internal.coarse_lifecycle(), None, None);
        let mut records = self.lock_records();
        // A concurrent writer may have beaten the derivation; keep theirs
        Some(
            records
                .entry(name.to_string())
                .or_insert(derived)
                .clone(),
        )
    }

    /// Commit a transition, enforcing the table.
    pub fn update_state(
        &self,
        name: &str,
        new_state: LifecycleState,
        reason: Option<&str>,
    ) -> Result<LifecycleRecord> {
        if !self.registry.contains(name) {
            return Err(Error::UnknownExtension(name.to_string()));
        }
        let current = self
            .state_of(name)
            .ok_or_else(|| Error::UnknownExtension(name.to_string()))?;
        if !current.state.can_transition_to(new_state) {
            return Err(Error::IllegalTransition {
                name: name.to_string(),
                from: current.state,
                to: new_state,
            });
        }
        let record = LifecycleRecord::new(
            new_state,
            Some(current.state),
            reason.map(str::to_string),
        );
        self.lock_records().insert(name.to_string(), record.clone());
        self.events.emit(&Event::LifecycleChanged {
            name: name.to_string(),
            from: Some(current.state),
            to: new_state,
            reason: record.reason.clone(),
        });
        Ok(record)
    }

    /// Commit an `Installed` record directly, bypassing the table.
    ///
    /// This is the install/upgrade commit point: a fresh install has no
    /// machine state to transition from.
    pub fn record_install(&self, name: &str, reason: Option<&str>) -> LifecycleRecord {
        let previous = self.lock_records().get(name).map(|r| r.state);
        let record = LifecycleRecord::new(
            LifecycleState::Installed,
            previous,
            reason.map(str::to_string),
        );
        self.lock_records().insert(name.to_string(), record.clone());
        self.events.emit(&Event::LifecycleChanged {
            name: name.to_string(),
            from: previous,
            to: LifecycleState::Installed,
            reason: record.reason.clone(),
        });
        record
    }

    /// Activate an extension: verify dependencies, transition to `Active`,
    /// then run its initialize callback.
    ///
    /// No-op success when already active. Unsatisfied dependencies or a
    /// failing callback move the extension to `Error` with the reason
    /// retained.
    pub fn activate(&self, name: &str) -> Result<()> {
        let lock = self.locks.acquire(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.activate_locked(name)
    }

    fn activate_locked(&self, name: &str) -> Result<()> {
        let current = self
            .state_of(name)
            .ok_or_else(|| Error::UnknownExtension(name.to_string()))?;
        if current.state == LifecycleState::Active {
            return Ok(());
        }

        let issues = self.registry.check_dependencies(name)?;
        if !issues.is_empty() {
            let summary = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            let reason = format!("unsatisfied dependencies: {summary}");
            self.move_to_error(name, &reason);
            return Err(Error::UnsatisfiedDependencies {
                name: name.to_string(),
                summary,
            });
        }

        self.update_state(name, LifecycleState::Active, None)?;
        match self.registry.initialize_extension(name) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.move_to_error(name, &e.to_string());
                Err(e)
            }
        }
    }

    /// Deactivate an extension, running its deactivate callback.
    ///
    /// Fails when another *active* extension depends on `name` and `force`
    /// is not set. Callback failures are logged, never propagated. A
    /// non-active extension deactivates as a no-op success.
    pub fn deactivate(&self, name: &str, opts: DeactivateOptions) -> Result<()> {
        let lock = self.locks.acquire(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.deactivate_locked(name, opts)
    }

    fn deactivate_locked(&self, name: &str, opts: DeactivateOptions) -> Result<()> {
        let record = self
            .registry
            .get(name)
            .ok_or_else(|| Error::UnknownExtension(name.to_string()))?;
        let current = self
            .state_of(name)
            .ok_or_else(|| Error::UnknownExtension(name.to_string()))?;
        if current.state != LifecycleState::Active {
            return Ok(());
        }

        if !opts.force {
            let live: Vec<String> = self
                .registry
                .dependents_of(name)
                .into_iter()
                .filter(|dep| {
                    self.state_of(dep)
                        .is_some_and(|r| r.state == LifecycleState::Active)
                })
                .collect();
            if !live.is_empty() {
                return Err(Error::ActiveDependents {
                    name: name.to_string(),
                    dependents: live,
                });
            }
        }

        if let Err(e) = record.module.deactivate() {
            tracing::warn!("deactivate callback failed for '{name}': {e}");
        }

        let target = if opts.suspend {
            LifecycleState::Suspended
        } else {
            LifecycleState::Inactive
        };
        self.update_state(name, target, opts.reason.as_deref())?;
        Ok(())
    }

    /// Park an extension in `Suspended`.
    pub fn suspend(&self, name: &str, reason: Option<&str>) -> Result<()> {
        self.deactivate(
            name,
            DeactivateOptions {
                force: false,
                suspend: true,
                reason: reason.map(str::to_string),
            },
        )
    }

    /// Resume a suspended extension. The current state must be exactly
    /// `Suspended`; resumption then follows the activation path.
    pub fn resume(&self, name: &str) -> Result<()> {
        let lock = self.locks.acquire(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self
            .state_of(name)
            .ok_or_else(|| Error::UnknownExtension(name.to_string()))?;
        if current.state != LifecycleState::Suspended {
            return Err(Error::IllegalTransition {
                name: name.to_string(),
                from: current.state,
                to: LifecycleState::Active,
            });
        }
        self.activate_locked(name)
    }

    /// Drop the lifecycle record for `name`. Returns `false` if absent.
    pub fn remove(&self, name: &str) -> bool {
        self.lock_records().remove(name).is_some()
    }

    /// Names with a cached lifecycle record, sorted.
    pub fn tracked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_records().keys().cloned().collect();
        names.sort();
        names
    }

    fn move_to_error(&self, name: &str, reason: &str) {
        if let Err(e) = self.update_state(name, LifecycleState::Error, Some(reason)) {
            // Already in error: refresh the reason without a transition
            tracing::debug!("could not transition '{name}' to error: {e}");
            let mut records = self.lock_records();
            if let Some(record) = records.get_mut(name) {
                record.reason = Some(reason.to_string());
                record.timestamp = Utc::now();
            }
        }
    }

    fn lock_records(&self) -> MutexGuard<'_, HashMap<String, LifecycleRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
