//! Permission grants, policy enforcement, and the invocation guard.
//!
//! The manager owns the durable [`PermissionStore`] and rewrites it after
//! every mutation. Events are emitted after the mutation is committed and
//! the store lock released. Deny-listed permissions can never be granted,
//! through any path.
//!
//! There is no interactive approval channel: a permission that requires
//! approval is recorded as requested and then denied. Hosts that grow an
//! approval UI grant out-of-band via [`PermissionManager::grant`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::{Error, Result};
use crate::events::{Event, EventBus, SubscriptionId};
use crate::permission::{Permission, PermissionAction, PermissionHistoryEntry, PermissionPolicy};
use crate::store::PermissionStore;

/// Result of [`PermissionManager::request_user_approval`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    /// True when every required permission ended up granted.
    pub granted: bool,
    /// Required permissions that were denied.
    pub denied: Vec<Permission>,
}

/// Tracks grants per extension and enforces the process-wide policy.
pub struct PermissionManager {
    events: Arc<EventBus>,
    path: PathBuf,
    store: Mutex<PermissionStore>,
}

impl PermissionManager {
    /// Load the manager from the durable store at `path`.
    pub fn load(path: &Path, events: Arc<EventBus>) -> Result<Self> {
        let store = PermissionStore::load(path)?;
        Ok(Self {
            events,
            path: path.to_path_buf(),
            store: Mutex::new(store),
        })
    }

    /// Subscribe `manager` to registration events on `bus`.
    ///
    /// Each registration validates the declared permission strings and
    /// conditionally auto-grants the safe required ones. Held weakly so the
    /// bus does not keep the manager alive.
    pub fn subscribe_registrations(manager: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let weak: Weak<Self> = Arc::downgrade(manager);
        bus.subscribe(move |event| {
            if let Event::Registered {
                name,
                required_permissions,
                ..
            } = event
            {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = manager.handle_registration(name, required_permissions) {
                    tracing::warn!("permission bookkeeping failed for '{name}': {e}");
                }
            }
        })
    }

    /// Grant a permission to an extension.
    ///
    /// A deny-listed permission is never granted; the attempt is recorded
    /// and surfaced as an error.
    pub fn grant(&self, name: &str, permission: Permission, reason: Option<&str>) -> Result<()> {
        let mut pending = Vec::new();
        let outcome = {
            let mut store = self.lock();
            if store.policies.is_denied(permission) {
                store.grants_mut(name).push_history(PermissionHistoryEntry::now(
                    permission,
                    PermissionAction::Denied,
                    Some("globally denied".to_string()),
                ));
                store.save(&self.path)?;
                pending.push(Event::PermissionDenied {
                    name: name.to_string(),
                    permission,
                    reason: Some("globally denied".to_string()),
                });
                Err(Error::GloballyDenied { permission })
            } else {
                let grants = store.grants_mut(name);
                let inserted = grants.granted_permissions.insert(permission);
                if inserted {
                    grants.push_history(PermissionHistoryEntry::now(
                        permission,
                        PermissionAction::Granted,
                        reason.map(str::to_string),
                    ));
                    pending.push(Event::PermissionGranted {
                        name: name.to_string(),
                        permission,
                    });
                }
                store.save(&self.path)?;
                Ok(())
            }
        };
        self.emit_all(pending);
        outcome
    }

    /// Revoke a permission. Returns `false` when it was not granted.
    pub fn revoke(&self, name: &str, permission: Permission, reason: Option<&str>) -> Result<bool> {
        let mut pending = Vec::new();
        let removed = {
            let mut store = self.lock();
            let grants = store.grants_mut(name);
            let removed = grants.granted_permissions.remove(&permission);
            if removed {
                grants.push_history(PermissionHistoryEntry::now(
                    permission,
                    PermissionAction::Revoked,
                    reason.map(str::to_string),
                ));
                pending.push(Event::PermissionRevoked {
                    name: name.to_string(),
                    permission,
                });
            }
            store.save(&self.path)?;
            removed
        };
        self.emit_all(pending);
        Ok(removed)
    }

    /// Whether `name` currently holds `permission`.
    pub fn has(&self, name: &str, permission: Permission) -> bool {
        self.lock()
            .extensions
            .get(name)
            .is_some_and(|g| g.granted_permissions.contains(&permission))
    }

    /// All permissions currently granted to `name`, sorted.
    pub fn granted(&self, name: &str) -> Vec<Permission> {
        self.lock()
            .extensions
            .get(name)
            .map(|g| g.granted_permissions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The recorded history for `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<PermissionHistoryEntry> {
        self.lock()
            .extensions
            .get(name)
            .map(|g| g.permission_history.clone())
            .unwrap_or_default()
    }

    /// Drop all grants and history for `name`. Returns `false` if unknown.
    pub fn clear(&self, name: &str) -> Result<bool> {
        let mut store = self.lock();
        let removed = store.extensions.remove(name).is_some();
        if removed {
            store.save(&self.path)?;
        }
        Ok(removed)
    }

    /// Ask for a permission at runtime.
    ///
    /// Already granted returns `true` immediately. Deny-listed is recorded
    /// and refused. A safe permission is auto-granted when the policy
    /// allows. Anything requiring approval is recorded as requested and
    /// then denied.
    pub fn request_permission(
        &self,
        name: &str,
        permission: Permission,
        reason: Option<&str>,
    ) -> Result<bool> {
        let mut pending = Vec::new();
        let granted = {
            let mut store = self.lock();
            if store
                .extensions
                .get(name)
                .is_some_and(|g| g.granted_permissions.contains(&permission))
            {
                return Ok(true);
            }

            if store.policies.is_denied(permission) {
                store.grants_mut(name).push_history(PermissionHistoryEntry::now(
                    permission,
                    PermissionAction::Denied,
                    Some("globally denied".to_string()),
                ));
                pending.push(Event::PermissionDenied {
                    name: name.to_string(),
                    permission,
                    reason: Some("globally denied".to_string()),
                });
                store.save(&self.path)?;
                false
            } else if !store.policies.requires_approval(permission)
                && store.policies.auto_grant_safe
            {
                let grants = store.grants_mut(name);
                grants.granted_permissions.insert(permission);
                grants.push_history(PermissionHistoryEntry::now(
                    permission,
                    PermissionAction::Granted,
                    Some("auto-granted".to_string()),
                ));
                pending.push(Event::PermissionGranted {
                    name: name.to_string(),
                    permission,
                });
                store.save(&self.path)?;
                true
            } else {
                let grants = store.grants_mut(name);
                grants.push_history(PermissionHistoryEntry::now(
                    permission,
                    PermissionAction::Requested,
                    reason.map(str::to_string),
                ));
                grants.push_history(PermissionHistoryEntry::now(
                    permission,
                    PermissionAction::Denied,
                    Some("requires approval".to_string()),
                ));
                pending.push(Event::PermissionRequested {
                    name: name.to_string(),
                    permission,
                    reason: reason.map(str::to_string),
                });
                pending.push(Event::PermissionDenied {
                    name: name.to_string(),
                    permission,
                    reason: Some("requires approval".to_string()),
                });
                store.save(&self.path)?;
                false
            }
        };
        self.emit_all(pending);
        Ok(granted)
    }

    /// Resolve a batch of required and optional permissions.
    ///
    /// Safe required permissions are granted; deny-listed or
    /// approval-requiring ones are denied and reported. Optional
    /// permissions are only recorded as requested, never auto-granted.
    pub fn request_user_approval(
        &self,
        name: &str,
        required: &[Permission],
        optional: &[Permission],
    ) -> Result<ApprovalOutcome> {
        let mut pending = Vec::new();
        let mut denied = Vec::new();
        {
            let mut store = self.lock();
            for &permission in required {
                if store.policies.is_denied(permission)
                    || store.policies.requires_approval(permission)
                {
                    store.grants_mut(name).push_history(PermissionHistoryEntry::now(
                        permission,
                        PermissionAction::Denied,
                        Some("approval required".to_string()),
                    ));
                    pending.push(Event::PermissionDenied {
                        name: name.to_string(),
                        permission,
                        reason: Some("approval required".to_string()),
                    });
                    denied.push(permission);
                } else {
                    let grants = store.grants_mut(name);
                    if grants.granted_permissions.insert(permission) {
                        grants.push_history(PermissionHistoryEntry::now(
                            permission,
                            PermissionAction::Granted,
                            None,
                        ));
                        pending.push(Event::PermissionGranted {
                            name: name.to_string(),
                            permission,
                        });
                    }
                }
            }
            for &permission in optional {
                store.grants_mut(name).push_history(PermissionHistoryEntry::now(
                    permission,
                    PermissionAction::Requested,
                    Some("optional".to_string()),
                ));
                pending.push(Event::PermissionRequested {
                    name: name.to_string(),
                    permission,
                    reason: Some("optional".to_string()),
                });
            }
            store.save(&self.path)?;
        }
        self.emit_all(pending);
        Ok(ApprovalOutcome {
            granted: denied.is_empty(),
            denied,
        })
    }

    /// A snapshot of the current policy.
    pub fn policy(&self) -> PermissionPolicy {
        self.lock().policies.clone()
    }

    /// Replace the policy, persist, and announce the change.
    pub fn set_policy(&self, policy: PermissionPolicy) -> Result<()> {
        {
            let mut store = self.lock();
            store.policies = policy;
            store.save(&self.path)?;
        }
        self.events.emit(&Event::PolicyUpdated);
        Ok(())
    }

    /// Build a guard that re-checks `required` before every wrapped call.
    pub fn with_permissions(
        self: &Arc<Self>,
        extension: &str,
        required: &[Permission],
    ) -> PermissionGuard {
        PermissionGuard {
            manager: Arc::clone(self),
            extension: extension.to_string(),
            required: required.to_vec(),
        }
    }

    fn handle_registration(&self, name: &str, required: &[String]) -> Result<()> {
        let mut known = Vec::new();
        for raw in required {
            match Permission::parse(raw) {
                Some(permission) => known.push(permission),
                None => {
                    tracing::warn!("extension '{name}' declares unknown permission '{raw}'");
                }
            }
        }

        let mut pending = Vec::new();
        {
            let mut store = self.lock();
            if !store.policies.auto_grant_safe {
                return Ok(());
            }
            for permission in known {
                if store.policies.is_denied(permission)
                    || store.policies.requires_approval(permission)
                {
                    continue;
                }
                let grants = store.grants_mut(name);
                if grants.granted_permissions.insert(permission) {
                    grants.push_history(PermissionHistoryEntry::now(
                        permission,
                        PermissionAction::Granted,
                        Some("auto-granted at registration".to_string()),
                    ));
                    pending.push(Event::PermissionGranted {
                        name: name.to_string(),
                        permission,
                    });
                }
            }
            store.save(&self.path)?;
        }
        self.emit_all(pending);
        Ok(())
    }

    fn emit_all(&self, pending: Vec<Event>) {
        for event in pending {
            self.events.emit(&event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, PermissionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Re-checks a fixed permission set immediately before each invocation.
pub struct PermissionGuard {
    manager: Arc<PermissionManager>,
    extension: String,
    required: Vec<Permission>,
}

impl PermissionGuard {
    /// Run `f` if every required permission is still granted.
    pub fn run<T>(&self, operation: &str, f: impl FnOnce() -> T) -> Result<T> {
        for &permission in &self.required {
            if !self.manager.has(&self.extension, permission) {
                return Err(Error::PermissionDenied {
                    extension: self.extension.clone(),
                    operation: operation.to_string(),
                    permission,
                });
            }
        }
        Ok(f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ExtensionManifest;
    use crate::module::ManifestModule;
    use crate::registry::ExtensionRegistry;
    use pretty_assertions::assert_eq;

    fn manager() -> (tempfile::TempDir, Arc<EventBus>, Arc<PermissionManager>) {
        let dir = tempfile::TempDir::new().unwrap();
        let events = Arc::new(EventBus::new());
        let manager = Arc::new(
            PermissionManager::load(&dir.path().join("permissions.json"), Arc::clone(&events))
                .unwrap(),
        );
        (dir, events, manager)
    }

    #[test]
    fn test_grant_has_revoke() {
        let (_dir, _events, manager) = manager();

        assert!(!manager.has("sample", Permission::DocumentRead));
        manager
            .grant("sample", Permission::DocumentRead, Some("test"))
            .unwrap();
        assert!(manager.has("sample", Permission::DocumentRead));
        assert_eq!(manager.granted("sample"), vec![Permission::DocumentRead]);

        assert!(manager
            .revoke("sample", Permission::DocumentRead, None)
            .unwrap());
        assert!(!manager.has("sample", Permission::DocumentRead));
        assert!(!manager
            .revoke("sample", Permission::DocumentRead, None)
            .unwrap());

        let history = manager.history("sample");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, PermissionAction::Granted);
        assert_eq!(history[1].action, PermissionAction::Revoked);
    }

    #[test]
    fn test_grants_survive_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("permissions.json");

        {
            let events = Arc::new(EventBus::new());
            let manager = PermissionManager::load(&path, events).unwrap();
            manager.grant("sample", Permission::ChatRead, None).unwrap();
        }

        let events = Arc::new(EventBus::new());
        let manager = PermissionManager::load(&path, events).unwrap();
        assert!(manager.has("sample", Permission::ChatRead));
        assert_eq!(manager.history("sample").len(), 1);
    }

    #[test]
    fn test_deny_listed_never_grantable() {
        let (_dir, _events, manager) = manager();
        manager
            .set_policy(PermissionPolicy {
                global_deny_list: vec![Permission::NetworkAccess],
                ..Default::default()
            })
            .unwrap();

        let err = manager
            .grant("sample", Permission::NetworkAccess, None)
            .unwrap_err();
        assert!(matches!(err, Error::GloballyDenied { .. }));
        assert!(!manager.has("sample", Permission::NetworkAccess));

        // Not through the request path either
        assert!(!manager
            .request_permission("sample", Permission::NetworkAccess, None)
            .unwrap());

        // Nor through batch approval
        let outcome = manager
            .request_user_approval("sample", &[Permission::NetworkAccess], &[])
            .unwrap();
        assert!(!outcome.granted);
        assert_eq!(outcome.denied, vec![Permission::NetworkAccess]);
        assert!(!manager.has("sample", Permission::NetworkAccess));
    }

    #[test]
    fn test_request_safe_permission_auto_grants() {
        let (_dir, _events, manager) = manager();
        assert!(manager
            .request_permission("sample", Permission::DocumentRead, None)
            .unwrap());
        assert!(manager.has("sample", Permission::DocumentRead));

        // Second request short-circuits on the existing grant
        assert!(manager
            .request_permission("sample", Permission::DocumentRead, None)
            .unwrap());
        assert_eq!(manager.history("sample").len(), 1);
    }

    #[test]
    fn test_request_dangerous_permission_is_denied() {
        let (_dir, _events, manager) = manager();
        assert!(!manager
            .request_permission("sample", Permission::FileSystem, Some("needs disk"))
            .unwrap());
        assert!(!manager.has("sample", Permission::FileSystem));

        let history = manager.history("sample");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, PermissionAction::Requested);
        assert_eq!(history[1].action, PermissionAction::Denied);
    }

    #[test]
    fn test_request_user_approval_mixed_batch() {
        let (_dir, _events, manager) = manager();
        let outcome = manager
            .request_user_approval(
                "sample",
                &[Permission::DocumentRead, Permission::FileSystem],
                &[Permission::Embeddings],
            )
            .unwrap();

        assert!(!outcome.granted);
        assert_eq!(outcome.denied, vec![Permission::FileSystem]);
        assert!(manager.has("sample", Permission::DocumentRead));
        // Optional permissions are only recorded, never granted
        assert!(!manager.has("sample", Permission::Embeddings));
        let requested: Vec<_> = manager
            .history("sample")
            .into_iter()
            .filter(|e| e.action == PermissionAction::Requested)
            .map(|e| e.permission)
            .collect();
        assert_eq!(requested, vec![Permission::Embeddings]);
    }

    #[test]
    fn test_guard_rechecks_before_each_call() {
        let (_dir, _events, manager) = manager();
        manager
            .grant("sample", Permission::DocumentRead, None)
            .unwrap();
        let guard = manager.with_permissions("sample", &[Permission::DocumentRead]);

        assert_eq!(guard.run("read", || 42).unwrap(), 42);

        manager
            .revoke("sample", Permission::DocumentRead, None)
            .unwrap();
        let err = guard.run("read", || 42).unwrap_err();
        assert!(matches!(
            err,
            Error::PermissionDenied {
                permission: Permission::DocumentRead,
                ..
            }
        ));
    }

    #[test]
    fn test_registration_auto_grants_safe_required() {
        let (_dir, events, manager) = manager();
        let registry = ExtensionRegistry::new(Arc::clone(&events));
        let _sub = PermissionManager::subscribe_registrations(&manager, &events);

        let m = ExtensionManifest::from_toml(
            r#"
[extension]
name = "sample"
version = "1.0.0"

permissions = ["document-read", "file-system", "made-up"]
"#,
        )
        .unwrap();
        registry
            .register(Arc::new(ManifestModule::new(&m)), m.clone())
            .unwrap();

        assert!(manager.has("sample", Permission::DocumentRead));
        // Dangerous required permissions wait for explicit approval
        assert!(!manager.has("sample", Permission::FileSystem));
    }

    #[test]
    fn test_registration_respects_auto_grant_flag() {
        let (_dir, events, manager) = manager();
        manager
            .set_policy(PermissionPolicy {
                auto_grant_safe: false,
                ..Default::default()
            })
            .unwrap();
        let registry = ExtensionRegistry::new(Arc::clone(&events));
        let _sub = PermissionManager::subscribe_registrations(&manager, &events);

        let m = ExtensionManifest::from_toml(
            r#"
[extension]
name = "sample"
version = "1.0.0"

permissions = ["document-read"]
"#,
        )
        .unwrap();
        registry
            .register(Arc::new(ManifestModule::new(&m)), m.clone())
            .unwrap();

        assert!(!manager.has("sample", Permission::DocumentRead));
    }

    #[test]
    fn test_clear_drops_grants_and_history() {
        let (_dir, _events, manager) = manager();
        manager
            .grant("sample", Permission::DocumentRead, None)
            .unwrap();

        assert!(manager.clear("sample").unwrap());
        assert!(!manager.has("sample", Permission::DocumentRead));
        assert!(manager.history("sample").is_empty());
        assert!(!manager.clear("sample").unwrap());
    }

    #[test]
    fn test_policy_update_emits_event() {
        let (_dir, events, manager) = manager();
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        events.subscribe(move |event| {
            if matches!(event, Event::PolicyUpdated) {
                s.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        manager.set_policy(PermissionPolicy::default()).unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
