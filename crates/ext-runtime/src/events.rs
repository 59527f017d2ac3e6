//! Synchronous publish/subscribe for runtime events.
//!
//! Subscribers observe the already-committed state: every component first
//! commits its mutation and releases its locks, then emits. Delivery is
//! synchronous and in subscription order.

use std::sync::{Arc, Mutex, PoisonError};

use crate::lifecycle::LifecycleState;
use crate::permission::Permission;

/// Everything the runtime announces to its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An extension was registered for the first time.
    Registered {
        name: String,
        version: semver::Version,
        required_permissions: Vec<String>,
        optional_permissions: Vec<String>,
    },
    /// A strictly greater version is about to replace an existing record.
    Replaced {
        name: String,
        old_version: semver::Version,
        new_version: semver::Version,
    },
    /// An extension was removed from the registry.
    Unregistered { name: String },
    /// An extension's initialize callback completed.
    Initialized { name: String },
    /// An extension entered its error state.
    ExtensionError { name: String, reason: String },
    /// A lifecycle transition was committed.
    LifecycleChanged {
        name: String,
        from: Option<LifecycleState>,
        to: LifecycleState,
        reason: Option<String>,
    },
    PermissionGranted {
        name: String,
        permission: Permission,
    },
    PermissionRevoked {
        name: String,
        permission: Permission,
    },
    PermissionRequested {
        name: String,
        permission: Permission,
        reason: Option<String>,
    },
    PermissionDenied {
        name: String,
        permission: Permission,
        reason: Option<String>,
    },
    /// The process-wide permission policy changed.
    PolicyUpdated,
    /// An extension's files were installed into managed storage.
    Installed {
        name: String,
        version: semver::Version,
    },
    /// An extension was fully removed.
    Uninstalled { name: String },
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<(u64, Subscriber)>,
}

/// Process-wide event bus with synchronous, subscription-ordered delivery.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Callbacks run synchronously on the emitting
    /// thread, in subscription order.
    pub fn subscribe(&self, callback: impl Fn(&Event) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    /// Remove a subscriber. Returns `false` if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id.0);
        inner.subscribers.len() != before
    }

    /// Deliver `event` to every subscriber in subscription order.
    ///
    /// The subscriber list is snapshotted before delivery so callbacks may
    /// subscribe, unsubscribe, or emit without deadlocking.
    pub fn emit(&self, event: &Event) {
        let snapshot: Vec<Subscriber> = {
            let inner = self.lock();
            inner.subscribers.iter().map(|(_, s)| Arc::clone(s)).collect()
        };
        for subscriber in snapshot {
            subscriber(event);
        }
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
