//! Closed permission vocabulary and the runtime-mutable policy.
//!
//! Permissions fall into three categories: resources an extension may read
//! or write, actions it may take, and execution contexts it may run in. A
//! fixed subset is considered dangerous and always requires approval.
//! Unknown permission strings exist only at the manifest-parsing boundary
//! and are rejected by [`Permission::parse`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named gate that must be granted before a protected operation runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    // Resources
    /// Read document contents.
    DocumentRead,
    /// Create or modify documents.
    DocumentWrite,
    /// Read chat transcripts.
    ChatRead,
    /// Post or modify chat messages.
    ChatWrite,
    /// Access user profile data.
    UserData,
    /// Read or change system settings.
    SystemSettings,

    // Actions
    /// Open network connections.
    NetworkAccess,
    /// Read or write the file system.
    FileSystem,
    /// Drive the chat subsystem.
    ChatAccess,
    /// Invoke registered tools.
    ToolUsage,
    /// Compute or query embeddings.
    Embeddings,
    /// Contribute to or manipulate the UI.
    UiAccess,
    /// Persist extension-private data.
    DataStorage,

    // Contexts
    /// Run when the host starts.
    RunOnStartup,
    /// Run as a background task.
    RunInBackground,
    /// Run on a schedule.
    RunOnSchedule,
    /// Intercept and rewrite outgoing requests.
    InterceptRequests,
}

/// Broad grouping of permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionCategory {
    /// Data an extension may read or write.
    Resource,
    /// An action an extension may take.
    Action,
    /// An execution context an extension may run in.
    Context,
}

impl Permission {
    /// All permissions in the closed set.
    pub fn all() -> &'static [Permission] {
        use Permission::*;
        &[
            DocumentRead,
            DocumentWrite,
            ChatRead,
            ChatWrite,
            UserData,
            SystemSettings,
            NetworkAccess,
            FileSystem,
            ChatAccess,
            ToolUsage,
            Embeddings,
            UiAccess,
            DataStorage,
            RunOnStartup,
            RunInBackground,
            RunOnSchedule,
            InterceptRequests,
        ]
    }

    /// Parse a permission name from a manifest string.
    pub fn parse(s: &str) -> Option<Self> {
        use Permission::*;
        match s {
            "document-read" => Some(DocumentRead),
            "document-write" => Some(DocumentWrite),
            "chat-read" => Some(ChatRead),
            "chat-write" => Some(ChatWrite),
            "user-data" => Some(UserData),
            "system-settings" => Some(SystemSettings),
            "network-access" => Some(NetworkAccess),
            "file-system" => Some(FileSystem),
            "chat-access" => Some(ChatAccess),
            "tool-usage" => Some(ToolUsage),
            "embeddings" => Some(Embeddings),
            "ui-access" => Some(UiAccess),
            "data-storage" => Some(DataStorage),
            "run-on-startup" => Some(RunOnStartup),
            "run-in-background" => Some(RunInBackground),
            "run-on-schedule" => Some(RunOnSchedule),
            "intercept-requests" => Some(InterceptRequests),
            _ => None,
        }
    }

    /// The wire/manifest name of this permission.
    pub fn as_str(&self) -> &'static str {
        use Permission::*;
        match self {
            DocumentRead => "document-read",
            DocumentWrite => "document-write",
            ChatRead => "chat-read",
            ChatWrite => "chat-write",
            UserData => "user-data",
            SystemSettings => "system-settings",
            NetworkAccess => "network-access",
            FileSystem => "file-system",
            ChatAccess => "chat-access",
            ToolUsage => "tool-usage",
            Embeddings => "embeddings",
            UiAccess => "ui-access",
            DataStorage => "data-storage",
            RunOnStartup => "run-on-startup",
            RunInBackground => "run-in-background",
            RunOnSchedule => "run-on-schedule",
            InterceptRequests => "intercept-requests",
        }
    }

    /// The category this permission belongs to.
    pub fn category(&self) -> PermissionCategory {
        use Permission::*;
        match self {
            DocumentRead | DocumentWrite | ChatRead | ChatWrite | UserData | SystemSettings => {
                PermissionCategory::Resource
            }
            NetworkAccess | FileSystem | ChatAccess | ToolUsage | Embeddings | UiAccess
            | DataStorage => PermissionCategory::Action,
            RunOnStartup | RunInBackground | RunOnSchedule | InterceptRequests => {
                PermissionCategory::Context
            }
        }
    }

    /// Whether this permission is in the fixed dangerous subset.
    pub fn is_dangerous(&self) -> bool {
        matches!(
            self,
            Permission::FileSystem
                | Permission::SystemSettings
                | Permission::NetworkAccess
                | Permission::InterceptRequests
        )
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide permission policy, mutable at runtime and persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionPolicy {
    /// Permissions that can never be granted.
    #[serde(default)]
    pub global_deny_list: Vec<Permission>,
    /// Permissions that require explicit approval beyond the dangerous set.
    #[serde(default)]
    pub require_approval_for: Vec<Permission>,
    /// Auto-grant safe required permissions at registration time.
    #[serde(default = "default_true")]
    pub auto_grant_safe: bool,
    /// Remember grant/deny decisions across sessions.
    #[serde(default = "default_true")]
    pub remember_decisions: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            global_deny_list: Vec::new(),
            require_approval_for: Vec::new(),
            auto_grant_safe: true,
            remember_decisions: true,
        }
    }
}

impl PermissionPolicy {
    /// Whether `permission` can never be granted.
    pub fn is_denied(&self, permission: Permission) -> bool {
        self.global_deny_list.contains(&permission)
    }

    /// Whether granting `permission` requires explicit approval.
    ///
    /// Dangerous permissions always require approval; the policy can widen
    /// the set but not narrow it.
    pub fn requires_approval(&self, permission: Permission) -> bool {
        permission.is_dangerous() || self.require_approval_for.contains(&permission)
    }
}

/// What happened to a permission, as recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionAction {
    Granted,
    Revoked,
    Requested,
    Denied,
}

/// One append-only history entry for an extension's permission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionHistoryEntry {
    pub permission: Permission,
    pub action: PermissionAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl PermissionHistoryEntry {
    /// Create an entry stamped with the current time.
    pub fn now(
        permission: Permission,
        action: PermissionAction,
        reason: Option<String>,
    ) -> Self {
        Self {
            permission,
            action,
            timestamp: Utc::now(),
            reason,
        }
    }
}
