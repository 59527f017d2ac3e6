use std::path::PathBuf;

use crate::lifecycle::LifecycleState;
use crate::permission::Permission;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the extension runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to parse extension manifest TOML.
    #[error("failed to parse extension manifest: {0}")]
    ManifestParse(#[from] toml::de::Error),

    /// Extension manifest file not found at the expected path.
    #[error("extension manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    /// Failed to serialize extension manifest.
    #[error("failed to serialize extension manifest: {0}")]
    ManifestSerialize(String),

    /// Invalid extension name.
    #[error("invalid extension name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Invalid semver version string.
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    /// Invalid dependency range declared in a manifest.
    #[error("invalid dependency range '{range}' on '{dependency}': {reason}")]
    InvalidRange {
        dependency: String,
        range: String,
        reason: String,
    },

    /// Extension not found in the registry.
    #[error("unknown extension: {0}")]
    UnknownExtension(String),

    /// Lifecycle transition not allowed by the state machine.
    #[error("illegal lifecycle transition for '{name}': {from} -> {to}")]
    IllegalTransition {
        name: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// One or more declared dependencies are missing or mismatched.
    #[error("unsatisfied dependencies for '{name}': {summary}")]
    UnsatisfiedDependencies { name: String, summary: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected at '{0}'")]
    DependencyCycle(String),

    /// Deactivation refused because live dependents exist.
    #[error("extension '{name}' has active dependents: {}", dependents.join(", "))]
    ActiveDependents {
        name: String,
        dependents: Vec<String>,
    },

    /// Module initialization callback failed.
    #[error("initialization failed for '{name}': {reason}")]
    InitializationFailed { name: String, reason: String },

    /// Permission is on the policy's global deny list.
    #[error("permission '{permission}' is globally denied")]
    GloballyDenied { permission: Permission },

    /// A guarded operation was invoked without the required grant.
    #[error("permission denied for '{extension}': operation '{operation}' requires '{permission}'")]
    PermissionDenied {
        extension: String,
        operation: String,
        permission: Permission,
    },

    /// Invalid extension source directory.
    #[error("invalid source for extension '{name}': {reason}")]
    InvalidSource { name: String, reason: String },

    /// Failed to serialize the permission store.
    #[error("failed to serialize permission store: {0}")]
    StoreSerialize(String),

    /// Failed to parse the permission store.
    #[error("failed to parse permission store at {path}: {reason}")]
    StoreParse { path: PathBuf, reason: String },

    /// Storage error from ext-fs.
    #[error(transparent)]
    Fs(#[from] ext_fs::Error),

    /// I/O error reading or writing extension files.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
