//! End-to-end permission tests: policy enforcement, durable grants, the
//! bounded history, and the invocation guard.

use std::path::Path;
use std::sync::Arc;

use ext_runtime::{
    Error, ExtensionHost, InstallOptions, ManifestModuleLoader, Permission, PermissionAction,
    PermissionPolicy, HISTORY_CAP,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write_extension(dir: &Path, name: &str, version: &str, extra: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("extension.toml"),
        format!("[extension]\nname = \"{name}\"\nversion = \"{version}\"\n{extra}"),
    )
    .unwrap();
}

fn host(root: &TempDir) -> ExtensionHost {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ExtensionHost::new(root.path(), Arc::new(ManifestModuleLoader)).unwrap()
}

#[test]
fn test_install_auto_grants_safe_required_permissions() {
    let root = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    write_extension(
        src.path(),
        "sample",
        "1.0.0",
        "\npermissions = [\"document-read\", \"file-system\"]\noptional_permissions = [\"embeddings\"]\n",
    );

    let host = host(&root);
    host.install(src.path(), &InstallOptions::default()).unwrap();

    let permissions = host.permissions();
    assert!(permissions.has("sample", Permission::DocumentRead));
    // Dangerous and optional permissions are never auto-granted
    assert!(!permissions.has("sample", Permission::FileSystem));
    assert!(!permissions.has("sample", Permission::Embeddings));
}

#[test]
fn test_deny_listed_permission_is_unreachable() {
    let root = TempDir::new().unwrap();
    let host = host(&root);
    let permissions = host.permissions();
    permissions
        .set_policy(PermissionPolicy {
            global_deny_list: vec![Permission::NetworkAccess],
            ..Default::default()
        })
        .unwrap();

    let err = permissions
        .grant("sample", Permission::NetworkAccess, None)
        .unwrap_err();
    assert!(matches!(err, Error::GloballyDenied { .. }));

    assert!(!permissions
        .request_permission("sample", Permission::NetworkAccess, Some("sync"))
        .unwrap());

    let outcome = permissions
        .request_user_approval("sample", &[Permission::NetworkAccess], &[])
        .unwrap();
    assert!(!outcome.granted);
    assert_eq!(outcome.denied, vec![Permission::NetworkAccess]);

    assert!(!permissions.has("sample", Permission::NetworkAccess));
}

#[test]
fn test_deny_list_applies_to_registration_auto_grant() {
    let root = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    write_extension(
        src.path(),
        "sample",
        "1.0.0",
        "\npermissions = [\"document-read\"]\n",
    );

    let host = host(&root);
    host.permissions()
        .set_policy(PermissionPolicy {
            global_deny_list: vec![Permission::DocumentRead],
            ..Default::default()
        })
        .unwrap();

    host.install(src.path(), &InstallOptions::default()).unwrap();
    assert!(!host.permissions().has("sample", Permission::DocumentRead));
}

#[test]
fn test_history_is_capped_oldest_first() {
    let root = TempDir::new().unwrap();
    let host = host(&root);
    let permissions = host.permissions();

    // Each iteration writes a grant and a revoke entry
    for i in 0..((HISTORY_CAP / 2) + 10) {
        permissions
            .grant("sample", Permission::DocumentRead, Some(&format!("g{i}")))
            .unwrap();
        permissions
            .revoke("sample", Permission::DocumentRead, Some(&format!("r{i}")))
            .unwrap();
    }

    let history = permissions.history("sample");
    assert_eq!(history.len(), HISTORY_CAP);
    // Oldest entries were evicted: the first surviving entry is no longer g0
    assert_ne!(history[0].reason.as_deref(), Some("g0"));
    assert_eq!(history.last().unwrap().action, PermissionAction::Revoked);
}

#[test]
fn test_guard_enforces_before_every_call() {
    let root = TempDir::new().unwrap();
    let host = host(&root);
    let permissions = host.permissions();
    permissions
        .grant("sample", Permission::DocumentRead, None)
        .unwrap();
    permissions
        .grant("sample", Permission::DocumentWrite, None)
        .unwrap();

    let guard = permissions.with_permissions(
        "sample",
        &[Permission::DocumentRead, Permission::DocumentWrite],
    );
    assert_eq!(guard.run("rewrite", || "ok").unwrap(), "ok");

    // Revoking one of the set fails the next call, naming the permission
    permissions
        .revoke("sample", Permission::DocumentWrite, None)
        .unwrap();
    let err = guard.run("rewrite", || "ok").unwrap_err();
    match err {
        Error::PermissionDenied {
            extension,
            operation,
            permission,
        } => {
            assert_eq!(extension, "sample");
            assert_eq!(operation, "rewrite");
            assert_eq!(permission, Permission::DocumentWrite);
        }
        other => panic!("expected PermissionDenied, got: {other:?}"),
    }
}

#[test]
fn test_grants_and_policy_survive_restart() {
    let root = TempDir::new().unwrap();
    {
        let host = host(&root);
        host.permissions()
            .set_policy(PermissionPolicy {
                global_deny_list: vec![Permission::InterceptRequests],
                ..Default::default()
            })
            .unwrap();
        host.permissions()
            .grant("sample", Permission::ChatRead, Some("setup"))
            .unwrap();
    }

    let host = host(&root);
    let permissions = host.permissions();
    assert!(permissions.has("sample", Permission::ChatRead));
    assert!(permissions
        .policy()
        .global_deny_list
        .contains(&Permission::InterceptRequests));
    assert_eq!(permissions.history("sample").len(), 1);
}

#[test]
fn test_uninstall_after_clear_leaves_no_grants() {
    let root = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    write_extension(
        src.path(),
        "sample",
        "1.0.0",
        "\npermissions = [\"document-read\"]\n",
    );

    let host = host(&root);
    host.install(src.path(), &InstallOptions::default()).unwrap();
    assert!(host.permissions().has("sample", Permission::DocumentRead));

    host.uninstall("sample").unwrap();
    assert!(host.permissions().clear("sample").unwrap());
    assert!(!host.permissions().has("sample", Permission::DocumentRead));
    assert!(host.permissions().history("sample").is_empty());
}
