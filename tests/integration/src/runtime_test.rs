//! End-to-end lifecycle tests: install -> activate -> deactivate ->
//! uninstall, dependency gating, and loading from managed storage.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ext_runtime::{
    DeactivateOptions, Error, Event, ExtensionHost, InstallOptions, LifecycleState,
    ManifestModuleLoader,
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
    std::fs::write(dir.join("module.dat"), name).unwrap();
}

fn host(root: &TempDir) -> ExtensionHost {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ExtensionHost::new(root.path(), Arc::new(ManifestModuleLoader)).unwrap()
}

#[test]
fn test_full_lifecycle_round_trip() {
    let root = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    write_extension(src.path(), "sample", "1.0.0", "");

    let host = host(&root);
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    host.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    // Install auto-activates by default
    host.install(src.path(), &InstallOptions::default()).unwrap();
    assert!(host.registry().contains("sample"));
    assert_eq!(
        host.state_of("sample").unwrap().state,
        LifecycleState::Active
    );

    host.deactivate("sample", DeactivateOptions::default())
        .unwrap();
    assert_eq!(
        host.state_of("sample").unwrap().state,
        LifecycleState::Inactive
    );

    host.activate("sample").unwrap();
    host.suspend("sample", Some("maintenance")).unwrap();
    assert_eq!(
        host.state_of("sample").unwrap().state,
        LifecycleState::Suspended
    );
    host.resume("sample").unwrap();
    assert_eq!(
        host.state_of("sample").unwrap().state,
        LifecycleState::Active
    );

    host.uninstall("sample").unwrap();
    assert!(!host.registry().contains("sample"));
    assert!(host.state_of("sample").is_none());
    assert!(
        !host
            .installer()
            .layout()
            .extension_dir("sample")
            .exists()
    );

    let events = log.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Registered { name, .. } if name == "sample")));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Installed { name, .. } if name == "sample")));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Uninstalled { name } if name == "sample")));
    // Uninstall announced after the registry entry was removed
    let unregistered = events
        .iter()
        .position(|e| matches!(e, Event::Unregistered { .. }))
        .unwrap();
    let uninstalled = events
        .iter()
        .position(|e| matches!(e, Event::Uninstalled { .. }))
        .unwrap();
    assert!(unregistered < uninstalled);
}

#[test]
fn test_activation_fails_on_missing_dependency() {
    let root = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    write_extension(
        src.path(),
        "child",
        "1.0.0",
        "\n[dependencies]\nparent = \"^1.0.0\"\n",
    );

    let host = host(&root);
    let err = host
        .install(src.path(), &InstallOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::UnsatisfiedDependencies { .. }));

    let record = host.state_of("child").unwrap();
    assert_eq!(record.state, LifecycleState::Error);
    assert!(
        record
            .reason
            .as_deref()
            .unwrap()
            .contains("unsatisfied dependencies")
    );

    // Installing the dependency unblocks activation
    let parent_src = TempDir::new().unwrap();
    write_extension(parent_src.path(), "parent", "1.0.0", "");
    host.install(parent_src.path(), &InstallOptions::default())
        .unwrap();
    host.activate("child").unwrap();
    assert_eq!(
        host.state_of("child").unwrap().state,
        LifecycleState::Active
    );
}

#[test]
fn test_activation_fails_on_version_mismatch() {
    let root = TempDir::new().unwrap();
    let host = host(&root);

    let parent_src = TempDir::new().unwrap();
    write_extension(parent_src.path(), "parent", "2.0.0", "");
    host.install(parent_src.path(), &InstallOptions::default())
        .unwrap();

    let child_src = TempDir::new().unwrap();
    write_extension(
        child_src.path(),
        "child",
        "1.0.0",
        "\n[dependencies]\nparent = \"^1.0.0\"\n",
    );
    let err = host
        .install(child_src.path(), &InstallOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::UnsatisfiedDependencies { .. }));
    assert!(err.to_string().contains("version mismatch"));
}

#[test]
fn test_deactivate_blocked_by_active_dependent() {
    let root = TempDir::new().unwrap();
    let host = host(&root);

    let parent_src = TempDir::new().unwrap();
    write_extension(parent_src.path(), "parent", "1.0.0", "");
    host.install(parent_src.path(), &InstallOptions::default())
        .unwrap();

    let child_src = TempDir::new().unwrap();
    write_extension(
        child_src.path(),
        "child",
        "1.0.0",
        "\n[dependencies]\nparent = \"^1.0.0\"\n",
    );
    host.install(child_src.path(), &InstallOptions::default())
        .unwrap();

    let err = host
        .deactivate("parent", DeactivateOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::ActiveDependents { .. }));

    // Either deactivate the dependent first, or force
    host.deactivate("child", DeactivateOptions::default())
        .unwrap();
    host.deactivate("parent", DeactivateOptions::default())
        .unwrap();
    assert_eq!(
        host.state_of("parent").unwrap().state,
        LifecycleState::Inactive
    );
}

#[test]
fn test_upgrade_replaces_version() {
    let root = TempDir::new().unwrap();
    let host = host(&root);

    let src = TempDir::new().unwrap();
    write_extension(src.path(), "sample", "1.0.0", "");
    host.install(src.path(), &InstallOptions::default()).unwrap();

    write_extension(src.path(), "sample", "1.1.0", "");
    host.install(src.path(), &InstallOptions::default()).unwrap();
    assert_eq!(
        host.registry().version_of("sample"),
        Some(semver::Version::new(1, 1, 0))
    );

    // Downgrade is rejected
    write_extension(src.path(), "sample", "0.9.0", "");
    let err = host
        .install(src.path(), &InstallOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidVersion { .. }));
}

#[test]
fn test_restart_loads_dependency_first() {
    let root = TempDir::new().unwrap();
    {
        let host = host(&root);
        let base_src = TempDir::new().unwrap();
        write_extension(base_src.path(), "base", "1.0.0", "");
        host.install(base_src.path(), &InstallOptions { activate: false })
            .unwrap();

        let mid_src = TempDir::new().unwrap();
        write_extension(
            mid_src.path(),
            "mid",
            "1.0.0",
            "\n[dependencies]\nbase = \"^1.0.0\"\n",
        );
        host.install(mid_src.path(), &InstallOptions { activate: false })
            .unwrap();

        let top_src = TempDir::new().unwrap();
        write_extension(
            top_src.path(),
            "top",
            "1.0.0",
            "\n[dependencies]\nmid = \"^1.0.0\"\ncore = \">=1.0.0\"\n",
        );
        host.install(top_src.path(), &InstallOptions { activate: false })
            .unwrap();
    }

    let host = host(&root);
    let loaded = host.load_installed(true).unwrap();
    assert_eq!(loaded, vec!["base", "mid", "top"]);
    for name in ["base", "mid", "top"] {
        assert_eq!(
            host.state_of(name).unwrap().state,
            LifecycleState::Active,
            "{name} should be active after startup load"
        );
    }
}

#[test]
fn test_cyclic_dependencies_still_load() {
    let root = TempDir::new().unwrap();
    {
        let host = host(&root);
        for (name, dep) in [("ping", "pong"), ("pong", "ping")] {
            let src = TempDir::new().unwrap();
            write_extension(
                src.path(),
                name,
                "1.0.0",
                &format!("\n[dependencies]\n{dep} = \"^1.0.0\"\n"),
            );
            host.install(src.path(), &InstallOptions { activate: false })
                .unwrap();
        }
    }

    let host = host(&root);
    let mut loaded = host.load_installed(false).unwrap();
    loaded.sort();
    assert_eq!(loaded, vec!["ping", "pong"]);
}

#[test]
fn test_illegal_transition_rejected_end_to_end() {
    let root = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    write_extension(src.path(), "sample", "1.0.0", "");

    let host = host(&root);
    host.install(src.path(), &InstallOptions::default()).unwrap();

    host.lifecycle()
        .update_state("sample", LifecycleState::Uninstalling, None)
        .unwrap();
    let err = host
        .lifecycle()
        .update_state("sample", LifecycleState::Active, None)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::IllegalTransition {
            from: LifecycleState::Uninstalling,
            to: LifecycleState::Active,
            ..
        }
    ));
}
