// tests/workflow.rs

//! Install, upgrade and remove workflows against a scratch root

mod common;

use common::TestEnv;
use ibuild::transaction::{JournalRecord, PackageLock, PlannedAction};
use ibuild::{BuildArtifact, Error, InstallOptions, RemoveOptions};
use std::fs;

fn explicit() -> InstallOptions {
    InstallOptions {
        explicit: true,
        ..Default::default()
    }
}

fn upgrade_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn last_outcome(env: &TestEnv) -> String {
    let history = env.manager().history().unwrap();
    history.last().unwrap().outcome().to_string()
}

#[test]
fn test_install_pulls_run_dependencies_first() {
    let env = TestEnv::new();
    env.add_recipe("app", "1.0", "rundeps=lib\n");
    env.add_recipe("lib", "0.3", "");
    let manager = env.manager();

    let plan = manager.install("app", explicit()).unwrap();
    assert_eq!(plan.changed_packages(), vec!["lib", "app"]);

    assert_eq!(env.installed_hello("app").as_deref(), Some("app 1.0"));
    assert_eq!(env.installed_hello("lib").as_deref(), Some("lib 0.3"));

    let app = manager.db().get("app").unwrap().unwrap();
    let lib = manager.db().get("lib").unwrap().unwrap();
    assert!(app.explicit);
    assert!(!lib.explicit);
    assert!(app.run_deps.contains("lib"));
    assert_eq!(app.files, vec!["usr/share/app/hello.txt"]);

    assert_eq!(last_outcome(&env), "committed");
    assert!(manager.orphans().unwrap().is_empty());
}

#[test]
fn test_install_reuses_existing_artifact() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.0", "");
    let manager = env.manager();

    manager.build("foo").unwrap();
    let plan = manager.install("foo", explicit()).unwrap();
    assert!(
        !plan
            .actions
            .iter()
            .any(|a| matches!(a, PlannedAction::Build { .. }))
    );
    assert_eq!(env.installed_hello("foo").as_deref(), Some("foo 1.0"));

    // Already installed: nothing to do
    let again = manager.install("foo", explicit()).unwrap();
    assert!(again.is_noop());
}

#[test]
fn test_install_dry_run_changes_nothing() {
    let env = TestEnv::new();
    env.add_recipe("app", "1.0", "rundeps=lib\n");
    env.add_recipe("lib", "0.3", "");
    let manager = env.manager();

    let plan = manager
        .install(
            "app",
            InstallOptions {
                dry_run: true,
                explicit: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(plan.changed_packages(), vec!["lib", "app"]);

    assert!(manager.db().list().unwrap().is_empty());
    assert!(env.installed_hello("app").is_none());
    assert!(BuildArtifact::locate(env.pkg_dir(), "app", "1.0").is_none());
    assert!(manager.history().unwrap().is_empty());
}

#[test]
fn test_upgrade_replaces_files() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.0", "");
    let manager = env.manager();
    manager.install("foo", explicit()).unwrap();

    env.add_recipe("foo", "1.1", "");
    let plan = manager.upgrade(&upgrade_names(&["foo"]), false).unwrap();
    assert_eq!(plan.changed_packages(), vec!["foo"]);
    assert_eq!(env.installed_hello("foo").as_deref(), Some("foo 1.1"));

    let record = manager.db().get("foo").unwrap().unwrap();
    assert_eq!(record.version, "1.1");
    assert!(record.explicit);

    // Nothing left to do at the same version
    assert!(manager.upgrade(&upgrade_names(&["foo"]), false).unwrap().is_noop());
}

#[test]
fn test_upgrade_dry_run_changes_nothing() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.0", "");
    let manager = env.manager();
    manager.install("foo", explicit()).unwrap();

    env.add_recipe("foo", "2.0", "");
    let plan = manager.upgrade(&upgrade_names(&["foo"]), true).unwrap();
    assert!(plan.actions.contains(&PlannedAction::Upgrade {
        package: "foo".to_string(),
        from: "1.0".to_string(),
        to: "2.0".to_string(),
    }));
    assert_eq!(env.installed_hello("foo").as_deref(), Some("foo 1.0"));
    assert!(BuildArtifact::locate(env.pkg_dir(), "foo", "2.0").is_none());
}

#[test]
fn test_failed_upgrade_rolls_back_in_reverse() {
    let env = TestEnv::new();
    for name in ["a", "b", "c"] {
        env.add_recipe(name, "1.0", "");
    }
    let manager = env.manager();
    for name in ["a", "b", "c"] {
        manager.install(name, explicit()).unwrap();
    }

    env.add_recipe("a", "2.0", "");
    env.add_recipe("b", "2.0", "build=exit 3\n");
    env.add_recipe("c", "2.0", "");

    match manager.upgrade(&upgrade_names(&["a", "b", "c"]), false) {
        Err(Error::BuildCommandFailed { package, code, .. }) => {
            assert_eq!(package, "b");
            assert_eq!(code, 3);
        }
        other => panic!("expected b's build to fail, got {:?}", other.map(|p| p.to_string())),
    }

    // a is back at its prior version
    assert_eq!(env.installed_hello("a").as_deref(), Some("a 1.0"));
    assert_eq!(manager.db().version_of("a").unwrap().as_deref(), Some("1.0"));
    assert_eq!(manager.db().version_of("b").unwrap().as_deref(), Some("1.0"));

    // c was never applied
    assert_eq!(env.installed_hello("c").as_deref(), Some("c 1.0"));
    assert!(BuildArtifact::locate(env.pkg_dir(), "c", "2.0").is_none());

    assert_eq!(last_outcome(&env), "rolled back");
    let status = manager.status().unwrap();
    assert!(status.inconsistency.is_none());
    assert!(status.incomplete.is_empty());
    assert_eq!(env.sandbox_entries(), 0);
}

#[test]
fn test_rollback_removes_package_that_was_not_installed() {
    let env = TestEnv::new();
    env.add_recipe("b", "1.0", "");
    let manager = env.manager();
    manager.install("b", explicit()).unwrap();

    env.add_recipe("fresh", "1.0", "");
    env.add_recipe("b", "2.0", "build=exit 1\n");

    let result = manager.upgrade(&upgrade_names(&["fresh", "b"]), false);
    assert!(matches!(result, Err(Error::BuildCommandFailed { .. })));

    assert!(manager.db().get("fresh").unwrap().is_none());
    assert!(env.installed_hello("fresh").is_none());
    assert!(!env.root().join("usr/share/fresh").exists());
    assert_eq!(env.installed_hello("b").as_deref(), Some("b 1.0"));
}

#[test]
fn test_unrestorable_rollback_flags_inconsistency() {
    let env = TestEnv::new();
    env.add_recipe("a", "1.0", "");
    env.add_recipe("b", "1.0", "");
    let manager = env.manager();
    manager.install("a", explicit()).unwrap();
    manager.install("b", explicit()).unwrap();

    // Without the prior artifact there is nothing to reinstall from
    let prior = BuildArtifact::locate(env.pkg_dir(), "a", "1.0").unwrap();
    for file in prior.files() {
        fs::remove_file(file).unwrap();
    }

    env.add_recipe("a", "2.0", "");
    env.add_recipe("b", "2.0", "build=exit 3\n");

    match manager.upgrade(&upgrade_names(&["a", "b"]), false) {
        Err(Error::RollbackFailed { packages, .. }) => assert_eq!(packages, vec!["a"]),
        other => panic!("expected a failed rollback, got {:?}", other.map(|p| p.to_string())),
    }

    let status = manager.status().unwrap();
    let marker = status.inconsistency.unwrap();
    assert!(marker.contains("package=a"));
    assert_eq!(last_outcome(&env), "rollback failed");

    manager.clear_inconsistent().unwrap();
    assert!(manager.status().unwrap().inconsistency.is_none());
}

#[test]
fn test_unrestorable_package_does_not_stop_rollback() {
    let env = TestEnv::new();
    for name in ["a", "b", "c"] {
        env.add_recipe(name, "1.0", "");
    }
    let manager = env.manager();
    for name in ["a", "b", "c"] {
        manager.install(name, explicit()).unwrap();
    }

    // b cannot be put back; a still can
    let prior = BuildArtifact::locate(env.pkg_dir(), "b", "1.0").unwrap();
    for file in prior.files() {
        fs::remove_file(file).unwrap();
    }

    env.add_recipe("a", "2.0", "");
    env.add_recipe("b", "2.0", "");
    env.add_recipe("c", "2.0", "build=exit 3\n");

    match manager.upgrade(&upgrade_names(&["a", "b", "c"]), false) {
        Err(Error::RollbackFailed { packages, .. }) => assert_eq!(packages, vec!["b"]),
        other => panic!("expected a failed rollback, got {:?}", other.map(|p| p.to_string())),
    }

    assert_eq!(env.installed_hello("a").as_deref(), Some("a 1.0"));
    assert_eq!(manager.db().version_of("a").unwrap().as_deref(), Some("1.0"));
    assert_eq!(env.installed_hello("c").as_deref(), Some("c 1.0"));

    let marker = manager.status().unwrap().inconsistency.unwrap();
    assert!(marker.contains("package=b"));
    assert!(!marker.contains("package=a"));

    let history = manager.history().unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.outcome(), "rollback failed");
    assert!(last.records.iter().any(|r| matches!(
        r,
        JournalRecord::RolledBack { package } if package == "a"
    )));
}

#[test]
fn test_unsafe_removal_changes_nothing() {
    let env = TestEnv::new();
    env.add_recipe("app", "1.0", "rundeps=lib\n");
    env.add_recipe("lib", "0.3", "");
    let manager = env.manager();
    manager.install("app", explicit()).unwrap();

    match manager.remove("lib", RemoveOptions::default()) {
        Err(Error::UnsafeRemoval {
            package,
            dependents,
        }) => {
            assert_eq!(package, "lib");
            assert_eq!(dependents, vec!["app"]);
        }
        other => panic!("expected an unsafe removal, got {:?}", other.map(|p| p.to_string())),
    }

    assert_eq!(env.installed_hello("lib").as_deref(), Some("lib 0.3"));
    assert!(manager.db().is_installed("lib"));
    assert!(manager.verify(None).unwrap().iter().all(|r| r.is_ok()));
}

#[test]
fn test_remove_then_orphans() {
    let env = TestEnv::new();
    env.add_recipe("app", "1.0", "rundeps=lib\n");
    env.add_recipe("lib", "0.3", "");
    let manager = env.manager();
    manager.install("app", explicit()).unwrap();

    manager.remove("app", RemoveOptions::default()).unwrap();
    assert!(env.installed_hello("app").is_none());
    assert!(!env.root().join("usr/share/app").exists());
    assert!(manager.db().get("app").unwrap().is_none());

    assert_eq!(manager.orphans().unwrap(), vec!["lib"]);
    manager.remove("lib", RemoveOptions::default()).unwrap();
    assert!(manager.db().list().unwrap().is_empty());
}

#[test]
fn test_remove_runs_hooks_around_file_removal() {
    let env = TestEnv::new();
    let marker = env.dir.path().join("removed");
    env.add_recipe(
        "foo",
        "1.0",
        &format!(
            "hook_remove_post=test ! -e \"$DESTDIR/usr/share/foo/hello.txt\" && touch {}\n",
            marker.display()
        ),
    );
    let manager = env.manager();
    manager.install("foo", explicit()).unwrap();

    manager.remove("foo", RemoveOptions::default()).unwrap();
    assert!(marker.exists());
}

#[test]
fn test_remove_runs_recorded_hooks_after_recipe_is_gone() {
    let env = TestEnv::new();
    let marker = env.dir.path().join("remove-pre-ran");
    env.add_recipe(
        "foo",
        "1.0",
        &format!("hook_remove_pre=touch {}\n", marker.display()),
    );
    let manager = env.manager();
    manager.install("foo", explicit()).unwrap();

    fs::remove_dir_all(env.package_dir("foo")).unwrap();
    manager.remove("foo", RemoveOptions::default()).unwrap();

    assert!(marker.exists());
    assert!(env.installed_hello("foo").is_none());
}

#[test]
fn test_remove_waits_for_target_lock_before_checking_dependents() {
    let env = TestEnv::new();
    env.add_recipe("app", "1.0", "rundeps=lib\n");
    env.add_recipe("lib", "0.3", "");
    let manager = env.manager();
    manager.install("app", explicit()).unwrap();

    // Another operation holds lib while this removal would be refused anyway
    let held = PackageLock::acquire(&manager.lock_dir(), "lib").unwrap();
    match manager.remove("lib", RemoveOptions::default()) {
        Err(Error::LockError(_)) => {}
        other => panic!("expected a lock error, got {:?}", other.map(|p| p.to_string())),
    }
    drop(held);

    assert!(matches!(
        manager.remove("lib", RemoveOptions::default()),
        Err(Error::UnsafeRemoval { .. })
    ));
    assert!(manager.db().is_installed("lib"));
}

#[test]
fn test_virtual_dependency_installs_provider() {
    let env = TestEnv::new();
    env.add_recipe("app", "1.0", "rundeps=libssl\n");
    env.add_recipe("openssl", "3.0", "provides=libssl\n");
    let manager = env.manager();

    let plan = manager.install("app", explicit()).unwrap();
    assert_eq!(plan.changed_packages(), vec!["openssl", "app"]);
    assert!(manager.db().get("openssl").unwrap().unwrap().provides.contains("libssl"));

    match manager.remove("openssl", RemoveOptions::default()) {
        Err(Error::UnsafeRemoval { dependents, .. }) => assert_eq!(dependents, vec!["app"]),
        other => panic!("expected an unsafe removal, got {:?}", other.map(|p| p.to_string())),
    }

    manager.remove("app", RemoveOptions::default()).unwrap();
    assert_eq!(manager.orphans().unwrap(), vec!["openssl"]);
}

#[test]
fn test_conflicting_install_changes_nothing() {
    let env = TestEnv::new();
    env.add_recipe("openssl", "3.0", "provides=libssl\n");
    env.add_recipe("libressl", "3.8", "conflicts=libssl\n");
    let manager = env.manager();
    manager.install("openssl", explicit()).unwrap();

    let dry_run = InstallOptions {
        dry_run: true,
        ..explicit()
    };
    for opts in [dry_run, explicit()] {
        match manager.install("libressl", opts) {
            Err(Error::Conflict {
                package,
                conflicts_with,
            }) => {
                assert_eq!(package, "libressl");
                assert_eq!(conflicts_with, "openssl");
            }
            other => panic!("expected a conflict, got {:?}", other.map(|p| p.to_string())),
        }
    }

    assert!(!manager.db().is_installed("libressl"));
    assert!(env.installed_hello("libressl").is_none());
    assert!(BuildArtifact::locate(env.pkg_dir(), "libressl", "3.8").is_none());
    assert_eq!(env.installed_hello("openssl").as_deref(), Some("openssl 3.0"));
}

#[test]
fn test_optional_dependencies_reported_unless_requested() {
    let env = TestEnv::new();
    env.add_recipe("editor", "1.0", "optdeps=spell\n");
    env.add_recipe("viewer", "1.0", "optdeps=spell\n");
    env.add_recipe("spell", "2.1", "");
    let manager = env.manager();

    let plan = manager.install("editor", explicit()).unwrap();
    assert_eq!(plan.changed_packages(), vec!["editor"]);
    assert_eq!(plan.optional, vec![("editor".to_string(), "spell".to_string())]);
    assert!(!manager.db().is_installed("spell"));
    let record = manager.db().get("editor").unwrap().unwrap();
    assert!(record.optional_deps.contains("spell"));
    assert!(!record.run_deps.contains("spell"));

    let with_optional = InstallOptions {
        with_optional: true,
        ..explicit()
    };
    let plan = manager.install("viewer", with_optional).unwrap();
    assert_eq!(plan.changed_packages(), vec!["spell", "viewer"]);
    assert!(plan.optional.is_empty());
    assert_eq!(env.installed_hello("spell").as_deref(), Some("spell 2.1"));
    // Only pulled in, so nothing holds on to it
    assert_eq!(manager.orphans().unwrap(), vec!["spell"]);
}

#[test]
fn test_rollback_command_reinstalls_kept_snapshot() {
    let env = TestEnv::new();
    env.add_recipe("a", "1.0", "");
    env.add_recipe("b", "1.0", "");
    let manager = env.manager();
    manager.install("a", explicit()).unwrap();
    manager.install("b", explicit()).unwrap();

    // Move a's artifact aside so the automatic rollback cannot use it
    let backup = env.dir.path().join("backup");
    fs::create_dir_all(&backup).unwrap();
    let prior = BuildArtifact::locate(env.pkg_dir(), "a", "1.0").unwrap();
    for file in prior.files() {
        fs::rename(file, backup.join(file.file_name().unwrap())).unwrap();
    }

    env.add_recipe("a", "2.0", "");
    env.add_recipe("b", "2.0", "build=exit 3\n");
    let txn = match manager.upgrade(&upgrade_names(&["a", "b"]), false) {
        Err(Error::RollbackFailed {
            transaction,
            packages,
            ..
        }) => {
            assert_eq!(packages, vec!["a"]);
            transaction
        }
        other => panic!("expected a failed rollback, got {:?}", other.map(|p| p.to_string())),
    };
    assert_eq!(env.installed_hello("a").as_deref(), Some("a 2.0"));

    // The operator puts the artifact back into the kept snapshot
    let snapshot = env.config.paths.txn_dir.join(txn.to_string()).join("a");
    for entry in fs::read_dir(&backup).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), snapshot.join(entry.file_name())).unwrap();
    }

    let restored = manager.rollback_transaction(txn).unwrap();
    assert!(restored.contains(&"a".to_string()));
    assert_eq!(env.installed_hello("a").as_deref(), Some("a 1.0"));
    assert_eq!(manager.db().version_of("a").unwrap().as_deref(), Some("1.0"));
    assert_eq!(env.installed_hello("b").as_deref(), Some("b 1.0"));

    let status = manager.status().unwrap();
    assert!(status.inconsistency.is_none());
    assert!(status.incomplete.is_empty());
    assert_eq!(last_outcome(&env), "recovered");
    assert!(!env.config.paths.txn_dir.join(txn.to_string()).exists());

    assert!(matches!(
        manager.rollback_transaction(txn),
        Err(Error::NoSnapshot(id)) if id == txn
    ));
}

#[test]
fn test_rollback_command_needs_kept_snapshot() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.0", "");
    let manager = env.manager();
    manager.install("foo", explicit()).unwrap();

    let committed = manager.history().unwrap()[0].txn;
    assert!(matches!(
        manager.rollback_transaction(committed),
        Err(Error::NoSnapshot(_))
    ));
    assert!(matches!(
        manager.rollback_transaction(999),
        Err(Error::NoSnapshot(999))
    ));
}

#[test]
fn test_remove_orphans_repeats_until_none_left() {
    let env = TestEnv::new();
    env.add_recipe("app", "1.0", "rundeps=lib\n");
    env.add_recipe("lib", "1.0", "rundeps=base\n");
    env.add_recipe("base", "1.0", "");
    env.add_recipe("core", "1.0", "essential=true\n");
    let manager = env.manager();
    manager.install("app", explicit()).unwrap();
    manager.install("core", InstallOptions::default()).unwrap();
    manager.remove("app", RemoveOptions::default()).unwrap();

    // A dry run reports the current orphans only
    let mut planned = manager.remove_orphans(true).unwrap();
    planned.sort();
    assert_eq!(planned, vec!["core", "lib"]);
    assert!(manager.db().is_installed("lib"));

    let removed = manager.remove_orphans(false).unwrap();
    assert_eq!(removed, vec!["lib", "base"]);
    assert!(env.installed_hello("base").is_none());

    // Essential orphans stay
    assert_eq!(manager.orphans().unwrap(), vec!["core"]);
    assert!(manager.db().is_installed("core"));
}
