// tests/pipeline.rs

//! Build pipeline: fetch, patch, configure, build, stage, package

mod common;

use common::{TestEnv, sha256_of};
use ibuild::{BuildArtifact, Error, InstallOptions};
use std::fs;

#[test]
fn test_build_produces_artifact_triple() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.2", "description=test package\n");

    let result = env.manager().build("foo").unwrap();
    let artifact = result.artifact;
    assert!(artifact.exists());
    assert_eq!(
        artifact,
        BuildArtifact::paths(env.pkg_dir(), "foo", "1.2")
    );

    let manifest = fs::read_to_string(&artifact.manifest).unwrap();
    assert_eq!(manifest, "usr/share/foo/hello.txt\n");

    let meta = fs::read_to_string(&artifact.meta).unwrap();
    let recipe = fs::read_to_string(env.package_dir("foo").join("foo.meta")).unwrap();
    assert_eq!(meta, recipe);

    let log = fs::read_to_string(&result.log_path).unwrap();
    assert!(log.contains("=== stage ==="));
    assert_eq!(env.sandbox_entries(), 0);
}

#[test]
fn test_rebuild_gives_identical_manifest() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.2", "");
    let manager = env.manager();

    let first = manager.build("foo").unwrap();
    let manifest = fs::read(&first.artifact.manifest).unwrap();
    let second = manager.build("foo").unwrap();
    assert_eq!(fs::read(&second.artifact.manifest).unwrap(), manifest);
}

#[test]
fn test_matching_checksum_builds() {
    let env = TestEnv::new();
    let meta = env.add_recipe("foo", "1.2", "");
    let digest = sha256_of(&env.package_dir("foo").join("foo-1.2.tar.gz"));
    let mut record = fs::read_to_string(&meta).unwrap();
    record.push_str(&format!("checksum={}\n", digest));
    fs::write(&meta, record).unwrap();

    assert!(env.manager().build("foo").unwrap().artifact.exists());
}

#[test]
fn test_checksum_mismatch_aborts_before_build() {
    let env = TestEnv::new();
    let wrong = format!("sha256:{}", "0".repeat(64));
    env.add_recipe("foo", "1.2", &format!("checksum={}\n", wrong));

    match env.manager().build("foo") {
        Err(Error::IntegrityMismatch {
            package, expected, ..
        }) => {
            assert_eq!(package, "foo");
            assert_eq!(expected, wrong);
        }
        other => panic!("expected an integrity mismatch, got {:?}", other.map(|r| r.artifact)),
    }

    assert!(BuildArtifact::locate(env.pkg_dir(), "foo", "1.2").is_none());
    assert_eq!(env.sandbox_entries(), 0);
    // Nothing unverified stays in the cache
    let cached = fs::read_dir(&env.config.paths.source_cache).unwrap().count();
    assert_eq!(cached, 0);
}

#[test]
fn test_missing_patch_fails_patch_stage() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.2", "patches=fix-build.patch\n");

    match env.manager().build("foo") {
        Err(Error::PatchFailed { package, patch, .. }) => {
            assert_eq!(package, "foo");
            assert_eq!(patch, "fix-build.patch");
        }
        other => panic!("expected a patch failure, got {:?}", other.map(|r| r.artifact)),
    }
    assert_eq!(env.sandbox_entries(), 0);
}

#[test]
fn test_non_patch_files_in_patch_dir_are_ignored() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.2", "");
    let patches = env.package_dir("foo").join("patches");
    fs::create_dir_all(&patches).unwrap();
    fs::write(patches.join("README"), "Patches are applied in name order.\n").unwrap();
    fs::write(patches.join("series"), "none\n").unwrap();

    let result = env.manager().build("foo").unwrap();
    assert!(result.artifact.exists());
    let log = fs::read_to_string(&result.log_path).unwrap();
    assert!(!log.contains("Applied patch"));
}

#[test]
fn test_failing_build_command_destroys_sandbox() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.2", "build=exit 3\n");
    let manager = env.manager();

    match manager.build("foo") {
        Err(Error::BuildCommandFailed {
            package,
            stage,
            code,
        }) => {
            assert_eq!(package, "foo");
            assert_eq!(stage, "build");
            assert_eq!(code, 3);
        }
        other => panic!("expected a build failure, got {:?}", other.map(|r| r.artifact)),
    }

    assert_eq!(env.sandbox_entries(), 0);
    assert!(!manager.kitchen().sandboxes().is_live("foo"));
    assert!(BuildArtifact::locate(env.pkg_dir(), "foo", "1.2").is_none());

    let log_path = manager.kitchen().config().log_path("foo", "1.2");
    let log = fs::read_to_string(log_path).unwrap();
    assert!(log.contains("=== failed ==="));
}

#[test]
fn test_empty_stage_fails_package_stage() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.2", "install=true\n");

    match env.manager().build("foo") {
        Err(Error::BuildCommandFailed { stage, .. }) => assert_eq!(stage, "package"),
        other => panic!("expected a package failure, got {:?}", other.map(|r| r.artifact)),
    }
}

#[test]
fn test_failing_check_only_warns() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.2", "check=exit 1\n");

    let result = env.manager().build("foo").unwrap();
    assert_eq!(result.warnings.len(), 1);
    assert!(result.artifact.exists());
}

#[test]
fn test_non_critical_hook_failure_continues() {
    let env = TestEnv::new();
    env.add_recipe("foo", "1.2", "hook_build_pre=exit 1\n");
    let manager = env.manager();

    assert!(manager.build("foo").unwrap().artifact.exists());
    let hook_log = fs::read_to_string(manager.kitchen().hooks().log_path("foo")).unwrap();
    assert!(hook_log.contains("build_pre"));
}

#[test]
fn test_critical_hook_failure_aborts() {
    let env = TestEnv::new();
    env.add_recipe(
        "foo",
        "1.2",
        "hook_configure_post=exit 1\nhook_configure_post_critical=true\n",
    );

    match env.manager().build("foo") {
        Err(Error::HookFailed {
            package,
            hook,
            source_name,
            ..
        }) => {
            assert_eq!(package, "foo");
            assert_eq!(hook, "configure_post");
            assert_eq!(source_name, "inline");
        }
        other => panic!("expected a hook failure, got {:?}", other.map(|r| r.artifact)),
    }
    assert_eq!(env.sandbox_entries(), 0);
}

#[test]
fn test_hook_sources_run_global_inline_local() {
    let env = TestEnv::new();
    let append = |who: &str| format!("echo {} >> \"$DESTDIR/usr/share/foo/order\"\n", who);

    fs::create_dir_all(&env.config.paths.hooks_dir).unwrap();
    fs::write(env.config.paths.hooks_dir.join("stage_post"), append("global")).unwrap();
    env.add_recipe("foo", "1.2", &format!("hook_stage_post={}", append("inline")));
    let local = env.package_dir("foo").join("hooks");
    fs::create_dir_all(&local).unwrap();
    fs::write(local.join("stage_post"), append("local")).unwrap();

    let manager = env.manager();
    manager
        .install(
            "foo",
            InstallOptions {
                explicit: true,
                ..Default::default()
            },
        )
        .unwrap();

    let order = fs::read_to_string(env.root().join("usr/share/foo/order")).unwrap();
    assert_eq!(order, "global\ninline\nlocal\n");
    assert_eq!(env.installed_hello("foo").as_deref(), Some("foo 1.2"));
}
