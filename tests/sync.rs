// tests/sync.rs

//! End-to-end tests for the sync_install driver.

mod common;

use aurum::{sync_install, Error, InstallLock, PartialFailurePolicy, SyncRequest};
use common::{foo_bar_baz, source, targets, FakeArchive, FakeBuildTool, FakeLocalDb, Harness};
use std::fs;

fn request(names: &[&str]) -> SyncRequest {
    SyncRequest {
        targets: targets(names),
        ..SyncRequest::default()
    }
}

/// foo needs bar and baz; qux stands alone; baz fails to build
fn failing_baz() -> Harness {
    let (local_db, archive) = foo_bar_baz();
    let archive = archive.with_package(source("qux", "1-1", &[], &[]));
    Harness::new(local_db, archive, FakeBuildTool::new().failing("baz"))
}

#[test]
fn test_sync_installs_targets() {
    let (local_db, archive) = foo_bar_baz();
    let harness = Harness::new(local_db, archive, FakeBuildTool::new());

    let req = SyncRequest {
        refresh: true,
        ..request(&["foo"])
    };
    sync_install(&harness.context(), &req).unwrap();

    assert_eq!(*harness.package_manager.refreshes.lock().unwrap(), 1);
    assert_eq!(*harness.local_db.refreshes.lock().unwrap(), 1);

    let batches = harness.package_manager.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].as_explicit, vec!["foo".to_string()]);
    for name in ["foo", "bar", "baz"] {
        assert!(harness.local_db.installed_version(name).is_some(), "{} missing", name);
    }

    let cache = fs::read_to_string(&harness.config.completion_path).unwrap();
    assert!(cache.lines().any(|l| l == "foo AUR"));
    assert!(cache.lines().any(|l| l == "bar extra"));

    // The lock is released when the run ends
    InstallLock::acquire(&harness.config.lock_path).unwrap();
}

#[test]
fn test_sync_cleans_up_after_install() {
    let local_db = FakeLocalDb::new().with_repo("extra", "go", "1.22-1");
    let archive = FakeArchive::new().with_package(source("yay", "12.0-1", &[], &["go"]));
    let mut harness = Harness::new(local_db, archive, FakeBuildTool::new());
    harness.config.remove_make_deps = true;
    harness.config.clean_build_dirs = true;

    sync_install(&harness.context(), &request(&["yay"])).unwrap();

    assert_eq!(harness.package_manager.removals(), vec![vec!["go".to_string()]]);
    assert!(harness.local_db.installed_version("go").is_none());
    assert_eq!(harness.local_db.installed_version("yay").as_deref(), Some("12.0-1"));
    assert!(!harness.config.build_dir.join("yay").exists());
}

#[test]
fn test_sync_keeps_existing_build_dirs() {
    let archive = FakeArchive::new().with_package(source("yay", "12.0-1", &[], &[]));
    let mut harness = Harness::new(FakeLocalDb::new(), archive, FakeBuildTool::new());
    harness.config.clean_build_dirs = true;

    let existing = harness.config.build_dir.join("yay");
    fs::create_dir_all(&existing).unwrap();

    sync_install(&harness.context(), &request(&["yay"])).unwrap();
    assert!(existing.exists());
}

#[test]
fn test_sync_fails_when_lock_is_held() {
    let (local_db, archive) = foo_bar_baz();
    let harness = Harness::new(local_db, archive, FakeBuildTool::new());
    let _held = InstallLock::acquire(&harness.config.lock_path).unwrap();

    let result = sync_install(&harness.context(), &request(&["foo"]));
    assert!(matches!(result, Err(Error::LockHeld(_))));
    assert!(harness.package_manager.batches().is_empty());
    assert!(harness.archive.fetches.lock().unwrap().is_empty());
}

#[test]
fn test_sync_aborts_on_partial_failure_by_default() {
    let harness = failing_baz();

    let result = sync_install(&harness.context(), &request(&["foo", "qux"]));
    match result {
        Err(Error::PrepareFailed(partial)) => assert_eq!(partial.failed_names(), vec!["baz"]),
        other => panic!("expected PrepareFailed, got {:?}", other),
    }
    assert!(harness.package_manager.batches().is_empty());
}

#[test]
fn test_sync_continues_with_independent_subtrees() {
    let mut harness = failing_baz();
    harness.config.partial_failure_policy = PartialFailurePolicy::ContinueIndependent;

    let result = sync_install(&harness.context(), &request(&["foo", "qux"]));
    match result {
        Err(Error::PrepareFailed(partial)) => {
            assert_eq!(partial.failed_names(), vec!["baz"]);
            assert_eq!(partial.skipped, vec!["foo".to_string()]);
        }
        other => panic!("expected the deferred PrepareFailed, got {:?}", other),
    }

    let batches = harness.package_manager.batches();
    assert_eq!(batches.len(), 1);
    // bar was only needed by foo
    assert!(batches[0].repo.is_empty());
    assert_eq!(batches[0].as_explicit, vec!["qux".to_string()]);
    assert!(harness.local_db.installed_version("qux").is_some());
    assert!(harness.local_db.installed_version("bar").is_none());
}

#[test]
fn test_sync_continue_with_nothing_left() {
    let mut harness = failing_baz();
    harness.config.partial_failure_policy = PartialFailurePolicy::ContinueIndependent;

    let result = sync_install(&harness.context(), &request(&["foo"]));
    assert!(matches!(result, Err(Error::PrepareFailed(_))));
    assert!(harness.package_manager.batches().is_empty());
}

#[test]
fn test_sync_upgrades_foreign_packages() {
    let local_db = FakeLocalDb::new()
        .with_repo("extra", "git", "2.45-1")
        .with_installed("git", "2.45-1")
        .with_installed("yay", "11.0-1");
    let archive = FakeArchive::new().with_package(source("yay", "12.0-1", &["git"], &[]));
    let harness = Harness::new(local_db, archive, FakeBuildTool::new());

    let req = SyncRequest {
        sysupgrade: 1,
        ..SyncRequest::default()
    };
    sync_install(&harness.context(), &req).unwrap();

    let batches = harness.package_manager.batches();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].as_deps.is_empty());
    assert!(batches[0].as_explicit.is_empty());
    assert_eq!(harness.local_db.installed_version("yay").as_deref(), Some("12.0-1"));
}

#[test]
fn test_sync_upgrades_outdated_dependency_of_target() {
    let (local_db, archive) = foo_bar_baz();
    let local_db = local_db.with_installed("baz", "0.1-1");
    let harness = Harness::new(local_db, archive, FakeBuildTool::new());

    let req = SyncRequest {
        sysupgrade: 1,
        ..request(&["foo"])
    };
    sync_install(&harness.context(), &req).unwrap();

    assert_eq!(harness.local_db.installed_version("baz").as_deref(), Some("0.3-1"));
    assert_eq!(harness.local_db.installed_version("foo").as_deref(), Some("1.0-1"));

    // baz was already installed, so its reason is left alone
    let batches = harness.package_manager.batches();
    assert_eq!(batches[0].as_deps, vec!["bar".to_string()]);
}

#[test]
fn test_sync_with_nothing_to_do() {
    let harness = Harness::new(FakeLocalDb::new(), FakeArchive::new(), FakeBuildTool::new());
    sync_install(&harness.context(), &SyncRequest::default()).unwrap();
    assert!(harness.package_manager.batches().is_empty());
}

#[test]
fn test_construction_errors_touch_nothing() {
    let (local_db, archive) = foo_bar_baz();
    let harness = Harness::new(local_db, archive, FakeBuildTool::new());

    let err = sync_install(&harness.context(), &request(&["foo", "ghost"])).unwrap_err();
    assert!(err.is_construction_error());
    assert!(harness.archive.fetches.lock().unwrap().is_empty());
    assert!(harness.package_manager.batches().is_empty());
}

#[test]
fn test_sync_cancelled() {
    let (local_db, archive) = foo_bar_baz();
    let harness = Harness::new(local_db, archive, FakeBuildTool::new());
    let ctx = harness.context();
    ctx.cancel.cancel();

    let result = sync_install(&ctx, &request(&["foo"]));
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(harness.package_manager.batches().is_empty());
    InstallLock::acquire(&harness.config.lock_path).unwrap();
}
