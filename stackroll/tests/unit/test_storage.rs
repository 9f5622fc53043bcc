//! Attempt journal and lock file tests

use stackroll::errors::ControllerError;
use stackroll::models::attempt::{AttemptEvent, DeploymentAttempt};
use stackroll::storage::attempts::AttemptStore;
use stackroll::storage::layout::StorageLayout;
use stackroll::storage::lock::StackLock;

#[tokio::test]
async fn test_store_latest_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = AttemptStore::new(layout.attempts_dir());

    assert!(store.latest("web").await.unwrap().is_none());
    assert!(store.history("web").await.unwrap().is_empty());

    let mut first = DeploymentAttempt::new("web");
    first
        .snapshot
        .insert("api".to_string(), "api:1.0".to_string());
    store.save(&first).await.unwrap();

    let mut second = DeploymentAttempt::new("web");
    second.process(AttemptEvent::Validate).unwrap();
    store.save(&second).await.unwrap();

    let latest = store.latest("web").await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);

    let history = store.history("web").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].snapshot["api"], "api:1.0");

    // saving again overwrites the record of that attempt
    second.note("still validating");
    store.save(&second).await.unwrap();
    assert_eq!(store.history("web").await.unwrap().len(), 2);
    assert_eq!(
        store.latest("web").await.unwrap().unwrap().diagnostics.len(),
        1
    );
}

#[tokio::test]
async fn test_store_skips_unreadable_records() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = AttemptStore::new(layout.attempts_dir());

    store.save(&DeploymentAttempt::new("web")).await.unwrap();
    std::fs::write(dir.path().join("attempts/web/garbage.json"), b"{not json").unwrap();

    assert_eq!(store.history("web").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lock_is_exclusive_and_released_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let locks = StorageLayout::new(dir.path()).locks_dir();

    let lock = StackLock::acquire(&locks, "web", "attempt-1").await.unwrap();
    assert_eq!(lock.record().attempt_id, "attempt-1");
    assert_eq!(lock.record().pid, std::process::id());

    let err = StackLock::acquire(&locks, "web", "attempt-2").await.unwrap_err();
    assert!(matches!(err, ControllerError::AttemptInProgress { .. }));

    let holder = StackLock::holder(&locks, "web").await.unwrap().unwrap();
    assert_eq!(holder.attempt_id, "attempt-1");

    drop(lock);
    assert!(StackLock::holder(&locks, "web").await.unwrap().is_none());
    StackLock::acquire(&locks, "web", "attempt-2").await.unwrap();
}

#[tokio::test]
async fn test_break_lock() {
    let dir = tempfile::tempdir().unwrap();
    let locks = StorageLayout::new(dir.path()).locks_dir();

    let lock = StackLock::acquire(&locks, "web", "attempt-1").await.unwrap();
    StackLock::break_lock(&locks, "web").await.unwrap();
    let _second = StackLock::acquire(&locks, "web", "attempt-2").await.unwrap();

    // the stale guard must not remove the new holder's file
    std::mem::forget(lock);
    let holder = StackLock::holder(&locks, "web").await.unwrap().unwrap();
    assert_eq!(holder.attempt_id, "attempt-2");

    // breaking an absent lock is fine
    StackLock::break_lock(&locks, "billing").await.unwrap();
}
