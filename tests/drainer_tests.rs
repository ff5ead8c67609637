use std::sync::Arc;

use viz_launcher::events::{self, UiEvent};
use viz_launcher::log_store::{Journal, LogStore};
use viz_launcher::poller::JobLogDrainer;

async fn setup() -> (
    tempfile::TempDir,
    Arc<LogStore>,
    JobLogDrainer,
    tokio::sync::mpsc::Receiver<UiEvent>,
) {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = events::channel(32);
    let store = Arc::new(LogStore::open(dir.path().join("user_log_VNC.json")).await.unwrap());
    let drainer = JobLogDrainer::new(
        dir.path().to_path_buf(),
        "ansysedt",
        Journal::new(store.clone(), tx),
    );
    (dir, store, drainer, rx)
}

#[tokio::test]
async fn test_drain_output_and_error() {
    let (dir, store, drainer, mut rx) = setup().await;
    store.track("88").await.unwrap();
    let artifacts = drainer.artifacts("88");
    std::fs::write(&artifacts.output, "Solution complete\n").unwrap();
    std::fs::write(&artifacts.error, "License warning\n").unwrap();

    assert_eq!(drainer.drain().await, vec!["88".to_string()]);

    let entries = store.entries().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message, "Submit Message: Solution complete\n");
    assert_eq!(entries[1].message, "Submit Error: License warning\n");
    assert!(entries.iter().all(|e| e.scheduler && e.job_id == "88"));

    assert!(!artifacts.output.exists());
    assert!(!artifacts.error.exists());
    assert!(store.tracked_jobs().await.is_empty());

    let mut appended = 0;
    while let Ok(event) = rx.try_recv() {
        assert!(matches!(event, UiEvent::LogAppended(_)));
        appended += 1;
    }
    assert_eq!(appended, 2);

    // The store on disk reflects the drain.
    let reopened = LogStore::open(dir.path().join("user_log_VNC.json")).await.unwrap();
    assert_eq!(reopened.entries().await.len(), 2);
    assert!(reopened.tracked_jobs().await.is_empty());
}

#[tokio::test]
async fn test_job_without_artifacts_stays_tracked() {
    let (_dir, store, drainer, _rx) = setup().await;
    store.track("5").await.unwrap();

    assert!(drainer.drain().await.is_empty());
    assert!(store.is_tracked("5").await);
    assert!(store.entries().await.is_empty());
}

#[tokio::test]
async fn test_output_alone_keeps_job_tracked() {
    let (_dir, store, drainer, _rx) = setup().await;
    store.track("6").await.unwrap();
    let artifacts = drainer.artifacts("6");
    std::fs::write(&artifacts.output, "Solver started").unwrap();

    assert!(drainer.drain().await.is_empty());
    assert!(store.is_tracked("6").await);
    assert!(!artifacts.output.exists());
    assert_eq!(store.entries().await[0].message, "Submit Message: Solver started");

    std::fs::write(&artifacts.error, "Out of memory").unwrap();
    assert_eq!(drainer.drain().await, vec!["6".to_string()]);
    assert!(!store.is_tracked("6").await);

    let messages: Vec<_> = store.entries().await.into_iter().map(|e| e.message).collect();
    assert_eq!(
        messages,
        vec!["Submit Message: Solver started", "Submit Error: Out of memory"]
    );
}

#[tokio::test]
async fn test_empty_artifact_is_left_alone() {
    let (_dir, store, drainer, _rx) = setup().await;
    store.track("9").await.unwrap();
    let artifacts = drainer.artifacts("9");
    std::fs::write(&artifacts.output, "").unwrap();
    std::fs::write(&artifacts.error, "").unwrap();

    assert!(drainer.drain().await.is_empty());
    assert!(store.is_tracked("9").await);
    assert!(store.entries().await.is_empty());
    assert!(artifacts.output.exists());
    assert!(artifacts.error.exists());
}

#[tokio::test]
async fn test_error_arriving_one_drain_later_is_logged() {
    let (_dir, store, drainer, _rx) = setup().await;
    store.track("50").await.unwrap();
    let artifacts = drainer.artifacts("50");
    std::fs::write(&artifacts.output, "").unwrap();

    assert!(drainer.drain().await.is_empty());
    assert!(store.is_tracked("50").await);

    std::fs::write(&artifacts.error, "License checkout failed\n").unwrap();
    assert_eq!(drainer.drain().await, vec!["50".to_string()]);

    let entries = store.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Submit Error: License checkout failed\n");
    assert!(!artifacts.error.exists());
    assert!(artifacts.output.exists());
    assert!(!store.is_tracked("50").await);
}

#[tokio::test]
async fn test_partial_drain_survives_restart() {
    let (dir, store, drainer, _rx) = setup().await;
    store.track("61").await.unwrap();
    let artifacts = drainer.artifacts("61");
    std::fs::write(&artifacts.output, "Solution complete").unwrap();
    assert!(drainer.drain().await.is_empty());
    drop(drainer);
    drop(store);

    let (tx, _rx2) = events::channel(8);
    let store = Arc::new(LogStore::open(dir.path().join("user_log_VNC.json")).await.unwrap());
    let drainer = JobLogDrainer::new(
        dir.path().to_path_buf(),
        "ansysedt",
        Journal::new(store.clone(), tx),
    );
    assert!(store.is_tracked("61").await);

    std::fs::write(&artifacts.error, "").unwrap();
    assert_eq!(drainer.drain().await, vec!["61".to_string()]);
    assert_eq!(store.entries().await.len(), 1);
}

#[tokio::test]
async fn test_untracked_artifacts_are_left_alone() {
    let (_dir, store, drainer, _rx) = setup().await;
    let artifacts = drainer.artifacts("77");
    std::fs::write(&artifacts.output, "someone else's job").unwrap();

    assert!(drainer.drain().await.is_empty());
    assert!(artifacts.output.exists());
    assert!(store.entries().await.is_empty());
}

#[tokio::test]
async fn test_drained_job_is_not_drained_twice() {
    let (_dir, store, drainer, _rx) = setup().await;
    store.track("10").await.unwrap();
    let artifacts = drainer.artifacts("10");
    std::fs::write(&artifacts.output, "first").unwrap();
    std::fs::write(&artifacts.error, "").unwrap();
    assert_eq!(drainer.drain().await, vec!["10".to_string()]);

    std::fs::write(&artifacts.output, "second").unwrap();
    assert!(drainer.drain().await.is_empty());
    assert_eq!(store.entries().await.len(), 1);
}
