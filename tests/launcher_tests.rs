
use std::time::Duration;

use tokio::sync::mpsc::Receiver;

use viz_launcher::cluster_load::ClusterStatus;
use viz_launcher::events::{FlashColor, UiEvent};
use viz_launcher::launcher::{Launcher, LauncherOptions};
use viz_launcher::lifecycle::CancelOutcome;
use viz_launcher::log_store::LogEntry;
use viz_launcher::scheduler::{AllocationMode, LaunchMode, SubmissionRequest};
use viz_launcher::status_flash::IDLE_STATUS;
use viz_launcher::view::ViewState;

use test_harness::{
    assert_eventually, command_output, queue_status, squeue_row, squeue_table, test_config,
    test_session, FakeClusterLoad, FakeScheduler,
};

/// Wait for the first status flash frame.
async fn first_flash(events: &mut Receiver<UiEvent>) -> viz_launcher::events::FlashStep {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("a status flash should arrive")
            .unwrap();
        if let UiEvent::StatusFlash(step) = event {
            return step;
        }
    }
}

fn options() -> LauncherOptions {
    LauncherOptions {
        statistics_enabled: false,
        flash_step: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_start_poll_and_shutdown() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    let scheduler = FakeScheduler::new();
    scheduler.set_jobs(squeue_table(&[squeue_row("11", "R", 16, "ottc01-n01")]));
    let cluster = FakeClusterLoad::new(Some(ClusterStatus {
        queues: vec![queue_status("ottc01", 64, 32, 32)],
    }));

    let (launcher, mut events) =
        Launcher::start(config, &session, scheduler.clone(), cluster.clone(), options())
            .await
            .unwrap();
    assert_eq!(
        launcher.log_store().path(),
        home.path().join(".aedt").join("user_log_VNC.json")
    );

    let mut view = ViewState::load(false, launcher.state(), launcher.log_store()).await;
    let mut saw_jobs = false;
    let mut saw_load = false;
    while !(saw_jobs && saw_load) {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("poller should post events")
            .unwrap();
        saw_jobs |= event == UiEvent::JobListUpdated;
        saw_load |= event == UiEvent::ClusterLoadUpdated;
        view.apply(event, launcher.state()).await;
    }

    assert_eq!(view.jobs.len(), 1);
    assert_eq!(view.queue_rows[1].0, "ottc01");
    assert_eq!(view.queue_rows[1].1.available, 32);

    tokio::time::timeout(Duration::from_secs(2), launcher.shutdown())
        .await
        .expect("shutdown should complete");

    let calls = scheduler.list_calls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scheduler.list_calls(), calls);
}

#[tokio::test]
async fn test_interactive_launch_submits_in_background() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    let scheduler = FakeScheduler::new();
    let cluster = FakeClusterLoad::new(None);

    let (launcher, _events) =
        Launcher::start(config, &session, scheduler.clone(), cluster, options())
            .await
            .unwrap();

    let request = SubmissionRequest::new("ottc01", AllocationMode::PerNode, 1);
    launcher.launch(LaunchMode::Interactive, request).unwrap();

    let store = launcher.log_store().clone();
    assert_eventually(
        Duration::from_secs(2),
        || {
            let store = store.clone();
            async move { store.is_tracked("4242").await }
        },
        "submitted job should be tracked",
    )
    .await;

    launcher.shutdown().await;
    assert_eq!(scheduler.submitted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_launch_flashes_error() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    let scheduler = FakeScheduler::new();

    let (launcher, mut events) = Launcher::start(
        config,
        &session,
        scheduler.clone(),
        FakeClusterLoad::new(None),
        options(),
    )
    .await
    .unwrap();

    let request = SubmissionRequest::new("ottc01", AllocationMode::PerNode, 0);
    assert!(launcher.launch(LaunchMode::Interactive, request).is_err());

    let mut flashes = Vec::new();
    while flashes.len() < 12 {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("flash frames should arrive")
            .unwrap();
        if let UiEvent::StatusFlash(step) = event {
            flashes.push(step);
        }
    }
    assert_eq!(flashes[1].color, FlashColor::Red);
    assert_eq!(flashes[11].text, IDLE_STATUS);

    launcher.shutdown().await;
    assert!(scheduler.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_requires_confirmation() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    let scheduler = FakeScheduler::new();

    let (launcher, _events) = Launcher::start(
        config,
        &session,
        scheduler.clone(),
        FakeClusterLoad::new(None),
        options(),
    )
    .await
    .unwrap();
    launcher.log_store().track("55").await.unwrap();

    assert_eq!(
        launcher.request_cancel("55", &|_: &str| false),
        CancelOutcome::Declined
    );
    assert_eq!(
        launcher.request_cancel("55", &|_: &str| true),
        CancelOutcome::Cancelled
    );

    let store = launcher.log_store().clone();
    launcher.shutdown().await;

    assert_eq!(*scheduler.cancelled.lock().unwrap(), vec!["55".to_string()]);
    assert!(!store.is_tracked("55").await);
}

#[tokio::test]
async fn test_corrupted_log_is_reset_with_notice() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    std::fs::write(session.log_file(), "not json").unwrap();

    let (launcher, mut events) = Launcher::start(
        config,
        &session,
        FakeScheduler::new(),
        FakeClusterLoad::new(None),
        options(),
    )
    .await
    .unwrap();

    assert!(launcher.log_store().recovered_from_corruption());
    let notice = loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("a corruption notice should be flashed")
            .unwrap();
        if let UiEvent::StatusFlash(step) = event {
            break step;
        }
    };
    assert!(notice.text.contains("corrupted"));

    launcher
        .log_store()
        .append(LogEntry::new(Some("3"), "Submit Message: done", true))
        .await
        .unwrap();
    let mut view = ViewState::load(false, launcher.state(), launcher.log_store()).await;
    assert_eq!(view.log.len(), 1);

    launcher.clear_log(&mut view).await.unwrap();
    assert!(launcher.log_store().entries().await.is_empty());
    assert!(view.log.is_empty());
    assert!(!launcher.log_store().path().exists());
    launcher.shutdown().await;
}

#[tokio::test]
async fn test_verbose_view_shows_local_entries() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);

    let (launcher, _events) = Launcher::start(
        config,
        &session,
        FakeScheduler::new(),
        FakeClusterLoad::new(None),
        options(),
    )
    .await
    .unwrap();

    let store = launcher.log_store();
    store.append(LogEntry::new(Some("1"), "scheduler text", true)).await.unwrap();
    store.append(LogEntry::new(Some("1"), "launcher text", false)).await.unwrap();

    let mut view = ViewState::load(false, launcher.state(), store).await;
    assert_eq!(view.log.len(), 1);
    view.set_verbose(true, store).await;
    assert_eq!(view.log[0].message, "launcher text");

    launcher.shutdown().await;
}

#[tokio::test]
async fn test_rejected_launch_flashes_first_output_line() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    let scheduler = FakeScheduler::new();
    let raw = "\nsbatch: error: Invalid partition name specified\nsbatch: error: Batch job submission failed\n";
    scheduler.set_submit_output(Ok(command_output(1, "", raw)));

    let (launcher, mut events) =
        Launcher::start(config, &session, scheduler.clone(), FakeClusterLoad::new(None), options())
            .await
            .unwrap();
    launcher
        .launch(LaunchMode::Interactive, SubmissionRequest::new("ottc01", AllocationMode::PerCore, 2))
        .unwrap();

    let flash = first_flash(&mut events).await;
    assert_eq!(flash.text, "sbatch: error: Invalid partition name specified");

    let store = launcher.log_store().clone();
    launcher.shutdown().await;
    let entries = store.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, raw);
}

#[tokio::test]
async fn test_ssh_is_set_up_before_submission() {
    let home = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.path_to_ssh = Some(
        r#"mkdir -p "$HOME/.ssh" && touch "$HOME/.ssh/authorized_keys" "$HOME/.ssh/config""#
            .to_string(),
    );
    let session = test_session(home.path(), &config);
    let scheduler = FakeScheduler::new();

    let (launcher, _events) =
        Launcher::start(config, &session, scheduler.clone(), FakeClusterLoad::new(None), options())
            .await
            .unwrap();
    launcher
        .launch(LaunchMode::Interactive, SubmissionRequest::new("ottc01", AllocationMode::PerNode, 1))
        .unwrap();
    launcher.shutdown().await;

    assert_eq!(scheduler.submitted.lock().unwrap().len(), 1);
    assert!(viz_launcher::ssh::is_configured(home.path()));
}

#[tokio::test]
async fn test_failed_ssh_setup_does_not_block_submission() {
    let home = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.path_to_ssh = Some("exit 7".to_string());
    let session = test_session(home.path(), &config);
    let scheduler = FakeScheduler::new();

    let (launcher, _events) =
        Launcher::start(config, &session, scheduler.clone(), FakeClusterLoad::new(None), options())
            .await
            .unwrap();
    launcher
        .launch(LaunchMode::Interactive, SubmissionRequest::new("ottc01", AllocationMode::PerNode, 1))
        .unwrap();
    launcher.shutdown().await;

    assert_eq!(scheduler.submitted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_custom_build_is_selectable() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    let build = home.path().join("builds").join("Linux64");
    std::fs::create_dir_all(build.join("config")).unwrap();
    std::fs::write(build.join("config").join("ProductList.txt"), "ElectronicsDesktop\n").unwrap();
    std::fs::write(
        session.builds_file(),
        serde_json::json!({ "nightly": build }).to_string(),
    )
    .unwrap();

    let (launcher, _events) = Launcher::start(
        config,
        &session,
        FakeScheduler::new(),
        FakeClusterLoad::new(None),
        options(),
    )
    .await
    .unwrap();

    assert_eq!(launcher.custom_builds().len(), 1);
    assert_eq!(launcher.config().install_path(Some("nightly")).unwrap(), build);

    let mut request = SubmissionRequest::new("ottc01", AllocationMode::PerCore, 1);
    request.version = Some("nightly".to_string());
    assert!(launcher.launch(LaunchMode::Interactive, request).is_ok());
    launcher.shutdown().await;
}

#[tokio::test]
async fn test_corrupted_settings_are_reset_with_notice() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    std::fs::write(session.settings_file(), "queue=euc09").unwrap();

    let (launcher, mut events) = Launcher::start(
        config,
        &session,
        FakeScheduler::new(),
        FakeClusterLoad::new(None),
        options(),
    )
    .await
    .unwrap();

    assert!(launcher.settings().recovered_from_corruption());
    assert!(!session.settings_file().exists());
    assert!(first_flash(&mut events).await.text.contains("default settings"));
    assert_eq!(launcher.settings().current().await.queue, "ottc01");
    launcher.shutdown().await;
}

#[tokio::test]
async fn test_unreadable_log_does_not_stop_startup() {
    let home = tempfile::tempdir().unwrap();
    let config = test_config();
    let session = test_session(home.path(), &config);
    std::fs::create_dir(session.log_file()).unwrap();

    let (launcher, _events) = Launcher::start(
        config,
        &session,
        FakeScheduler::new(),
        FakeClusterLoad::new(None),
        options(),
    )
    .await
    .unwrap();

    assert!(launcher.log_store().recovered_from_corruption());
    launcher.log_store().track("1").await.unwrap();
    assert!(session.log_file().is_file());
    launcher.shutdown().await;
}
