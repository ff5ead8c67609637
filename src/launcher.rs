//! Top-level wiring of the launcher engine.
//!
//! `Launcher::start` builds the shared state, the log store, the event
//! channel and the poller, and spawns the poller on a [`TaskTracker`].
//! Every background task the launcher starts afterwards (submissions,
//! local launches, cancellations, statistics, flashes) goes on the same
//! tracker, so [`Launcher::shutdown`] waits for all of them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::builds::{BuildRegistry, CustomBuild};
use crate::cluster_load::ClusterLoadSource;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::events::{self, EventSender, UiEvent};
use crate::lifecycle::{CancelOutcome, Confirmation, JobController, SubmitOutcome};
use crate::log_store::{Journal, LogStore};
use crate::poller::{JobLogDrainer, Poller};
use crate::scheduler::{
    build_local_launch, build_submit_command, LaunchMode, SchedulerClient, SubmissionRequest,
};
use crate::session::{Session, VizType};
use crate::settings::{SettingsStore, SETTINGS_RESET_NOTICE};
use crate::ssh;
use crate::state::SharedState;
use crate::stats::UsageReporter;
use crate::status_flash::{self, FlashLevel};
use crate::view::ViewState;

#[derive(Debug, Clone)]
pub struct LauncherOptions {
    /// Report usage statistics for each launch.
    pub statistics_enabled: bool,
    /// Duration of one status flash frame.
    pub flash_step: Duration,
}

impl Default for LauncherOptions {
    fn default() -> Self {
        Self {
            statistics_enabled: true,
            flash_step: status_flash::DEFAULT_STEP,
        }
    }
}

/// A flash is cosmetic; it stops as soon as shutdown begins.
async fn flash_until_shutdown(
    events: EventSender,
    text: String,
    level: FlashLevel,
    step: Duration,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = status_flash::run_flash(events, text, level, step) => {}
    }
}

/// One line of a rejected submission's output for the status bar.
fn rejection_flash(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "Submission failed, see log".to_string())
}

pub struct Launcher {
    config: Arc<ClusterConfig>,
    home_dir: PathBuf,
    state: SharedState,
    store: Arc<LogStore>,
    settings: Arc<SettingsStore>,
    builds: Vec<CustomBuild>,
    events: EventSender,
    controller: JobController,
    reporter: UsageReporter,
    options: LauncherOptions,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Launcher {
    /// Open the log store, start the poller and return the launcher with the
    /// receiving end of the event channel.
    ///
    /// # Errors
    ///
    /// Unreadable log, settings or builds files are not errors: each is
    /// reset and reported with a status flash.
    pub async fn start(
        mut config: ClusterConfig,
        session: &Session,
        scheduler: Arc<dyn SchedulerClient>,
        cluster: Arc<dyn ClusterLoadSource>,
        options: LauncherOptions,
    ) -> Result<(Self, mpsc::Receiver<UiEvent>)> {
        let registry = BuildRegistry::open(session.builds_file()).await;
        config.add_install_dirs(registry.install_dirs());
        let settings = Arc::new(SettingsStore::open(session.settings_file(), &config, &session.username).await);

        let config = Arc::new(config);
        let (events, rx) = events::channel(config.event_capacity);

        let store = Arc::new(LogStore::open(session.log_file()).await?);
        let journal = Journal::new(store.clone(), events.clone());
        let state = SharedState::new(config.queue_names());

        let artifact_dir = config
            .artifacts
            .directory
            .clone()
            .unwrap_or_else(|| session.home_dir.clone());
        let drainer = JobLogDrainer::new(artifact_dir, config.artifacts.prefix.clone(), journal.clone());

        let controller = JobController::new(
            config.clone(),
            session.display.clone(),
            scheduler.clone(),
            journal,
        );
        let reporter = UsageReporter::new(
            config.statistics.clone(),
            &session.username,
            &session.hostname,
            options.statistics_enabled,
        );

        let poller = Poller::new(&config, scheduler, cluster, state.clone(), drainer, events.clone());
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        tracker.spawn(poller.run(shutdown.clone()));

        let launcher = Self {
            config,
            home_dir: session.home_dir.clone(),
            state,
            store,
            settings,
            builds: registry.builds().to_vec(),
            events,
            controller,
            reporter,
            options,
            tracker,
            shutdown,
        };

        if launcher.store.recovered_from_corruption() {
            launcher.flash("Log file was corrupted and has been reset", FlashLevel::Error);
        }
        if launcher.settings.recovered_from_corruption() {
            launcher.flash(SETTINGS_RESET_NOTICE, FlashLevel::Error);
        }
        if registry.recovered_from_corruption() {
            launcher.flash("JSON file with user builds is corrupted", FlashLevel::Error);
        }
        if session.viz_type == VizType::Unknown {
            launcher.flash("Unknown visualization node type", FlashLevel::Error);
        }

        tracing::info!(
            user = %session.username,
            display = %session.display,
            log = %launcher.store.path().display(),
            "Launcher started"
        );
        Ok((launcher, rx))
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn log_store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Custom builds available as versions in this session.
    pub fn custom_builds(&self) -> &[CustomBuild] {
        &self.builds
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start a flash animation on the status bar.
    pub fn flash(&self, text: impl Into<String>, level: FlashLevel) {
        self.tracker.spawn(flash_until_shutdown(
            self.events.clone(),
            text.into(),
            level,
            self.options.flash_step,
            self.shutdown.clone(),
        ));
    }

    /// Launch the application in `mode`. Interactive requests are submitted
    /// to the scheduler; the other modes start on this node.
    ///
    /// Returns once the request is validated; the launch itself runs in the
    /// background, after the passwordless SSH check when `path_to_ssh` is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Validation`](crate::error::LauncherError::Validation)
    /// for an invalid request, after flashing the reason.
    pub fn launch(&self, mode: LaunchMode, request: SubmissionRequest) -> Result<()> {
        if let Err(e) = self.validate(mode, &request) {
            self.flash(e.to_string(), FlashLevel::Error);
            return Err(e);
        }

        let reporter = self.reporter.clone();
        let version = request
            .version
            .clone()
            .unwrap_or_else(|| self.config.default_version.clone());
        self.tracker.spawn(async move {
            if let Err(e) = reporter.report(&version, mode).await {
                tracing::debug!(error = %e, "Usage statistics not recorded");
            }
        });

        let controller = self.controller.clone();
        let events = self.events.clone();
        let step = self.options.flash_step;
        let shutdown = self.shutdown.clone();
        let ssh_setup = self.config.path_to_ssh.clone();
        let home_dir = self.home_dir.clone();
        self.tracker.spawn(async move {
            if let Some(command) = ssh_setup {
                if let Err(e) = ssh::ensure_passwordless_ssh(&home_dir, &command).await {
                    tracing::error!(command = %command, error = %e, "Passwordless SSH setup failed");
                }
            }

            let (text, level) = match mode {
                LaunchMode::Interactive => match controller.submit_interactive(&request).await {
                    Ok(SubmitOutcome::Submitted { job_id, .. }) => {
                        (format!("Job {} submitted", job_id), FlashLevel::Info)
                    }
                    Ok(SubmitOutcome::Rejected { output }) => {
                        (rejection_flash(&output), FlashLevel::Error)
                    }
                    Err(e) => (e.to_string(), FlashLevel::Error),
                },
                _ => match controller.launch_local(mode, request.version.as_deref(), &request.environment) {
                    Ok(_) => (format!("Launching {}", mode), FlashLevel::Info),
                    Err(e) => {
                        tracing::error!(mode = %mode, error = %e, "Local launch failed");
                        (e.to_string(), FlashLevel::Error)
                    }
                },
            };
            flash_until_shutdown(events, text, level, step, shutdown).await;
        });
        Ok(())
    }

    fn validate(&self, mode: LaunchMode, request: &SubmissionRequest) -> Result<()> {
        match mode {
            LaunchMode::Interactive => {
                build_submit_command(request, &self.config, self.controller.display())?;
            }
            _ => {
                build_local_launch(mode, request.version.as_deref(), &request.environment, &self.config)?;
            }
        }
        Ok(())
    }

    /// Ask for confirmation now and cancel `job_id` in the background if
    /// the user agreed.
    pub fn request_cancel(&self, job_id: &str, confirmation: &dyn Confirmation) -> CancelOutcome {
        if !confirmation.confirm(&format!("Abort Queue Process {}?", job_id)) {
            return CancelOutcome::Declined;
        }
        let controller = self.controller.clone();
        let job_id = job_id.to_string();
        self.tracker.spawn(async move {
            controller.cancel(&job_id).await;
        });
        CancelOutcome::Cancelled
    }

    /// Forget the whole log and all tracked jobs, and empty the log shown
    /// by `view`.
    pub async fn clear_log(&self, view: &mut ViewState) -> Result<()> {
        self.store.clear_all().await?;
        view.clear_log();
        tracing::info!("Log cleared");
        Ok(())
    }

    /// Delete the saved launch form and go back to the defaults.
    pub async fn reset_settings(&self) -> Result<()> {
        if self.settings.reset().await? {
            self.flash("Settings were reset to defaults", FlashLevel::Info);
        }
        Ok(())
    }

    /// Stop the poller and wait for every background task to finish.
    pub async fn shutdown(self) {
        tracing::info!("Launcher shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Launcher stopped");
    }
}
