//! Submission and cancellation of jobs.
//!
//! A job id moves through `submitted → tracked → drained` or
//! `submitted → tracked → cancelled`. Tracking lives in the [`LogStore`] so
//! it survives restarts; draining is done by the poller's
//! [`JobLogDrainer`](crate::poller::JobLogDrainer).
//!
//! [`LogStore`]: crate::log_store::LogStore

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::config::ClusterConfig;
use crate::error::{LauncherError, Result};
use crate::log_store::{Journal, LogEntry};
use crate::scheduler::{
    build_local_launch, build_submit_command, LaunchMode, SchedulerClient, SubmissionRequest,
};

/// Asks the user to confirm a destructive action.
pub trait Confirmation: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

impl<F> Confirmation for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The scheduler accepted the job and it is now tracked.
    Submitted { job_id: String, command: String },
    /// The scheduler refused the job; its output was logged.
    Rejected { output: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Declined,
    Cancelled,
}

#[derive(Clone)]
pub struct JobController {
    config: Arc<ClusterConfig>,
    display: String,
    scheduler: Arc<dyn SchedulerClient>,
    journal: Journal,
}

impl JobController {
    pub fn new(
        config: Arc<ClusterConfig>,
        display: impl Into<String>,
        scheduler: Arc<dyn SchedulerClient>,
        journal: Journal,
    ) -> Self {
        Self {
            config,
            display: display.into(),
            scheduler,
            journal,
        }
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    /// Submit an interactive job.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Validation`] before any scheduler call when
    /// the request is invalid. Scheduler failures are not errors: they are
    /// logged and reported as [`SubmitOutcome::Rejected`].
    pub async fn submit_interactive(&self, request: &SubmissionRequest) -> Result<SubmitOutcome> {
        let command = build_submit_command(request, &self.config, &self.display)?;
        let command_text = command.to_string();
        if let Some(spec) = self.config.queue(&request.queue) {
            tracing::info!(queue = %request.queue, summary = %request.summary(spec), "Submitting interactive job");
        }

        let output = match self.scheduler.submit(&command).await {
            Ok(output) => output,
            Err(e) => {
                let output = e.to_string();
                self.journal
                    .record(LogEntry::new(None, output.clone(), true))
                    .await;
                return Ok(SubmitOutcome::Rejected { output });
            }
        };

        if !output.success() {
            let text = output.failure_text();
            tracing::warn!(queue = %request.queue, exit_code = ?output.exit_code, "Submission rejected");
            self.journal
                .record(LogEntry::new(None, text.clone(), true))
                .await;
            return Ok(SubmitOutcome::Rejected { output: text });
        }

        let Some(job_id) = output.job_id().map(str::to_string) else {
            let text = format!("Scheduler did not report a job id for: {}", command_text);
            self.journal
                .record(LogEntry::new(None, text.clone(), true))
                .await;
            return Ok(SubmitOutcome::Rejected { output: text });
        };

        if let Err(e) = self.journal.store().track(&job_id).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to persist tracked job");
        }
        tracing::info!(job_id = %job_id, queue = %request.queue, "Job submitted");

        let message = format!(
            "Job submitted to {}\nSubmit Command:{}",
            request.queue, command_text
        );
        self.journal
            .record(LogEntry::new(Some(&job_id), message, false))
            .await;

        Ok(SubmitOutcome::Submitted {
            job_id,
            command: command_text,
        })
    }

    /// Start the application on this node without waiting for it. Returns
    /// the process id if known.
    pub fn launch_local(
        &self,
        mode: LaunchMode,
        version: Option<&str>,
        environment: &[(String, String)],
    ) -> Result<Option<u32>> {
        let launch = build_local_launch(mode, version, environment, &self.config)?;

        let child = Command::new(&launch.program)
            .args(&launch.args)
            .envs(launch.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                LauncherError::Transport(format!("cannot start {}: {}", launch.program.display(), e))
            })?;

        let pid = child.id();
        tracing::info!(
            program = %launch.program.display(),
            args = ?launch.args,
            mode = %mode,
            pid = ?pid,
            "Application started"
        );
        Ok(pid)
    }

    /// Cancel `job_id` after the user confirmed. The scheduler's answer is
    /// not checked beyond logging it.
    pub async fn cancel(&self, job_id: &str) -> CancelOutcome {
        match self.scheduler.cancel(job_id).await {
            Ok(output) if output.success() => {
                tracing::info!(job_id, "Job cancelled");
            }
            Ok(output) => {
                tracing::warn!(job_id, exit_code = ?output.exit_code, output = %output.failure_text(), "Cancel command failed");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Cancel command could not run");
            }
        }

        if let Err(e) = self.journal.store().untrack(job_id).await {
            tracing::error!(job_id, error = %e, "Failed to untrack cancelled job");
        }
        self.journal
            .record(LogEntry::new(
                Some(job_id),
                format!("Job {} cancelled from GUI", job_id),
                false,
            ))
            .await;
        CancelOutcome::Cancelled
    }

    /// Ask for confirmation, then cancel.
    pub async fn confirm_and_cancel(&self, job_id: &str, confirmation: &dyn Confirmation) -> CancelOutcome {
        if !confirmation.confirm(&format!("Abort Queue Process {}?", job_id)) {
            return CancelOutcome::Declined;
        }
        self.cancel(job_id).await
    }
}
