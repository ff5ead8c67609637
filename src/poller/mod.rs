//! Background polling of cluster load and of the user's job queue.
//!
//! One loop advances a tick counter every `tick_interval_ms`. On ticks that
//! are multiples of `cluster_load_period_ticks` the queue load is fetched;
//! on multiples of `job_list_period_ticks` the job list is refreshed and
//! completion artifacts are drained. Tick zero runs both.
//!
//! A failed poll is logged and otherwise ignored: shared state keeps its
//! last good values and no event is posted.

pub mod drainer;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cluster_load::ClusterLoadSource;
use crate::config::{ClusterConfig, JobListLayout, PollerConfig};
use crate::error::{LauncherError, Result};
use crate::events::{EventSender, UiEvent};
use crate::scheduler::{parse_job_list, SchedulerClient};
use crate::state::SharedState;

pub use drainer::{CompletionArtifacts, JobLogDrainer};

fn log_poll_failure(error: &LauncherError, message: &str) {
    if error.is_recoverable() {
        tracing::warn!(error = %error, "{}", message);
    } else {
        tracing::error!(error = %error, "{}", message);
    }
}

pub struct Poller {
    config: PollerConfig,
    layout: JobListLayout,
    excluded_nodes: Vec<String>,
    scheduler: Arc<dyn SchedulerClient>,
    cluster: Arc<dyn ClusterLoadSource>,
    state: SharedState,
    drainer: JobLogDrainer,
    events: EventSender,
}

impl Poller {
    pub fn new(
        config: &ClusterConfig,
        scheduler: Arc<dyn SchedulerClient>,
        cluster: Arc<dyn ClusterLoadSource>,
        state: SharedState,
        drainer: JobLogDrainer,
        events: EventSender,
    ) -> Self {
        Self {
            config: config.poller.clone(),
            layout: config.scheduler.layout.clone(),
            excluded_nodes: config.visualization_nodes(),
            scheduler,
            cluster,
            state,
            drainer,
            events,
        }
    }

    /// Tick until `shutdown` is cancelled. Shutdown is noticed within one
    /// tick interval, or as soon as an in-flight poll returns.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick: u64 = 0;

        tracing::info!(
            tick_ms = self.config.tick_interval_ms,
            cluster_load_every = self.config.cluster_load_period_ticks,
            job_list_every = self.config.job_list_period_ticks,
            "Poller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if shutdown.is_cancelled() {
                break;
            }
            self.on_tick(tick).await;
            tick = tick.wrapping_add(1);
        }

        tracing::info!(ticks = tick, "Poller stopped");
    }

    /// Run whatever is due on `tick`.
    pub async fn on_tick(&self, tick: u64) {
        if tick % self.config.cluster_load_period_ticks == 0 {
            if let Err(e) = self.poll_cluster_load().await {
                log_poll_failure(&e, "Cannot update cluster load");
            }
        }

        if tick % self.config.job_list_period_ticks == 0 {
            if let Err(e) = self.poll_job_list().await {
                log_poll_failure(&e, "Cannot update job list");
            }
            self.drainer.drain().await;
        }
    }

    /// Fetch queue load and merge it into shared state. Returns the number of
    /// queues updated.
    pub async fn poll_cluster_load(&self) -> Result<usize> {
        let status = self.cluster.fetch().await?;
        let updated = self.state.apply_cluster_status(&status).await;
        tracing::debug!(queues = updated, "Cluster load updated");
        self.events.send(UiEvent::ClusterLoadUpdated).await;
        Ok(updated)
    }

    /// Replace the job list snapshot. Returns the number of jobs listed.
    pub async fn poll_job_list(&self) -> Result<usize> {
        let text = self.scheduler.list_jobs().await?;
        let jobs = parse_job_list(&text, &self.layout, &self.excluded_nodes);
        let count = jobs.len();
        self.state.replace_jobs(jobs).await;
        tracing::debug!(jobs = count, "Job list updated");
        self.events.send(UiEvent::JobListUpdated).await;
        Ok(count)
    }
}
