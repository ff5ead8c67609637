//! Reference consumer of [`UiEvent`]s.
//!
//! `ViewState` is what a front end would render: queue loads, the job table,
//! the visible log (newest first) and the status bar. It is owned by the
//! single task that drains the event channel and is never shared.

use crate::cluster_load::QueueLoad;
use crate::events::{FlashColor, FlashStep, UiEvent};
use crate::log_store::{LogEntry, LogStore};
use crate::scheduler::JobRecord;
use crate::state::SharedState;
use crate::status_flash::IDLE_STATUS;

#[derive(Debug, Clone)]
pub struct ViewState {
    pub queue_rows: Vec<(String, QueueLoad)>,
    pub jobs: Vec<JobRecord>,
    /// Visible log entries, newest first.
    pub log: Vec<LogEntry>,
    pub status: FlashStep,
    verbose: bool,
}

impl ViewState {
    pub fn new(verbose: bool) -> Self {
        Self {
            queue_rows: Vec::new(),
            jobs: Vec::new(),
            log: Vec::new(),
            status: FlashStep {
                text: IDLE_STATUS.to_string(),
                color: FlashColor::White,
            },
            verbose,
        }
    }

    /// Initial fill from the shared state and the persisted log.
    pub async fn load(verbose: bool, state: &SharedState, store: &LogStore) -> Self {
        let mut view = Self::new(verbose);
        view.queue_rows = state.queue_loads().await.rows().to_vec();
        view.jobs = state.jobs().await;
        view.log = store.visible_entries(verbose).await;
        view
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Apply one event. Returns true if anything visible changed.
    pub async fn apply(&mut self, event: UiEvent, state: &SharedState) -> bool {
        match event {
            UiEvent::ClusterLoadUpdated => {
                self.queue_rows = state.queue_loads().await.rows().to_vec();
                true
            }
            UiEvent::JobListUpdated => {
                self.jobs = state.jobs().await;
                true
            }
            UiEvent::LogAppended(entry) => {
                if !entry.is_visible(self.verbose) {
                    return false;
                }
                self.log.insert(0, entry);
                true
            }
            UiEvent::StatusFlash(step) => {
                self.status = step;
                true
            }
        }
    }

    /// Switch verbose mode and rebuild the visible log.
    pub async fn set_verbose(&mut self, verbose: bool, store: &LogStore) {
        self.verbose = verbose;
        self.log = store.visible_entries(verbose).await;
    }

    /// Empty the visible log after the store was cleared.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}
