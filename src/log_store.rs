//! Durable activity log and the set of tracked job ids.
//!
//! The whole document is rewritten on every change, so each change is a
//! read-modify-rewrite under one lock. Writers from the poller and from
//! submission or cancellation tasks may race; none of their updates is lost.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{LauncherError, Result};
use crate::events::{EventSender, UiEvent};

/// Job id recorded for entries not bound to a job.
pub const NO_JOB_ID: &str = "0";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persisted as `[timestamp, job_id, message, scheduler]`.
type LogRow = (String, String, String, bool);

/// Immutable activity log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LogRow", into = "LogRow")]
pub struct LogEntry {
    pub timestamp: String,
    pub job_id: String,
    pub message: String,
    /// Produced by the scheduler (always shown) rather than by the launcher
    /// itself (shown in verbose mode only).
    pub scheduler: bool,
}

impl LogEntry {
    pub fn new(job_id: Option<&str>, message: impl Into<String>, scheduler: bool) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            job_id: job_id.unwrap_or(NO_JOB_ID).to_string(),
            message: message.into(),
            scheduler,
        }
    }

    pub fn is_visible(&self, verbose: bool) -> bool {
        self.scheduler || verbose
    }
}

impl From<LogRow> for LogEntry {
    fn from((timestamp, job_id, message, scheduler): LogRow) -> Self {
        Self {
            timestamp,
            job_id,
            message,
            scheduler,
        }
    }
}

impl From<LogEntry> for LogRow {
    fn from(entry: LogEntry) -> Self {
        (entry.timestamp, entry.job_id, entry.message, entry.scheduler)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LogDocument {
    #[serde(rename = "Message List", default)]
    messages: Vec<LogEntry>,
    #[serde(rename = "PID List", default)]
    tracked: Vec<String>,
}

/// Remove whatever sits at `path` so the next rewrite can replace it.
pub(crate) async fn discard(path: &Path) {
    let removed = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match removed {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove unreadable file"),
    }
}

#[derive(Debug, Default)]
struct Inner {
    document: LogDocument,
    /// Ids drained or cancelled this session; they never become tracked again.
    retired: HashSet<String>,
}

#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    recovered: bool,
}

impl LogStore {
    /// Load the store at `path`. A missing file starts empty; an unreadable
    /// document is deleted and the store starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut recovered = false;

        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<LogDocument>(&bytes) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Log file is corrupted, history discarded");
                    discard(&path).await;
                    recovered = true;
                    LogDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LogDocument::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Log file is unreadable, history discarded");
                discard(&path).await;
                recovered = true;
                LogDocument::default()
            }
        };

        tracing::debug!(
            path = %path.display(),
            messages = document.messages.len(),
            tracked = document.tracked.len(),
            "Log store opened"
        );

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                document,
                retired: HashSet::new(),
            }),
            recovered,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the previous document was unreadable and has been reset.
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered
    }

    async fn persist(&self, document: &LogDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| LauncherError::Persistence(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            LauncherError::Persistence(format!("cannot replace {}: {}", self.path.display(), e))
        })
    }

    /// Append an entry and rewrite the document.
    pub async fn append(&self, entry: LogEntry) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.document.messages.push(entry);
        self.persist(&inner.document).await
    }

    /// Start tracking `job_id`. Returns false if it is already tracked or
    /// has already been drained or cancelled.
    pub async fn track(&self, job_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.retired.contains(job_id) || inner.document.tracked.iter().any(|id| id == job_id) {
            return Ok(false);
        }
        inner.document.tracked.push(job_id.to_string());
        self.persist(&inner.document).await?;
        Ok(true)
    }

    /// Stop tracking `job_id` for good. Returns false if it was not tracked.
    pub async fn untrack(&self, job_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.retired.insert(job_id.to_string());
        let before = inner.document.tracked.len();
        inner.document.tracked.retain(|id| id != job_id);
        if inner.document.tracked.len() == before {
            return Ok(false);
        }
        self.persist(&inner.document).await?;
        Ok(true)
    }

    pub async fn is_tracked(&self, job_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .document
            .tracked
            .iter()
            .any(|id| id == job_id)
    }

    pub async fn tracked_jobs(&self) -> Vec<String> {
        self.inner.lock().await.document.tracked.clone()
    }

    /// All entries in append order.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().await.document.messages.clone()
    }

    /// True if a scheduler entry for `job_id` starting with `prefix` was
    /// logged.
    pub async fn has_scheduler_entry(&self, job_id: &str, prefix: &str) -> bool {
        self.inner
            .lock()
            .await
            .document
            .messages
            .iter()
            .any(|entry| entry.scheduler && entry.job_id == job_id && entry.message.starts_with(prefix))
    }

    /// Entries to display, newest first.
    pub async fn visible_entries(&self, verbose: bool) -> Vec<LogEntry> {
        self.inner
            .lock()
            .await
            .document
            .messages
            .iter()
            .rev()
            .filter(|entry| entry.is_visible(verbose))
            .cloned()
            .collect()
    }

    /// Forget all entries and tracked jobs and delete the backing file.
    pub async fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.document = LogDocument::default();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LauncherError::Persistence(format!(
                "cannot delete {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// Writes log entries to the store, then tells the UI.
///
/// A crash between the two steps loses the notification, never the entry.
#[derive(Debug, Clone)]
pub struct Journal {
    store: Arc<LogStore>,
    events: EventSender,
}

impl Journal {
    pub fn new(store: Arc<LogStore>, events: EventSender) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub async fn record(&self, entry: LogEntry) {
        tracing::info!(job_id = %entry.job_id, scheduler = entry.scheduler, message = %entry.message, "Log entry");
        if let Err(e) = self.store.append(entry.clone()).await {
            tracing::error!(error = %e, "Failed to persist log entry");
        }
        self.events.send(UiEvent::LogAppended(entry)).await;
    }
}
