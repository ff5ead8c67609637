use std::path::{Path, PathBuf};

use crate::log_store::{Journal, LogEntry};

/// Output and error files a finished job leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionArtifacts {
    pub output: PathBuf,
    pub error: PathBuf,
}

impl CompletionArtifacts {
    /// `<dir>/<prefix>.o<job_id>` and `<dir>/<prefix>.e<job_id>`.
    pub fn for_job(dir: &Path, prefix: &str, job_id: &str) -> Self {
        Self {
            output: dir.join(format!("{}.o{}", prefix, job_id)),
            error: dir.join(format!("{}.e{}", prefix, job_id)),
        }
    }
}

const OUTPUT_LABEL: &str = "Submit Message: ";
const ERROR_LABEL: &str = "Submit Error: ";

/// What one drain pass found for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Artifact {
    /// Its text is in the log, now or from an earlier pass.
    Logged,
    /// Present with no content yet.
    Empty,
    /// Absent, unreadable, or logged but not yet removed.
    Pending,
}

/// Consumes completion artifacts of tracked jobs into the activity log.
///
/// Only present, non-empty artifacts are consumed: read, logged, persisted
/// and then deleted. Empty artifacts stay on disk untouched. A job stays
/// tracked until one of its artifacts has been logged and the other has
/// been logged too or exists empty. A crash after the log append but
/// before the delete logs the same artifact again on the next run.
#[derive(Debug, Clone)]
pub struct JobLogDrainer {
    dir: PathBuf,
    prefix: String,
    journal: Journal,
}

impl JobLogDrainer {
    pub fn new(dir: PathBuf, prefix: impl Into<String>, journal: Journal) -> Self {
        Self {
            dir,
            prefix: prefix.into(),
            journal,
        }
    }

    pub fn artifacts(&self, job_id: &str) -> CompletionArtifacts {
        CompletionArtifacts::for_job(&self.dir, &self.prefix, job_id)
    }

    /// Drain every tracked job. Returns the ids whose artifacts are fully
    /// drained; those jobs are no longer tracked.
    pub async fn drain(&self) -> Vec<String> {
        let store = self.journal.store();
        let mut drained = Vec::new();

        for job_id in store.tracked_jobs().await {
            let artifacts = self.artifacts(&job_id);
            let output = self.consume(&job_id, &artifacts.output, OUTPUT_LABEL).await;
            let error = self.consume(&job_id, &artifacts.error, ERROR_LABEL).await;

            let finished = match (output, error) {
                (Artifact::Pending, _) | (_, Artifact::Pending) => false,
                (Artifact::Empty, Artifact::Empty) => false,
                _ => true,
            };
            if !finished {
                tracing::trace!(job_id = %job_id, ?output, ?error, "Job artifacts not complete");
                continue;
            }

            if let Err(e) = store.untrack(&job_id).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to untrack drained job");
            }
            tracing::info!(job_id = %job_id, "Job artifacts drained");
            drained.push(job_id);
        }
        drained
    }

    async fn consume(&self, job_id: &str, path: &Path, label: &str) -> Artifact {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return if self.journal.store().has_scheduler_entry(job_id, label).await {
                    Artifact::Logged
                } else {
                    Artifact::Pending
                };
            }
            Err(e) => {
                tracing::warn!(job_id, path = %path.display(), error = %e, "Cannot read job artifact");
                return Artifact::Pending;
            }
        };

        if bytes.is_empty() {
            return Artifact::Empty;
        }

        let text = String::from_utf8_lossy(&bytes);
        let entry = LogEntry::new(Some(job_id), format!("{}{}", label, text), true);
        self.journal.record(entry).await;

        match tokio::fs::remove_file(path).await {
            Ok(()) => Artifact::Logged,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Artifact::Logged,
            Err(e) => {
                tracing::warn!(job_id, path = %path.display(), error = %e, "Cannot remove job artifact");
                Artifact::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_naming() {
        let artifacts = CompletionArtifacts::for_job(Path::new("/home/alice"), "ansysedt", "4242");
        assert_eq!(artifacts.output, PathBuf::from("/home/alice/ansysedt.o4242"));
        assert_eq!(artifacts.error, PathBuf::from("/home/alice/ansysedt.e4242"));
    }
}
