use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cluster_load::{ClusterStatus, QueueLoads};
use crate::scheduler::JobRecord;

/// State owned by the background engine and read by the UI consumer.
///
/// The poller is the only writer of both tables. Each write completes
/// under the lock before the matching event is posted, so a reader that
/// reacts to the event sees a whole snapshot.
#[derive(Debug, Clone)]
pub struct SharedState {
    queue_loads: Arc<RwLock<QueueLoads>>,
    jobs: Arc<RwLock<Vec<JobRecord>>>,
}

impl SharedState {
    pub fn new<'a>(queue_names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            queue_loads: Arc::new(RwLock::new(QueueLoads::with_queues(queue_names))),
            jobs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn queue_loads(&self) -> QueueLoads {
        self.queue_loads.read().await.clone()
    }

    pub async fn jobs(&self) -> Vec<JobRecord> {
        self.jobs.read().await.clone()
    }

    pub(crate) async fn apply_cluster_status(&self, status: &ClusterStatus) -> usize {
        self.queue_loads.write().await.apply(status)
    }

    pub(crate) async fn replace_jobs(&self, jobs: Vec<JobRecord>) {
        *self.jobs.write().await = jobs;
    }
}
