//! Cluster-wide queue load: the HTTP client for the status endpoint and the
//! aggregation of its payload into per-queue snapshots.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LauncherError, Result};

/// Slot counts of one queue, always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueLoad {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub reserved: u64,
    pub failed: u64,
}

impl QueueLoad {
    /// Shown until the first successful poll: the queue looks full.
    pub const PLACEHOLDER: QueueLoad = QueueLoad {
        total: 100,
        available: 0,
        used: 100,
        reserved: 0,
        failed: 0,
    };
}

impl Default for QueueLoad {
    fn default() -> Self {
        Self::PLACEHOLDER
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueStatusEntry {
    pub name: String,
    #[serde(rename = "totalSlots")]
    pub total_slots: u64,
    #[serde(rename = "totalUsedSlots")]
    pub used_slots: u64,
    #[serde(rename = "totalUnavailableSlots")]
    pub unavailable_slots: u64,
    #[serde(rename = "totalReservedSlots")]
    pub reserved_slots: u64,
    #[serde(rename = "totalAvailableSlots")]
    pub available_slots: u64,
}

impl From<&QueueStatusEntry> for QueueLoad {
    fn from(entry: &QueueStatusEntry) -> Self {
        Self {
            total: entry.total_slots,
            available: entry.available_slots,
            used: entry.used_slots,
            reserved: entry.reserved_slots,
            failed: entry.unavailable_slots,
        }
    }
}

/// Body of the cluster-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterStatus {
    #[serde(rename = "QueueStatus")]
    pub queues: Vec<QueueStatusEntry>,
}

/// Ordered per-queue load table, one row per configured queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueLoads {
    rows: Vec<(String, QueueLoad)>,
}

impl QueueLoads {
    /// Placeholder rows for every configured queue, in configuration order.
    pub fn with_queues<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            rows: names
                .into_iter()
                .map(|name| (name.to_string(), QueueLoad::PLACEHOLDER))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&QueueLoad> {
        self.rows
            .iter()
            .find(|(queue, _)| queue == name)
            .map(|(_, load)| load)
    }

    pub fn rows(&self) -> &[(String, QueueLoad)] {
        &self.rows
    }

    /// Overwrite the rows named in `status`. Queues absent from the payload
    /// keep their last known load and unknown names are ignored. Returns the
    /// number of rows updated.
    pub fn apply(&mut self, status: &ClusterStatus) -> usize {
        let mut updated = 0;
        for entry in &status.queues {
            match self.rows.iter_mut().find(|(queue, _)| *queue == entry.name) {
                Some((_, load)) => {
                    *load = QueueLoad::from(entry);
                    updated += 1;
                }
                None => {
                    tracing::trace!(queue = %entry.name, "Ignoring unconfigured queue");
                }
            }
        }
        updated
    }
}

/// Source of cluster-status payloads.
#[async_trait]
pub trait ClusterLoadSource: Send + Sync {
    async fn fetch(&self) -> Result<ClusterStatus>;
}

/// Client of the Overwatch cluster-status HTTP API.
pub struct OverwatchClient {
    client: reqwest::Client,
    url: String,
}

impl OverwatchClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ClusterLoadSource for OverwatchClient {
    async fn fetch(&self) -> Result<ClusterStatus> {
        let res = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| LauncherError::Transport(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| LauncherError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(LauncherError::Transport(format!(
                "cluster status error {}: {}",
                status, body
            )));
        }
        serde_json::from_str(&body).map_err(|e| LauncherError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(json: &str) -> ClusterStatus {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn decodes_payload() {
        let status = status(
            r#"{"QueueStatus": [{"name": "ottc01", "totalSlots": 320, "totalUsedSlots": 200,
                "totalUnavailableSlots": 16, "totalReservedSlots": 32, "totalAvailableSlots": 72}]}"#,
        );
        assert_eq!(
            QueueLoad::from(&status.queues[0]),
            QueueLoad {
                total: 320,
                available: 72,
                used: 200,
                reserved: 32,
                failed: 16,
            }
        );
    }

    #[test]
    fn missing_slot_field_fails_decode() {
        let result: std::result::Result<ClusterStatus, _> =
            serde_json::from_str(r#"{"QueueStatus": [{"name": "ottc01", "totalSlots": 1}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn apply_overwrites_known_queues_only() {
        let mut loads = QueueLoads::with_queues(["euc09", "ottc01"]);
        let status = status(
            r#"{"QueueStatus": [
                {"name": "ottc01", "totalSlots": 10, "totalUsedSlots": 4, "totalUnavailableSlots": 1,
                 "totalReservedSlots": 2, "totalAvailableSlots": 3},
                {"name": "unknown", "totalSlots": 99, "totalUsedSlots": 0, "totalUnavailableSlots": 0,
                 "totalReservedSlots": 0, "totalAvailableSlots": 99}
            ]}"#,
        );

        assert_eq!(loads.apply(&status), 1);
        assert_eq!(loads.get("euc09"), Some(&QueueLoad::PLACEHOLDER));
        assert_eq!(loads.get("ottc01").unwrap().available, 3);
        assert_eq!(loads.get("unknown"), None);
        let names: Vec<&str> = loads.rows().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["euc09", "ottc01"]);
    }
}
