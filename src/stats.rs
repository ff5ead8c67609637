//! Usage statistics: one point per launch, written to an InfluxDB 1.x
//! server with the line protocol. Reporting is best effort.

use chrono::Utc;

use crate::config::StatisticsConfig;
use crate::error::{LauncherError, Result};
use crate::scheduler::LaunchMode;

/// Escape a tag key or value for the line protocol.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Clone)]
pub struct UsageReporter {
    client: reqwest::Client,
    config: StatisticsConfig,
    username: String,
    cluster: String,
    enabled: bool,
}

impl UsageReporter {
    /// `cluster` is derived from the first three characters of `hostname`.
    pub fn new(config: StatisticsConfig, username: &str, hostname: &str, enabled: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            username: username.to_string(),
            cluster: hostname.chars().take(3).collect(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn write_url(&self) -> String {
        format!(
            "http://{}:{}/write?db={}&precision=s",
            self.config.host, self.config.port, self.config.database
        )
    }

    /// Line-protocol point for one launch at `timestamp` (seconds).
    pub fn line(&self, version: &str, mode: LaunchMode, timestamp: i64) -> String {
        format!(
            "{},username={},version={},job_type={},cluster={} count=1i {}",
            escape_tag(&self.config.database),
            escape_tag(&self.username),
            escape_tag(version),
            escape_tag(mode.job_type()),
            escape_tag(&self.cluster),
            timestamp
        )
    }

    /// Send one point. Does nothing when reporting is disabled.
    pub async fn report(&self, version: &str, mode: LaunchMode) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let body = self.line(version, mode, Utc::now().timestamp());
        let res = self
            .client
            .post(self.write_url())
            .body(body)
            .send()
            .await
            .map_err(|e| LauncherError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            return Err(LauncherError::Transport(format!(
                "statistics server answered {}",
                res.status()
            )));
        }
        Ok(())
    }
}
