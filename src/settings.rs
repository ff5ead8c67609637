//! The user's saved launch form.
//!
//! The document remembers the last queue, allocation, count, version,
//! environment, node list, reservation and project path so the next session
//! starts with them. Values that no longer match the cluster configuration
//! fall back to the configured defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::ClusterConfig;
use crate::error::{LauncherError, Result};
use crate::log_store::discard;
use crate::scheduler::{parse_assignments, AllocationMode, SubmissionRequest};

/// Shown once when a saved document could not be used.
pub const SETTINGS_RESET_NOTICE: &str =
    "UI was updated or default settings file was corrupted. Please save default settings again";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Launcher version that wrote the document
    pub version: String,
    pub queue: String,
    pub allocation: AllocationMode,
    pub num_cores: u32,
    pub aedt_version: String,
    /// Raw `A=1,B=2` text as typed
    pub env_var: String,
    #[serde(default)]
    pub use_node_list: bool,
    #[serde(default)]
    pub node_list: String,
    pub project_path: PathBuf,
    pub use_reservation: bool,
    pub reservation_id: String,
}

impl UserSettings {
    /// Form values of a first run.
    pub fn defaults(config: &ClusterConfig, username: &str) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            queue: config.default_queue.clone(),
            allocation: AllocationMode::PerCore,
            num_cores: 1,
            aedt_version: config.default_version.clone(),
            env_var: String::new(),
            use_node_list: false,
            node_list: String::new(),
            project_path: config.user_project_path_root.join(username),
            use_reservation: false,
            reservation_id: String::new(),
        }
    }

    /// Replace values the configuration no longer knows.
    fn reconcile(mut self, config: &ClusterConfig) -> Self {
        if config.queue(&self.queue).is_none() {
            tracing::info!(queue = %self.queue, default = %config.default_queue, "Saved queue no longer exists");
            self.queue = config.default_queue.clone();
        }
        if !config.install_dir.contains_key(&self.aedt_version) {
            tracing::info!(version = %self.aedt_version, default = %config.default_version, "Saved version no longer exists");
            self.aedt_version = config.default_version.clone();
        }
        self
    }

    /// Submission request prefilled from the saved form.
    pub fn to_request(&self) -> SubmissionRequest {
        let mut request = SubmissionRequest::new(&self.queue, self.allocation, self.num_cores);
        request.environment = parse_assignments(&self.env_var);
        request.version = Some(self.aedt_version.clone());
        if self.use_node_list {
            request = request.with_nodes(
                self.node_list
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|node| !node.is_empty()),
            );
        }
        if self.use_reservation {
            request = request.with_reservation(Some(self.reservation_id.clone()));
        }
        request
    }
}

/// The settings document and its in-memory copy.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    defaults: UserSettings,
    current: Mutex<UserSettings>,
    recovered: bool,
}

impl SettingsStore {
    /// Load the document at `path`. A missing file yields the defaults; an
    /// unreadable one is deleted and the defaults are used.
    pub async fn open(path: impl Into<PathBuf>, config: &ClusterConfig, username: &str) -> Self {
        let path = path.into();
        let defaults = UserSettings::defaults(config, username);
        let mut recovered = false;

        let current = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<UserSettings>(&bytes) {
                Ok(saved) => saved.reconcile(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Settings file is corrupted, removed");
                    discard(&path).await;
                    recovered = true;
                    defaults.clone()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => defaults.clone(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Settings file is unreadable, removed");
                discard(&path).await;
                recovered = true;
                defaults.clone()
            }
        };

        Self {
            path,
            defaults,
            current: Mutex::new(current),
            recovered,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the saved document was unreadable and has been removed.
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered
    }

    pub async fn current(&self) -> UserSettings {
        self.current.lock().await.clone()
    }

    /// Write `settings` and make them current.
    pub async fn save(&self, mut settings: UserSettings) -> Result<()> {
        let mut current = self.current.lock().await;
        settings.version = env!("CARGO_PKG_VERSION").to_string();
        let bytes = serde_json::to_vec_pretty(&settings)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| LauncherError::Persistence(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            LauncherError::Persistence(format!("cannot replace {}: {}", self.path.display(), e))
        })?;
        *current = settings;
        tracing::info!(path = %self.path.display(), "Settings saved");
        Ok(())
    }

    /// Delete the document and go back to the defaults. Returns false if
    /// nothing was saved.
    pub async fn reset(&self) -> Result<bool> {
        let mut current = self.current.lock().await;
        *current = self.defaults.clone();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Settings reset");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LauncherError::Persistence(format!(
                "cannot delete {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
