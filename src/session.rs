//! Facts about the user session the launcher runs in.
//!
//! The launcher runs on a visualization node, so the `DISPLAY` variable tells
//! both where interactive jobs must draw and which kind of remote-display node
//! (VNC or DCV) hosts the session. The kind selects the persisted log file.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ClusterConfig;
use crate::error::{LauncherError, Result};

const APP_DIR_NAME: &str = ".aedt";
const LOCK_FILE_NAME: &str = "ui.lock";
const SETTINGS_FILE_NAME: &str = "default.json";
const BUILDS_FILE_NAME: &str = "user_build.json";

/// Remote-display technology of the node hosting the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VizType {
    Vnc,
    Dcv,
    Unknown,
}

impl VizType {
    /// Match the display host against the configured VNC nodes first, then DCV.
    pub fn detect(display: &str, config: &ClusterConfig) -> Self {
        let matches = |nodes: &[String]| {
            nodes
                .iter()
                .any(|node| !node.is_empty() && display.contains(node.as_str()))
        };
        if matches(&config.vnc_nodes) {
            VizType::Vnc
        } else if matches(&config.dcv_nodes) {
            VizType::Dcv
        } else {
            VizType::Unknown
        }
    }

    fn log_suffix(self) -> &'static str {
        match self {
            VizType::Vnc => "VNC",
            VizType::Dcv => "DCV",
            VizType::Unknown => "",
        }
    }
}

impl fmt::Display for VizType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.log_suffix())
    }
}

/// Validate a `DISPLAY` value of the form `host:number`.
///
/// An empty host part (`:1`) is qualified with the local hostname so that
/// jobs running on compute nodes can reach the display.
pub fn resolve_display(display: Option<&str>, hostname: &str) -> Result<String> {
    let display = display.unwrap_or_default();
    if display.is_empty() {
        return Err(LauncherError::Session(
            "DISPLAY environment variable is not specified. Contact cluster admin".to_string(),
        ));
    }

    let Some((host, number)) = display.split_once(':') else {
        return Err(LauncherError::Session(
            "DISPLAY hasn't session number specified. Contact cluster admin".to_string(),
        ));
    };

    if host.is_empty() {
        return Ok(format!("{}:{}", hostname, number));
    }
    Ok(display.to_string())
}

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub hostname: String,
    pub home_dir: PathBuf,
    pub app_dir: PathBuf,
    pub display: String,
    pub viz_type: VizType,
}

impl Session {
    /// Collect the session from the process environment.
    pub fn from_env(config: &ClusterConfig) -> Result<Self> {
        let home_dir = dirs::home_dir().ok_or_else(|| {
            LauncherError::Session("cannot determine the home directory".to_string())
        })?;
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .map_err(|e| LauncherError::Session(format!("cannot determine hostname: {}", e)))?;
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let display = resolve_display(std::env::var("DISPLAY").ok().as_deref(), &hostname)?;

        Ok(Self::new(username, hostname, home_dir, display, config))
    }

    pub fn new(
        username: String,
        hostname: String,
        home_dir: PathBuf,
        display: String,
        config: &ClusterConfig,
    ) -> Self {
        let viz_type = VizType::detect(&display, config);
        Self {
            app_dir: home_dir.join(APP_DIR_NAME),
            username,
            hostname,
            home_dir,
            display,
            viz_type,
        }
    }

    /// Create the application folder on first run.
    pub fn ensure_app_dir(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.app_dir)?;
        Ok(&self.app_dir)
    }

    /// Persisted activity log, one per display technology.
    pub fn log_file(&self) -> PathBuf {
        self.app_dir
            .join(format!("user_log_{}.json", self.viz_type.log_suffix()))
    }

    pub fn lock_file(&self) -> PathBuf {
        self.app_dir.join(LOCK_FILE_NAME)
    }

    /// Saved launch form.
    pub fn settings_file(&self) -> PathBuf {
        self.app_dir.join(SETTINGS_FILE_NAME)
    }

    /// User-registered builds.
    pub fn builds_file(&self) -> PathBuf {
        self.app_dir.join(BUILDS_FILE_NAME)
    }

    /// Status-bar text describing the session.
    pub fn describe(&self) -> String {
        format!(
            "User: {} on {} node {}",
            self.username, self.viz_type, self.display
        )
    }
}

/// Marker file signalling a running instance.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Create the lock file. Returns the lock and whether a stale or
    /// concurrent lock was already present.
    pub fn acquire(path: PathBuf) -> Result<(Self, bool)> {
        let existed = path.exists();
        if !existed {
            std::fs::write(&path, "1")?;
        }
        Ok((Self { path }, existed))
    }

    pub fn release(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
        }
    }
}
