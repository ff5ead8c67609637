use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::{LauncherError, Result};

/// File looked up next to the executable when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "cluster_configuration.json";

/// Path appended to `overwatch_api_url` for the cluster-load poll.
pub const CLUSTER_STATUS_PATH: &str = "/api/v1/overwatch/minclusterstatus";

/// Per-node hardware of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct QueueSpec {
    /// Cores per node
    pub cores: u32,
    /// RAM per node in GB
    pub ram: u32,
}

/// Timing of the polling loop.
///
/// Both periods are counted in ticks of `tick_interval_ms`, so one loop
/// serves the long cluster-load period and the short job-list period.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub tick_interval_ms: u64,
    pub cluster_load_period_ticks: u64,
    pub job_list_period_ticks: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            cluster_load_period_ticks: 120,
            job_list_period_ticks: 10,
        }
    }
}

/// A fixed character range of the job-list table. `end: None` runs to the
/// end of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Column {
    pub start: usize,
    pub end: Option<usize>,
}

impl Column {
    pub const fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub const fn open(start: usize) -> Self {
        Self { start, end: None }
    }
}

/// Column offsets matching `squeue --format "%.18i %.9P %.8j %.8u %.2t %.4C %.20V %R"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobListLayout {
    pub job_id: Column,
    pub name: Column,
    pub owner: Column,
    pub state: Column,
    pub cpus: Column,
    pub submitted: Column,
    pub nodes: Column,
}

impl Default for JobListLayout {
    fn default() -> Self {
        Self {
            job_id: Column::new(0, 18),
            name: Column::new(29, 38),
            owner: Column::new(38, 47),
            state: Column::new(48, 49),
            cpus: Column::new(50, 54),
            submitted: Column::new(54, 75),
            nodes: Column::open(76),
        }
    }
}

/// External scheduler commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Shell command listing the invoking user's jobs
    pub list_command: String,
    pub submit_program: String,
    pub cancel_program: String,
    /// `--job-name` given to interactive submissions
    pub job_name: String,
    /// Executable launched inside an install directory
    pub application_binary: String,
    pub layout: JobListLayout,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            list_command: r#"squeue --me --format "%.18i %.9P %.8j %.8u %.2t %.4C %.20V %R""#
                .to_string(),
            submit_program: "sbatch".to_string(),
            cancel_program: "scancel".to_string(),
            job_name: "aedt".to_string(),
            application_binary: "ansysedt".to_string(),
            layout: JobListLayout::default(),
        }
    }
}

/// Where finished jobs leave their output (`<prefix>.o<id>`) and error
/// (`<prefix>.e<id>`) files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub prefix: String,
    /// Defaults to the user's home directory
    pub directory: Option<PathBuf>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            prefix: "ansysedt".to_string(),
            directory: None,
        }
    }
}

/// Usage statistics endpoint (InfluxDB 1.x write API).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            host: "OTTBLD02".to_string(),
            port: 8086,
            database: "aedt_hpc_launcher".to_string(),
        }
    }
}

fn default_event_capacity() -> usize {
    256
}

/// Static description of the cluster, read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub path_to_ssh: Option<String>,
    pub overwatch_url: String,
    pub overwatch_api_url: String,
    pub default_version: String,
    pub install_dir: BTreeMap<String, PathBuf>,
    /// Queues in file order; the order is the display order.
    #[serde(rename = "queue_config_dict", deserialize_with = "ordered_map")]
    pub queues: Vec<(String, QueueSpec)>,
    pub default_queue: String,
    pub user_project_path_root: PathBuf,
    /// Assignments forced by the administrator on every submission.
    #[serde(default, deserialize_with = "ordered_env")]
    pub environment_vars: Vec<(String, String)>,
    pub vnc_nodes: Vec<String>,
    pub dcv_nodes: Vec<String>,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl ClusterConfig {
    /// Read and validate the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Config`] with a message naming the file when
    /// it is missing, is not valid JSON, lacks a required key or is
    /// internally inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LauncherError::Config(format!(
                    "Configuration file does not exist! Check existence of {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(LauncherError::Config(format!(
                    "Cannot read configuration file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        Self::from_json_str(&text).map_err(|e| match e {
            LauncherError::Config(msg) => {
                LauncherError::Config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: ClusterConfig = serde_json::from_str(text).map_err(|e| {
            if e.is_syntax() || e.is_eof() {
                LauncherError::Config(format!(
                    "Configuration file is wrong! Only double quotes are allowed: {}",
                    e
                ))
            } else {
                LauncherError::Config(format!("Configuration file is wrong! {}", e))
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(LauncherError::Config(
                "queue_config_dict must define at least one queue".to_string(),
            ));
        }
        if self.queue(&self.default_queue).is_none() {
            return Err(LauncherError::Config(format!(
                "default_queue {} is not defined in queue_config_dict",
                self.default_queue
            )));
        }
        if !self.install_dir.contains_key(&self.default_version) {
            return Err(LauncherError::Config(format!(
                "default_version {} is not defined in install_dir",
                self.default_version
            )));
        }
        if self.poller.tick_interval_ms == 0
            || self.poller.cluster_load_period_ticks == 0
            || self.poller.job_list_period_ticks == 0
        {
            return Err(LauncherError::Config(
                "poller intervals must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(LauncherError::Config(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues
            .iter()
            .find(|(queue, _)| queue == name)
            .map(|(_, spec)| spec)
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|(name, _)| name.as_str())
    }

    /// Nodes reserved for remote display sessions (VNC and DCV).
    pub fn visualization_nodes(&self) -> Vec<String> {
        self.vnc_nodes
            .iter()
            .chain(self.dcv_nodes.iter())
            .filter(|node| !node.is_empty())
            .cloned()
            .collect()
    }

    /// Install directory of `version`, falling back to the default version.
    pub fn install_path(&self, version: Option<&str>) -> Result<&Path> {
        let version = version.unwrap_or(&self.default_version);
        self.install_dir
            .get(version)
            .map(PathBuf::as_path)
            .ok_or_else(|| LauncherError::Validation(format!("Unknown version {}", version)))
    }

    /// Make user-registered builds selectable as versions. A build named
    /// like a configured version replaces it.
    pub fn add_install_dirs<I>(&mut self, builds: I)
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        for (name, path) in builds {
            if let Some(previous) = self.install_dir.insert(name.clone(), path) {
                tracing::info!(version = %name, previous = %previous.display(), "Custom build replaces configured version");
            }
        }
    }

    pub fn cluster_status_url(&self) -> String {
        format!(
            "{}{}",
            self.overwatch_api_url.trim_end_matches('/'),
            CLUSTER_STATUS_PATH
        )
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = Vec<(String, V)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            entries.push((key, value));
        }
        Ok(entries)
    }
}

pub(crate) fn ordered_map<'de, D, V>(deserializer: D) -> std::result::Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
}

/// Admin variables may be written as strings or bare numbers.
fn ordered_env<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<(String, serde_json::Value)>> =
        Option::deserialize(deserializer).and_then(|value: Option<serde_json::Value>| match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => ordered_map(value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        })?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect())
}

#[cfg(test)]
pub(crate) fn sample_config_json() -> &'static str {
    r#"{
        "path_to_ssh": "/opt/tools/ssh_setup.sh",
        "overwatch_url": "http://overwatch.example.com",
        "overwatch_api_url": "http://overwatch-api.example.com/",
        "default_version": "2024R1",
        "install_dir": {
            "2024R1": "/apps/edt/v241/Linux64",
            "2023R2": "/apps/edt/v232/Linux64"
        },
        "queue_config_dict": {
            "euc09": {"cores": 20, "ram": 96},
            "ottc01": {"cores": 16, "ram": 64},
            "euc09lm": {"cores": 28, "ram": 512}
        },
        "default_queue": "ottc01",
        "user_project_path_root": "/projects",
        "environment_vars": {"ANSYSEM_FEATURE_X": "1", "LICENSE_RETRY": 3},
        "vnc_nodes": ["viz01", "viz02"],
        "dcv_nodes": ["dcv01"]
    }"#
}
