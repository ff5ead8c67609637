use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, QueueSpec};
use crate::error::{LauncherError, Result};

/// How `count` in a [`SubmissionRequest`] is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// `count` cores on a single node
    PerCore,
    /// `count` whole nodes
    PerNode,
}

/// What the launch button does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Start the application locally for pre/post-processing
    PrePost,
    /// Start locally with the job-submission dialog open
    SubmitDialog,
    /// Start locally with the job-monitor dialog open
    MonitorDialog,
    /// Submit an interactive job to the scheduler
    Interactive,
}

impl LaunchMode {
    /// Command-line flag of a local launch.
    pub fn flag(self) -> Option<&'static str> {
        match self {
            LaunchMode::SubmitDialog => Some("-showsubmitjob"),
            LaunchMode::MonitorDialog => Some("-showmonitorjob"),
            LaunchMode::PrePost | LaunchMode::Interactive => None,
        }
    }

    pub fn job_type(self) -> &'static str {
        match self {
            LaunchMode::PrePost => "pre-post",
            LaunchMode::SubmitDialog => "submit",
            LaunchMode::MonitorDialog => "monitor",
            LaunchMode::Interactive => "interactive",
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_type())
    }
}

/// A user's request to run the application on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub queue: String,
    pub allocation: AllocationMode,
    pub count: u32,
    /// Nodes the job must run on; empty means any
    pub node_list: Vec<String>,
    /// Ordered `name=value` assignments exported to the job
    pub environment: Vec<(String, String)>,
    pub use_reservation: bool,
    pub reservation_id: Option<String>,
    /// Installed version to run; `None` selects the configured default
    pub version: Option<String>,
}

impl SubmissionRequest {
    pub fn new(queue: impl Into<String>, allocation: AllocationMode, count: u32) -> Self {
        Self {
            queue: queue.into(),
            allocation,
            count,
            node_list: Vec::new(),
            environment: Vec::new(),
            use_reservation: false,
            reservation_id: None,
            version: None,
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((name.into(), value.into()));
        self
    }

    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_list = nodes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reservation(mut self, reservation_id: Option<String>) -> Self {
        self.use_reservation = true;
        self.reservation_id = reservation_id;
        self
    }

    /// Checks that need no external call.
    pub fn validate(&self) -> Result<()> {
        if self.count < 1 {
            return Err(LauncherError::Validation(
                "Nodes Value must be a positive integer".to_string(),
            ));
        }
        if self.use_reservation && self.reservation().is_none() {
            return Err(LauncherError::Validation(
                "Reservation ID is not provided. Please set ID and click launch again".to_string(),
            ));
        }
        Ok(())
    }

    fn reservation(&self) -> Option<&str> {
        self.reservation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Node list as the scheduler expects it, spaces removed.
    fn node_list_arg(&self) -> Option<String> {
        let joined = normalize_env(&self.node_list.join(","));
        (!joined.is_empty()).then_some(joined)
    }

    /// Nodes and tasks requested on a queue with the given node hardware.
    ///
    /// Per-core requests larger than one node are silently clamped to the
    /// node's core count.
    pub fn allocation_on(&self, spec: &QueueSpec) -> Allocation {
        match self.allocation {
            AllocationMode::PerCore => Allocation {
                nodes: 1,
                tasks: self.count.min(spec.cores),
            },
            AllocationMode::PerNode => Allocation {
                nodes: self.count,
                tasks: self.count.saturating_mul(spec.cores),
            },
        }
    }

    /// Human readable summary of the resources requested.
    pub fn summary(&self, spec: &QueueSpec) -> String {
        let allocation = self.allocation_on(spec);
        match self.allocation {
            AllocationMode::PerCore => format!(
                "You request {} Cores and {}GB of shared RAM",
                allocation.tasks, spec.ram
            ),
            AllocationMode::PerNode => format!(
                "You request {} Cores and {}GB RAM",
                allocation.tasks,
                spec.ram.saturating_mul(allocation.nodes)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub nodes: u32,
    pub tasks: u32,
}

/// Collapse an assignment list to `A=1,B=2`: whitespace removed, empty
/// entries dropped. Normalizing twice yields the same string.
pub fn normalize_env(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .split(',')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse user input like `A=1, B=2` into ordered assignments. Entries
/// without `=` are ignored.
pub fn parse_assignments(raw: &str) -> Vec<(String, String)> {
    normalize_env(raw)
        .split(',')
        .filter_map(|part| match part.split_once('=') {
            Some((name, value)) if !name.is_empty() => Some((name.to_string(), value.to_string())),
            _ => {
                if !part.is_empty() {
                    tracing::debug!(entry = part, "Ignoring environment entry without '='");
                }
                None
            }
        })
        .collect()
}

fn join_assignments<'a>(pairs: impl IntoIterator<Item = &'a (String, String)>) -> String {
    pairs
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// A program and its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitCommand {
    program: String,
    args: Vec<String>,
}

impl SubmitCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Value following `flag`, if present.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for SubmitCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Build the interactive `sbatch` command for `request`.
///
/// `display` is exported so the application draws on the user's session.
pub fn build_submit_command(
    request: &SubmissionRequest,
    config: &ClusterConfig,
    display: &str,
) -> Result<SubmitCommand> {
    request.validate()?;
    let spec = config
        .queue(&request.queue)
        .ok_or_else(|| LauncherError::Validation(format!("Unknown queue {}", request.queue)))?;
    let install = config.install_path(request.version.as_deref())?;

    let display_var = ("DISPLAY".to_string(), display.to_string());
    let export = normalize_env(&format!(
        "ALL,{},{},{}",
        join_assignments(&request.environment),
        join_assignments(&config.environment_vars),
        join_assignments(std::iter::once(&display_var)),
    ));

    let allocation = request.allocation_on(spec);
    let scheduler = &config.scheduler;

    let mut args = vec![
        "--job-name".to_string(),
        scheduler.job_name.clone(),
        "--partition".to_string(),
        request.queue.clone(),
        "--export".to_string(),
        export,
        "--nodes".to_string(),
        format!("{}-{}", allocation.nodes, allocation.nodes),
        "--ntasks".to_string(),
        allocation.tasks.to_string(),
    ];

    if let Some(nodes) = request.node_list_arg() {
        args.push("--nodelist".to_string());
        args.push(nodes);
    }

    if let Some(reservation) = request.reservation().filter(|_| request.use_reservation) {
        args.push("--reservation".to_string());
        args.push(reservation.to_string());
    }

    let application = install.join(&scheduler.application_binary);
    args.push("--wrap".to_string());
    args.push(format!(
        "{} -machinelist num={}",
        application.display(),
        allocation.tasks
    ));

    Ok(SubmitCommand::new(scheduler.submit_program.clone(), args))
}

/// A detached local start of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Assignments layered over the inherited environment
    pub environment: Vec<(String, String)>,
}

pub fn build_local_launch(
    mode: LaunchMode,
    version: Option<&str>,
    environment: &[(String, String)],
    config: &ClusterConfig,
) -> Result<LocalLaunch> {
    if mode == LaunchMode::Interactive {
        return Err(LauncherError::Validation(
            "interactive mode is submitted through the scheduler".to_string(),
        ));
    }
    let install = config.install_path(version)?;
    let combined = format!(
        "{},{}",
        join_assignments(environment),
        join_assignments(&config.environment_vars)
    );

    Ok(LocalLaunch {
        program: install.join(&config.scheduler.application_binary),
        args: mode.flag().map(str::to_string).into_iter().collect(),
        environment: parse_assignments(&combined),
    })
}
