use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SchedulerConfig;
use crate::error::{LauncherError, Result};
use crate::scheduler::request::SubmitCommand;

/// Captured result of a scheduler command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Scheduler job id printed by the submit command
    /// (`Submitted batch job 4242` → `4242`).
    pub fn job_id(&self) -> Option<&str> {
        self.stdout.split_whitespace().last()
    }

    /// Everything the command printed, stdout then stderr, unchanged.
    pub fn failure_text(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Boundary to the external job scheduler. No parsing happens here.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Raw job table for the invoking user.
    async fn list_jobs(&self) -> Result<String>;

    async fn submit(&self, command: &SubmitCommand) -> Result<CommandOutput>;

    async fn cancel(&self, job_id: &str) -> Result<CommandOutput>;
}

/// Slurm command-line client (`squeue`, `sbatch`, `scancel`).
#[derive(Debug, Clone)]
pub struct SlurmClient {
    config: SchedulerConfig,
}

impl SlurmClient {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    async fn run(mut command: Command, label: &str) -> Result<CommandOutput> {
        let result = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match result {
            Ok(output) => {
                let captured = CommandOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                tracing::debug!(command = label, exit_code = ?captured.exit_code, "Scheduler command finished");
                Ok(captured)
            }
            Err(e) => {
                tracing::error!(command = label, error = %e, "Scheduler command could not be started");
                Err(LauncherError::Transport(format!("{}: {}", label, e)))
            }
        }
    }
}

/// Keep only ASCII bytes; the job table is fixed-width ASCII.
pub(crate) fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

#[async_trait]
impl SchedulerClient for SlurmClient {
    async fn list_jobs(&self) -> Result<String> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.config.list_command);

        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| LauncherError::Transport(format!("list jobs: {}", e)))?;

        if !output.status.success() {
            return Err(LauncherError::CommandFailed {
                exit_code: output.status.code(),
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(decode_ascii(&output.stdout))
    }

    async fn submit(&self, command: &SubmitCommand) -> Result<CommandOutput> {
        tracing::info!(command = %command, "Submitting job");
        let mut process = Command::new(command.program());
        process.args(command.args());
        Self::run(process, command.program()).await
    }

    async fn cancel(&self, job_id: &str) -> Result<CommandOutput> {
        let mut process = Command::new(&self.config.cancel_program);
        process.arg(job_id);
        Self::run(process, &self.config.cancel_program).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(exit_code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn job_id_is_last_token() {
        let out = output(0, "Submitted batch job 4242\n", "");
        assert!(out.success());
        assert_eq!(out.job_id(), Some("4242"));
        assert_eq!(output(0, "  \n", "").job_id(), None);
    }

    #[test]
    fn failure_text_is_verbatim() {
        assert_eq!(
            output(1, "", "sbatch: error: invalid partition\n").failure_text(),
            "sbatch: error: invalid partition\n"
        );
        assert_eq!(
            output(1, "  partial\n", "error: denied\n").failure_text(),
            "  partial\nerror: denied\n"
        );
        assert_eq!(output(2, "", "").failure_text(), "");
    }

    #[test]
    fn decode_drops_non_ascii_bytes() {
        assert_eq!(decode_ascii(b"job\xc3\xa9 1"), "job 1");
    }
}
