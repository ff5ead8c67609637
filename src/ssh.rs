//! Passwordless SSH between cluster nodes.
//!
//! Interactive jobs need the user's `~/.ssh` to hold an `authorized_keys`
//! and a `config`. When either is missing the folder is rebuilt with the
//! site's setup command before anything is launched.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{LauncherError, Result};

const SSH_DIR_NAME: &str = ".ssh";
const REQUIRED_FILES: [&str; 2] = ["authorized_keys", "config"];

/// Answers every prompt of the setup command with its default.
const SETUP_INPUT: &[u8] = b"\n\n\n";

pub fn ssh_dir(home: &Path) -> PathBuf {
    home.join(SSH_DIR_NAME)
}

/// True when every file passwordless SSH relies on is present.
pub fn is_configured(home: &Path) -> bool {
    let dir = ssh_dir(home);
    REQUIRED_FILES.iter().all(|file| dir.join(file).is_file())
}

/// Run `setup_command` through `sh -c` unless SSH is already configured.
/// An incomplete `~/.ssh` is removed first. Returns true if the setup ran.
///
/// # Errors
///
/// [`LauncherError::Transport`] when the command cannot be started and
/// [`LauncherError::CommandFailed`] when it exits unsuccessfully.
pub async fn ensure_passwordless_ssh(home: &Path, setup_command: &str) -> Result<bool> {
    if is_configured(home) {
        return Ok(false);
    }

    let dir = ssh_dir(home);
    if dir.is_dir() {
        tracing::warn!(path = %dir.display(), "Incomplete SSH configuration, recreating");
        tokio::fs::remove_dir_all(&dir).await?;
    }

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(setup_command)
        .env("HOME", home)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| LauncherError::Transport(format!("cannot start {}: {}", setup_command, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        // The command may exit without reading its input.
        if let Err(e) = stdin.write_all(SETUP_INPUT).await {
            tracing::debug!(error = %e, "SSH setup closed its input early");
        }
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(LauncherError::CommandFailed {
            exit_code: output.status.code(),
            output: format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }

    tracing::info!(command = setup_command, "Passwordless SSH configured");
    Ok(true)
}
