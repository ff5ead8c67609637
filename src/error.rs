use thiserror::Error;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Command exited with {exit_code:?}: {output}")]
    CommandFailed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LauncherError {
    /// Errors the Poller swallows: the display keeps its last known state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LauncherError::Transport(_)
                | LauncherError::Decode(_)
                | LauncherError::CommandFailed { .. }
                | LauncherError::Http(_)
                | LauncherError::Json(_)
                | LauncherError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LauncherError>;
