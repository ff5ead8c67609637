use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received, or when `parent` is cancelled first.
pub fn install_shutdown_handler(parent: &CancellationToken) -> Result<CancellationToken> {
    let token = parent.child_token();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, closing the launcher");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, closing the launcher");
            }
            _ = token_clone.cancelled() => return,
        }

        token_clone.cancel();
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn follows_parent_cancellation() {
        let parent = CancellationToken::new();
        let token = install_shutdown_handler(&parent).unwrap();
        assert!(!token.is_cancelled());
        parent.cancel();
        token.cancelled().await;
    }
}
