//! The ordered channel from background tasks to the single UI-owning consumer.
//!
//! Background tasks never touch view state. They finish a mutation of the
//! shared state, then post an event; the consumer re-reads the snapshot the
//! event names. Events are delivered in the order they were posted.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::log_store::LogEntry;

/// Longest time a producer waits on a full channel before dropping the event.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashColor {
    White,
    Green,
    Red,
}

impl fmt::Display for FlashColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashColor::White => write!(f, "white"),
            FlashColor::Green => write!(f, "green"),
            FlashColor::Red => write!(f, "red"),
        }
    }
}

/// One frame of the status-bar flash animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashStep {
    pub text: String,
    pub color: FlashColor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Re-read the queue load table
    ClusterLoadUpdated,
    /// Re-read the job list
    JobListUpdated,
    LogAppended(LogEntry),
    StatusFlash(FlashStep),
}

/// Producer half of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<UiEvent>,
    timeout: Duration,
}

/// Create a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<UiEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventSender {
            tx,
            timeout: DEFAULT_SEND_TIMEOUT,
        },
        rx,
    )
}

impl EventSender {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Post an event. Returns false if the event was dropped because the
    /// consumer is gone or did not make room in time.
    pub async fn send(&self, event: UiEvent) -> bool {
        match self.tx.send_timeout(event, self.timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(event)) => {
                tracing::warn!(?event, "UI consumer is not draining events, event dropped");
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::debug!("UI consumer closed, event dropped");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut rx) = channel(8);
        assert!(tx.send(UiEvent::ClusterLoadUpdated).await);
        assert!(tx.send(UiEvent::JobListUpdated).await);

        assert_eq!(rx.recv().await, Some(UiEvent::ClusterLoadUpdated));
        assert_eq!(rx.recv().await, Some(UiEvent::JobListUpdated));
    }

    #[tokio::test]
    async fn full_channel_drops_after_timeout() {
        let (tx, _rx) = channel(1);
        let tx = tx.with_timeout(Duration::from_millis(10));
        assert!(tx.send(UiEvent::JobListUpdated).await);
        assert!(!tx.send(UiEvent::JobListUpdated).await);
    }

    #[tokio::test]
    async fn closed_channel_drops() {
        let (tx, rx) = channel(1);
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.send(UiEvent::ClusterLoadUpdated).await);
    }
}
