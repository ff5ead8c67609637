use std::time::Duration;

use crate::events::{EventSender, FlashColor, FlashStep, UiEvent};

/// Text the status bar returns to after a flash.
pub const IDLE_STATUS: &str = "No Status Message";

pub const FLASH_STEPS: usize = 12;
pub const DEFAULT_STEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLevel {
    Info,
    Error,
}

impl FlashLevel {
    fn color(self) -> FlashColor {
        match self {
            FlashLevel::Info => FlashColor::Green,
            FlashLevel::Error => FlashColor::Red,
        }
    }
}

/// Frames of one flash: alternating white and the level color, ending on
/// the idle text in white.
pub fn flash_steps(text: &str, level: FlashLevel) -> Vec<FlashStep> {
    (0..FLASH_STEPS)
        .map(|i| {
            if i == FLASH_STEPS - 1 {
                FlashStep {
                    text: IDLE_STATUS.to_string(),
                    color: FlashColor::White,
                }
            } else {
                FlashStep {
                    text: text.to_string(),
                    color: if i % 2 == 0 {
                        FlashColor::White
                    } else {
                        level.color()
                    },
                }
            }
        })
        .collect()
}

/// Post the flash frames `step` apart.
pub async fn run_flash(events: EventSender, text: String, level: FlashLevel, step: Duration) {
    for frame in flash_steps(&text, level) {
        if !events.send(UiEvent::StatusFlash(frame)).await && events.is_closed() {
            return;
        }
        tokio::time::sleep(step).await;
    }
}
