use std::time::{Duration, Instant};

use tracing::warn;

use super::reconcile::{Conversation, TurnPhase};

/// Final answer shown when a turn goes quiet for too long.
pub const TIMEOUT_TEXT: &str =
    "Sorry, the response timed out before it finished. Please try again.";

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);
/// How long a cancel waits for the backend acknowledgement before closing locally.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    None,
    HealedFlags,
    CancelExpired,
    TimedOut,
}

/// Periodic consistency check over the conversation, driven by a timer.
#[derive(Debug, Clone)]
pub struct Watchdog {
    pub interval: Duration,
    pub turn_timeout: Duration,
    pub cancel_grace: Duration,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

impl Watchdog {
    pub fn new(interval: Duration, turn_timeout: Duration) -> Self {
        Self {
            interval,
            turn_timeout,
            ..Self::default()
        }
    }

    pub fn check(&self, conversation: &mut Conversation, now: Instant) -> WatchdogAction {
        if conversation.heal_stuck_flags() {
            warn!("progress flags were still set after the final answer, cleared them");
            return WatchdogAction::HealedFlags;
        }

        let quiet_for = now.saturating_duration_since(conversation.last_activity());
        match conversation.phase() {
            TurnPhase::Idle => WatchdogAction::None,
            TurnPhase::Cancelling if quiet_for >= self.cancel_grace => {
                warn!(?quiet_for, "cancel was never acknowledged, closing the turn locally");
                conversation.cancel_turn();
                WatchdogAction::CancelExpired
            }
            TurnPhase::Active if quiet_for >= self.turn_timeout => {
                warn!(?quiet_for, "turn stalled, giving up");
                conversation.fail_turn(TIMEOUT_TEXT);
                WatchdogAction::TimedOut
            }
            _ => WatchdogAction::None,
        }
    }
}
