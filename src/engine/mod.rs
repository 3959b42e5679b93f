mod reconcile;
pub mod watchdog;

pub use reconcile::{Applied, Conversation, TurnPhase, CANCELLED_TEXT};
pub use watchdog::{Watchdog, WatchdogAction, TIMEOUT_TEXT};
