use std::time::Duration;

/// Base delay before the first reconnect.
pub const BASE_DELAY_MS: u64 = 1000;
/// Upper bound for a single reconnect delay.
pub const MAX_DELAY_MS: u64 = 30_000;
/// Reconnect attempts after a connection is lost before giving up.
pub const MAX_ATTEMPTS: u32 = 10;

/// Reconnection policy shared by every consumer of the persistent channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            max_attempts: Some(MAX_ATTEMPTS),
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff for the given 1-based attempt, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt > max)
    }
}
