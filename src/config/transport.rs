use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Set to `false` to send every turn over the HTTP fallback.
    #[serde(default)]
    pub persistent: Option<bool>,
    #[serde(default)]
    pub reconnect_base_ms: Option<u64>,
    #[serde(default)]
    pub reconnect_max_ms: Option<u64>,
    /// `0` retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default)]
    pub heartbeat_secs: Option<u64>,
    /// Seconds to wait for the next chunk of a fallback body.
    #[serde(default)]
    pub stream_timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub turn_timeout_secs: Option<u64>,
}
