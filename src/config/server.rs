use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Persistent channel endpoint. Derived from `base_url` when unset.
    #[serde(default)]
    pub ws_url: Option<String>,
}
