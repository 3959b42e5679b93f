mod defaults;
mod server;
mod transport;
mod validation;

use crate::cli::Args;
use crate::engine::watchdog::{DEFAULT_INTERVAL, DEFAULT_TURN_TIMEOUT};
use crate::transport::backoff::{BASE_DELAY_MS, MAX_ATTEMPTS, MAX_DELAY_MS};
use crate::transport::ReconnectPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use defaults::{derive_ws_url, DEFAULT_BASE_URL};
pub use server::ServerConfig;
pub use transport::{TransportConfig, WatchdogConfig};
pub use validation::validate_url;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub ws_url: String,
    pub persistent: bool,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: Duration,
    pub stream_timeout: u64,
    pub watchdog_interval: Duration,
    pub turn_timeout: Duration,
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JsonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env_and_args(args: &Args) -> Result<Self, String> {
        // A broken config file is reported rather than silently ignored
        let json_config = JsonConfig::load().map_err(|e| format!("{:#}", e))?;
        Self::resolve(args, &json_config, |name| env::var(name).ok())
    }

    /// Layer CLI args > environment > config file > defaults.
    pub fn resolve(
        args: &Args,
        json_config: &JsonConfig,
        env_var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        let expand = |value: String| validation::expand_with(&value, &env_var);

        // Get base URL: CLI args > env var > config file > default
        let base_url = args
            .server
            .clone()
            .or_else(|| env_var("AGENTCHAT_SERVER_URL"))
            .or(json_config.server.base_url.clone())
            .map(expand)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        validate_url("server URL", &base_url, &["http", "https"])?;

        // Get channel URL: CLI args > env var > config file > derived from base URL
        let ws_url = args
            .ws_url
            .clone()
            .or_else(|| env_var("AGENTCHAT_WS_URL"))
            .or(json_config.server.ws_url.clone())
            .map(expand)
            .unwrap_or_else(|| derive_ws_url(&base_url));
        validate_url("channel URL", &ws_url, &["ws", "wss"])?;

        // --no-socket always wins
        let persistent = if args.no_socket {
            false
        } else {
            env_var("AGENTCHAT_PERSISTENT")
                .and_then(|v| parse_flag(&v))
                .or(json_config.transport.persistent)
                .unwrap_or_else(defaults::default_persistent)
        };

        let stream_timeout = env_var("AGENTCHAT_STREAM_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .or(json_config.transport.stream_timeout)
            .unwrap_or_else(defaults::default_stream_timeout);

        let turn_timeout = env_var("AGENTCHAT_TURN_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .or(json_config.watchdog.turn_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TURN_TIMEOUT);

        let watchdog_interval = json_config
            .watchdog
            .interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INTERVAL);

        let verbose = args.verbose
            || env_var("AGENTCHAT_VERBOSE")
                .and_then(|v| parse_flag(&v))
                .or(json_config.session.verbose)
                .unwrap_or(false);

        let transport = &json_config.transport;
        let reconnect = ReconnectPolicy {
            base_delay: Duration::from_millis(transport.reconnect_base_ms.unwrap_or(BASE_DELAY_MS)),
            max_delay: Duration::from_millis(transport.reconnect_max_ms.unwrap_or(MAX_DELAY_MS)),
            max_attempts: match transport.max_reconnect_attempts {
                Some(0) => None,
                Some(n) => Some(n),
                None => Some(MAX_ATTEMPTS),
            },
        };
        if reconnect.base_delay > reconnect.max_delay {
            return Err("transport.reconnect_base_ms must not exceed reconnect_max_ms".to_string());
        }

        let heartbeat = Duration::from_secs(
            transport
                .heartbeat_secs
                .filter(|secs| *secs > 0)
                .unwrap_or_else(defaults::default_heartbeat_secs),
        );

        Ok(Config {
            base_url,
            ws_url,
            persistent,
            reconnect,
            heartbeat,
            stream_timeout,
            watchdog_interval,
            turn_timeout,
            verbose,
        })
    }
}

impl JsonConfig {
    pub fn load() -> Result<Self> {
        for path in Self::get_config_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        // No config file found, return default
        Ok(JsonConfig::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config file: {}", path.display()))?
        };
        Ok(config)
    }

    pub fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            // Current directory wins over the user's global config
            PathBuf::from(".agentchat.yaml"),
            PathBuf::from(".agentchat.yml"),
            PathBuf::from(".agentchat.json"),
        ];

        if let Some(home_dir) = dirs::home_dir() {
            let config_dir = home_dir.join(".config").join("agentchat");
            paths.push(config_dir.join("agentchat.yaml"));
            paths.push(config_dir.join("agentchat.yml"));
            paths.push(config_dir.join("agentchat.json"));
        }

        paths
    }
}
