pub const DEFAULT_BASE_URL: &str = "http://localhost:9876";

pub fn default_persistent() -> bool {
    true
}

pub fn default_stream_timeout() -> u64 {
    120
}

pub fn default_heartbeat_secs() -> u64 {
    25
}

/// `http(s)://host[:port][/prefix]` becomes `ws(s)://host[:port][/prefix]/ws`.
pub fn derive_ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/ws", swapped)
}
