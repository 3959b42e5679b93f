use std::fmt;

#[derive(Debug)]
pub enum ChatError {
    /// A frame that could not be turned into a stream event. Dropped and logged.
    MalformedEvent(String),
    /// The persistent channel is unavailable or broke mid-write.
    Transport(String),
    ApiError {
        status: u16,
        message: String,
    },
    /// The backend reported a failure for the running turn.
    AgentError(String),
    /// The watchdog gave up waiting on a turn.
    LocalTimeout,
    IdentityError(String),
    NetworkError(reqwest::Error),
    WebSocketError(tokio_tungstenite::tungstenite::Error),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
    YamlError(serde_yaml::Error),
    Other(String),
}

impl ChatError {
    /// Transport-level failures are recovered by reconnecting or by switching to
    /// the fallback path; everything else is terminal for the current operation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChatError::Transport(_) | ChatError::NetworkError(_) | ChatError::WebSocketError(_)
        )
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::MalformedEvent(msg) => write!(f, "Malformed event: {}", msg),
            ChatError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ChatError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            ChatError::AgentError(msg) => write!(f, "Agent error: {}", msg),
            ChatError::LocalTimeout => write!(f, "Timed out waiting for the agent"),
            ChatError::IdentityError(msg) => write!(f, "Identity error: {}", msg),
            ChatError::NetworkError(e) => write!(f, "Network error: {}", e),
            ChatError::WebSocketError(e) => write!(f, "WebSocket error: {}", e),
            ChatError::IoError(e) => write!(f, "IO error: {}", e),
            ChatError::JsonError(e) => write!(f, "JSON error: {}", e),
            ChatError::YamlError(e) => write!(f, "YAML error: {}", e),
            ChatError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatError::NetworkError(e) => Some(e),
            ChatError::WebSocketError(e) => Some(e),
            ChatError::IoError(e) => Some(e),
            ChatError::JsonError(e) => Some(e),
            ChatError::YamlError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::NetworkError(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::WebSocketError(err)
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::IoError(err)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::JsonError(err)
    }
}

impl From<serde_yaml::Error> for ChatError {
    fn from(err: serde_yaml::Error) -> Self {
        ChatError::YamlError(err)
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Other(err.to_string())
    }
}

impl From<String> for ChatError {
    fn from(msg: String) -> Self {
        ChatError::Other(msg)
    }
}

impl From<&str> for ChatError {
    fn from(msg: &str) -> Self {
        ChatError::Other(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
