use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Starting,
    Completed,
}

impl ToolStatus {
    pub fn parse(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "starting" | "started" | "start" => Some(ToolStatus::Starting),
            "completed" | "complete" | "done" => Some(ToolStatus::Completed),
            _ => None,
        }
    }
}

/// One typed update for the running turn, whichever transport it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Loading {
        content: String,
    },
    Tool {
        tool_name: String,
        status: ToolStatus,
        content: String,
        call_id: Option<String>,
    },
    Partial {
        content: String,
    },
    Content {
        content: String,
    },
    Error {
        content: String,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Loading { .. } => "loading",
            StreamEvent::Tool { .. } => "tool",
            StreamEvent::Partial { .. } => "partial",
            StreamEvent::Content { .. } => "content",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// `content` and `error` close the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Content { .. } | StreamEvent::Error { .. })
    }
}
