use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::ToolStatus;

/// Text shown in the assistant slot between submit and the first real update.
pub const PLACEHOLDER_TEXT: &str = "Thinking...";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Map a role string coming off the wire. Unknown roles are shown as system lines.
    pub fn from_wire(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::System,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
    pub is_partial: bool,
    pub is_tool: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_status: Option<ToolStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>, is_partial: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: display_timestamp(),
            is_partial,
            is_tool: false,
            tool_name: None,
            tool_status: None,
            call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, false)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, false)
    }

    pub fn assistant_partial(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, true)
    }

    pub fn assistant_final(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, false)
    }

    /// Tool messages stay partial for their whole life; `tool_status` carries progress.
    pub fn tool(
        tool_name: impl Into<String>,
        status: ToolStatus,
        content: impl Into<String>,
        call_id: Option<String>,
    ) -> Self {
        let mut message = Self::new(Role::Assistant, content, true);
        message.is_tool = true;
        message.tool_name = Some(tool_name.into());
        message.tool_status = Some(status);
        message.call_id = call_id;
        message
    }

    /// A finalized entry replayed from backend history.
    pub fn from_history(role: &str, content: impl Into<String>, timestamp: Option<String>) -> Self {
        let mut message = Self::new(Role::from_wire(role), content, false);
        if let Some(timestamp) = timestamp {
            message.created_at = timestamp;
        }
        message
    }

    /// The non-tool assistant message that is still being written.
    pub fn is_generic_slot(&self) -> bool {
        self.role == Role::Assistant && self.is_partial && !self.is_tool
    }

    pub fn is_final_answer(&self) -> bool {
        self.role == Role::Assistant && !self.is_partial && !self.is_tool
    }

    pub fn matches_tool(&self, tool_name: &str) -> bool {
        self.is_tool && self.tool_name.as_deref() == Some(tool_name)
    }
}

/// Same clock format the backend stamps history entries with.
pub fn display_timestamp() -> String {
    chrono::Local::now().format("%I:%M %p").to_string()
}
