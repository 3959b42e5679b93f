use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Message;

/// Body of `POST /chat` and of the `chat_request` channel command.
#[derive(Serialize, Debug, Clone)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

/// `stream_update` payload, shared by both transports.
#[derive(Deserialize, Debug)]
pub struct StreamUpdate {
    #[serde(rename = "type")]
    pub update_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub call_id: Option<Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct HistoryEntry {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl From<HistoryEntry> for Message {
    fn from(entry: HistoryEntry) -> Self {
        Message::from_history(&entry.role, entry.content, entry.timestamp)
    }
}

/// `GET /chat/{user_id}/history` and the `chat_history` channel event.
#[derive(Deserialize, Debug, Default)]
pub struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<HistoryEntry>,
}

#[derive(Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}
