//! Wire payloads in, typed [`StreamEvent`]s out.
//!
//! Both transports end up here: the persistent channel hands over JSON
//! envelopes (`{"event": ..., "data": ...}`) and the fallback path hands over
//! `data: <json>` lines. Unknown tags decode to `None` so newer producers do not
//! break older clients.

pub mod legacy;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::api::models::{HistoryResponse, StreamUpdate};
use crate::error::{ChatError, Result};
use crate::models::{Message, StreamEvent, ToolStatus};

/// Everything the backend can push over the persistent channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Stream(StreamEvent),
    StreamCancelled,
    History(Vec<Message>),
    HistoryCleared,
    Error { message: String },
    Welcome,
    Pong,
}

/// Commands sent over the persistent channel.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    ChatRequest { user_id: String, message: String },
    GetChatHistory { user_id: String },
    ClearChatHistory { user_id: String },
    CancelStream { user_id: String },
    Ping {},
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::ChatRequest { .. } => "chat_request",
            ClientCommand::GetChatHistory { .. } => "get_chat_history",
            ClientCommand::ClearChatHistory { .. } => "clear_chat_history",
            ClientCommand::CancelStream { .. } => "cancel_stream",
            ClientCommand::Ping {} => "ping",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn malformed(reason: impl Into<String>) -> ChatError {
    ChatError::MalformedEvent(reason.into())
}

fn normalize_call_id(raw: Option<Value>) -> Option<String> {
    match raw? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null | Value::String(_) => None,
        other => {
            debug!(call_id = %other, "ignoring non-scalar call_id");
            None
        }
    }
}

/// Decode a `stream_update` object into a stream event.
pub fn decode_stream_update(value: Value) -> Result<Option<StreamEvent>> {
    if !value.is_object() {
        return Err(malformed(format!("stream update is not an object: {}", value)));
    }
    let update: StreamUpdate =
        serde_json::from_value(value).map_err(|e| malformed(format!("stream update: {}", e)))?;
    let update_type = update
        .update_type
        .ok_or_else(|| malformed("stream update without a type"))?;
    let content = update.content.unwrap_or_default();

    let event = match update_type.as_str() {
        "loading" => legacy::retag_loading(content),
        "tool" => {
            let status = match update.status.as_deref() {
                Some(raw) => ToolStatus::parse(raw)
                    .ok_or_else(|| malformed(format!("unknown tool status '{}'", raw)))?,
                None => ToolStatus::Starting,
            };
            let tool_name = update
                .tool
                .filter(|name| !name.trim().is_empty())
                .or_else(|| legacy::extract_tool_name(&content))
                .ok_or_else(|| malformed("tool update without a tool name"))?;
            let call_id =
                normalize_call_id(update.call_id).or_else(|| legacy::extract_call_id(&content));
            StreamEvent::Tool {
                tool_name,
                status,
                content,
                call_id,
            }
        }
        "partial" => StreamEvent::Partial { content },
        "content" => StreamEvent::Content { content },
        "error" => StreamEvent::Error { content },
        other => {
            debug!(update_type = other, "ignoring unrecognized stream update");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Decode one line of a chunked fallback body.
///
/// Payloads that are not JSON are kept as final content rather than dropped.
pub fn decode_chunk_line(line: &str) -> Result<Option<StreamEvent>> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let payload = match line.split_once(':') {
        Some((field, value)) => match field.trim() {
            "data" => value.trim(),
            "event" | "id" | "retry" => {
                debug!(field = field.trim(), value = value.trim(), "skipping SSE field");
                return Ok(None);
            }
            _ => line.trim(),
        },
        None => line.trim(),
    };

    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => decode_stream_update(value),
        Err(e) => {
            debug!(error = %e, "chunk is not JSON, keeping it as final content");
            Ok(Some(StreamEvent::Content {
                content: payload.to_string(),
            }))
        }
    }
}

/// Decode one text frame from the persistent channel.
pub fn decode_server_frame(text: &str) -> Result<Option<ServerEvent>> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| malformed(format!("frame is not JSON: {}", e)))?;
    let event = value
        .get("event")
        .and_then(|e| e.as_str())
        .ok_or_else(|| malformed("frame without an event name"))?
        .to_string();
    let data = value.get("data").cloned().unwrap_or(Value::Null);

    let decoded = match event.as_str() {
        "stream_update" => decode_stream_update(data)?.map(ServerEvent::Stream),
        "stream_cancelled" => Some(ServerEvent::StreamCancelled),
        "chat_history" => {
            let history: HistoryResponse = if data.is_null() {
                HistoryResponse::default()
            } else {
                serde_json::from_value(data)
                    .map_err(|e| malformed(format!("chat history: {}", e)))?
            };
            Some(ServerEvent::History(
                history.messages.into_iter().map(Message::from).collect(),
            ))
        }
        "history_cleared" | "chat_history_cleared" => Some(ServerEvent::HistoryCleared),
        "error" => {
            let message = data
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error from server")
                .to_string();
            Some(ServerEvent::Error { message })
        }
        "connection_successful" => Some(ServerEvent::Welcome),
        "pong" => Some(ServerEvent::Pong),
        other => {
            debug!(event = other, "ignoring unrecognized channel event");
            None
        }
    };
    Ok(decoded)
}
