//! In-process stand-in for the agent backend: a WebSocket endpoint speaking the
//! `{"event", "data"}` envelope and a bare-bones HTTP/1.1 responder for the
//! fallback routes.

#![allow(dead_code)]

use agentchat::chat::ChatView;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// `stream_update` payloads sent in reply to `chat_request`.
    pub on_chat: Vec<Value>,
    /// Drop the socket right after replying to the first `chat_request`.
    pub drop_after_chat: bool,
    pub ack_cancel: bool,
    /// `stream_update` payloads sent in reply to `cancel_stream` when it is not acknowledged.
    pub on_cancel: Vec<Value>,
    pub history: Vec<Value>,
    /// `data:` lines for `POST /chat`.
    pub http_chat: Vec<Value>,
}

pub struct FakeBackend {
    pub ws_url: String,
    pub http_url: String,
    /// Every frame or request the client sent, in arrival order.
    pub received: mpsc::UnboundedReceiver<Value>,
    pub connections: Arc<AtomicUsize>,
    pub closed: mpsc::UnboundedReceiver<()>,
}

impl FakeBackend {
    pub async fn start(behavior: Behavior) -> Self {
        let behavior = Arc::new(behavior);
        let (received_tx, received) = mpsc::unbounded_channel();
        let (closed_tx, closed) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let dropped_once = Arc::new(AtomicUsize::new(0));

        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}/ws", ws_listener.local_addr().unwrap());
        {
            let behavior = behavior.clone();
            let received_tx = received_tx.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = ws_listener.accept().await {
                    tokio::spawn(serve_ws(
                        stream,
                        behavior.clone(),
                        received_tx.clone(),
                        connections.clone(),
                        closed_tx.clone(),
                        dropped_once.clone(),
                    ));
                }
            });
        }

        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_url = format!("http://{}", http_listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((stream, _)) = http_listener.accept().await {
                tokio::spawn(serve_http(stream, behavior.clone(), received_tx.clone()));
            }
        });

        Self {
            ws_url,
            http_url,
            received,
            connections,
            closed,
        }
    }

    /// Wait for the next received frame whose name is `event`.
    pub async fn expect(&mut self, event: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let frame = self.received.recv().await.expect("backend stopped");
                if frame["event"] == event {
                    return frame;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", event))
    }

    /// Everything received so far, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.received.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

fn envelope(event: &str, data: Value) -> WsMessage {
    WsMessage::Text(json!({"event": event, "data": data}).to_string())
}

async fn serve_ws(
    stream: TcpStream,
    behavior: Arc<Behavior>,
    received: mpsc::UnboundedSender<Value>,
    connections: Arc<AtomicUsize>,
    closed: mpsc::UnboundedSender<()>,
    dropped_once: Arc<AtomicUsize>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    connections.fetch_add(1, Ordering::SeqCst);
    let (mut tx, mut rx) = ws.split();
    let _ = tx.send(envelope("connection_successful", json!({}))).await;

    while let Some(Ok(message)) = rx.next().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let _ = received.send(frame.clone());

        match frame["event"].as_str() {
            Some("chat_request") => {
                for update in &behavior.on_chat {
                    let _ = tx.send(envelope("stream_update", update.clone())).await;
                }
                if behavior.drop_after_chat && dropped_once.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Vanish without a close frame
                    return;
                }
            }
            Some("get_chat_history") => {
                let data = json!({"messages": behavior.history});
                let _ = tx.send(envelope("chat_history", data)).await;
            }
            Some("clear_chat_history") => {
                let _ = tx.send(envelope("history_cleared", json!({}))).await;
            }
            Some("cancel_stream") if behavior.ack_cancel => {
                let _ = tx.send(envelope("stream_cancelled", json!({}))).await;
            }
            Some("cancel_stream") => {
                for update in &behavior.on_cancel {
                    let _ = tx.send(envelope("stream_update", update.clone())).await;
                }
            }
            Some("ping") => {
                let _ = tx.send(envelope("pong", json!({}))).await;
            }
            _ => {}
        }
    }
    let _ = closed.send(());
}

async fn serve_http(mut stream: TcpStream, behavior: Arc<Behavior>, received: mpsc::UnboundedSender<Value>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body: Value = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
    let _ = received.send(json!({"event": format!("http {} {}", method, path), "data": body}));

    let (content_type, payload) = match (method.as_str(), path.as_str()) {
        ("POST", "/chat") => {
            let lines: String = behavior
                .http_chat
                .iter()
                .map(|update| format!("data: {}\n\n", update))
                .collect();
            ("text/event-stream", lines)
        }
        ("GET", p) if p.ends_with("/history") => (
            "application/json",
            json!({"messages": behavior.history}).to_string(),
        ),
        ("GET", "/health") => ("application/json", json!({"status": "healthy"}).to_string()),
        ("DELETE", _) => ("application/json", json!({"status": "success"}).to_string()),
        _ => ("application/json", json!({"detail": "not found"}).to_string()),
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        payload.len(),
        payload
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// The stream a well-behaved backend sends for the `"Hello"` turn.
pub fn hello_turn() -> Vec<Value> {
    vec![
        json!({"type": "loading", "content": "Analyzing your question..."}),
        json!({"type": "tool", "tool": "search", "status": "starting", "content": "Searching", "call_id": 1}),
        json!({"type": "tool", "tool": "search", "status": "completed", "content": "Found it", "call_id": 1}),
        json!({"type": "partial", "content": "Here are"}),
        json!({"type": "content", "content": "Here are the results."}),
    ]
}

pub async fn wait_for(
    views: &mut watch::Receiver<ChatView>,
    what: &str,
    pred: impl Fn(&ChatView) -> bool,
) -> ChatView {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let view = views.borrow_and_update();
                if pred(&view) {
                    return view.clone();
                }
            }
            views.changed().await.expect("chat loop stopped");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}
