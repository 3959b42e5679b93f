use agentchat::api::{decode_body, ChunkDecoder};
use agentchat::codec::{decode_server_frame, ServerEvent};
use agentchat::engine::Conversation;
use agentchat::models::{Message, StreamEvent, ToolStatus};
use agentchat::ChatError;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;

fn updates() -> Vec<Value> {
    vec![
        json!({"type": "loading", "content": "Analyzing your question..."}),
        json!({"type": "tool", "tool": "search", "status": "starting", "content": "Searching", "call_id": 1}),
        json!({"type": "tool", "tool": "search", "status": "completed", "content": "Found 3 rows", "call_id": 1}),
        json!({"type": "loading", "content": "Using tool: forecasting... [call_2_ab12]"}),
        json!({"type": "tool", "tool": "forecasting", "status": "completed", "content": "Forecast ready", "call_id": "2"}),
        json!({"type": "partial", "content": "Here are"}),
        json!({"type": "partial", "content": "Here are the"}),
        json!({"type": "content", "content": "Here are the results."}),
    ]
}

fn chunked_body(lines: &[String], split_every: usize) -> Vec<Result<Bytes, ChatError>> {
    let body: Vec<u8> = lines.iter().flat_map(|l| l.bytes().chain(b"\n".iter().copied())).collect();
    body.chunks(split_every)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect()
}

/// Strip the fields each client run generates on its own.
fn comparable(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut value = serde_json::to_value(m).unwrap();
            let object = value.as_object_mut().unwrap();
            object.remove("id");
            object.remove("created_at");
            value
        })
        .collect()
}

#[test]
fn test_decoder_reassembles_lines_split_across_chunks() {
    let mut decoder = ChunkDecoder::new();

    assert!(decoder.feed(br#"data: {"type": "par"#).is_empty());
    let events = decoder.feed(b"tial\", \"content\": \"Hi\"}\ndata: {\"type\": \"content\", ");
    assert_eq!(
        events,
        vec![StreamEvent::Partial {
            content: "Hi".to_string()
        }]
    );
    assert!(!decoder.is_empty_buffer());

    let events = decoder.feed(b"\"content\": \"Hi there\"}\n");
    assert_eq!(
        events,
        vec![StreamEvent::Content {
            content: "Hi there".to_string()
        }]
    );
    assert!(decoder.is_empty_buffer());
}

#[test]
fn test_decoder_keeps_multibyte_characters_intact() {
    let line = "data: {\"type\": \"content\", \"content\": \"caf\u{e9} \u{1f600}\"}\n";
    let bytes = line.as_bytes();
    let mut decoder = ChunkDecoder::new();

    let mut events = Vec::new();
    for byte in bytes {
        events.extend(decoder.feed(std::slice::from_ref(byte)));
    }

    assert_eq!(
        events,
        vec![StreamEvent::Content {
            content: "caf\u{e9} \u{1f600}".to_string()
        }]
    );
}

#[test]
fn test_decoder_drops_malformed_lines_and_flushes_tail() {
    let mut decoder = ChunkDecoder::new();

    let events = decoder.feed(b"data: {\"content\": \"no type\"}\ndata: {\"type\": \"partial\", \"content\": \"ok\"}\n");
    assert_eq!(
        events,
        vec![StreamEvent::Partial {
            content: "ok".to_string()
        }]
    );

    assert!(decoder.feed(br#"data: {"type": "content", "content": "end"}"#).is_empty());
    assert_eq!(
        decoder.finish(),
        vec![StreamEvent::Content {
            content: "end".to_string()
        }]
    );
}

#[tokio::test]
async fn test_decode_body_delivers_events_in_order() {
    let lines: Vec<String> = updates().iter().map(|u| format!("data: {}", u)).collect();
    let body = stream::iter(chunked_body(&lines, 7));

    let mut kinds = Vec::new();
    decode_body(body, Duration::from_secs(5), |event| {
        kinds.push(event.kind());
        true
    })
    .await
    .unwrap();

    assert_eq!(
        kinds,
        vec!["loading", "tool", "tool", "tool", "tool", "partial", "partial", "content"]
    );
}

#[tokio::test]
async fn test_decode_body_stops_when_consumer_declines() {
    let lines: Vec<String> = updates().iter().map(|u| format!("data: {}", u)).collect();
    let body = stream::iter(chunked_body(&lines, 64));

    let mut seen = 0;
    decode_body(body, Duration::from_secs(5), |_| {
        seen += 1;
        seen < 2
    })
    .await
    .unwrap();

    assert_eq!(seen, 2);
}

#[tokio::test]
async fn test_decode_body_times_out_on_a_stalled_body() {
    let first = vec![Ok::<Bytes, ChatError>(Bytes::from_static(
        b"data: {\"type\": \"loading\", \"content\": \"Working\"}\n",
    ))];
    let body = Box::pin(stream::iter(first).chain(stream::pending()));

    let mut events = Vec::new();
    let result = decode_body(body, Duration::from_millis(50), |event| {
        events.push(event);
        true
    })
    .await;

    assert!(matches!(result, Err(ChatError::Transport(_))));
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_decode_body_surfaces_stream_errors() {
    let chunks = vec![
        Ok(Bytes::from_static(b"data: {\"type\": \"partial\", \"content\": \"a\"}\n")),
        Err(ChatError::Transport("connection reset".to_string())),
    ];

    let result = decode_body(stream::iter(chunks), Duration::from_secs(5), |_| true).await;
    assert!(matches!(result, Err(ChatError::Transport(_))));
}

#[tokio::test]
async fn test_fallback_and_persistent_paths_reconcile_identically() {
    let updates = updates();

    let mut over_channel = Conversation::new();
    over_channel.begin_turn("Hello");
    for update in &updates {
        let frame = json!({"event": "stream_update", "data": update}).to_string();
        if let Some(ServerEvent::Stream(event)) = decode_server_frame(&frame).unwrap() {
            over_channel.apply(event);
        }
    }

    let mut over_http = Conversation::new();
    over_http.begin_turn("Hello");
    let lines: Vec<String> = updates.iter().map(|u| format!("data: {}", u)).collect();
    let mut events = Vec::new();
    decode_body(stream::iter(chunked_body(&lines, 5)), Duration::from_secs(5), |event| {
        events.push(event);
        true
    })
    .await
    .unwrap();
    for event in events {
        over_http.apply(event);
    }

    assert_eq!(
        comparable(over_channel.messages()),
        comparable(over_http.messages())
    );

    let tools: Vec<_> = over_http.messages().iter().filter(|m| m.is_tool).collect();
    assert_eq!(tools.len(), 2);
    assert!(tools.iter().all(|m| m.tool_status == Some(ToolStatus::Completed)));
    assert_eq!(over_http.messages().last().unwrap().content, "Here are the results.");
    assert!(!over_http.stream_in_progress());
}
