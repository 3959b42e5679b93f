use agentchat::engine::{Applied, Conversation, TurnPhase, Watchdog, WatchdogAction, CANCELLED_TEXT};
use agentchat::models::{Message, Role, StreamEvent, ToolStatus, PLACEHOLDER_TEXT};
use std::time::{Duration, Instant};

fn tool(name: &str, status: ToolStatus, call_id: Option<&str>) -> StreamEvent {
    StreamEvent::Tool {
        tool_name: name.to_string(),
        status,
        content: format!("{} {:?}", name, status),
        call_id: call_id.map(str::to_string),
    }
}

fn loading(text: &str) -> StreamEvent {
    StreamEvent::Loading {
        content: text.to_string(),
    }
}

fn partial(text: &str) -> StreamEvent {
    StreamEvent::Partial {
        content: text.to_string(),
    }
}

fn content(text: &str) -> StreamEvent {
    StreamEvent::Content {
        content: text.to_string(),
    }
}

fn generic_partials(conversation: &Conversation) -> usize {
    conversation
        .messages()
        .iter()
        .filter(|m| !m.is_tool && m.is_partial)
        .count()
}

fn tools(conversation: &Conversation) -> Vec<&Message> {
    conversation.messages().iter().filter(|m| m.is_tool).collect()
}

#[test]
fn test_hello_scenario() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("Hello");

    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hello");
    assert!(!messages[0].is_partial);
    assert_eq!(messages[1].content, PLACEHOLDER_TEXT);
    assert!(messages[1].is_partial);
    assert!(conversation.is_loading());
    assert!(conversation.stream_in_progress());

    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.content != PLACEHOLDER_TEXT));
    assert!(messages[1].is_tool);
    assert_eq!(messages[1].tool_status, Some(ToolStatus::Starting));
    let tool_id = messages[1].id.clone();

    conversation.apply(tool("search", ToolStatus::Completed, Some("1")));
    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, tool_id);
    assert_eq!(messages[1].tool_status, Some(ToolStatus::Completed));

    conversation.apply(partial("Here are..."));
    let messages = conversation.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].content, "Here are...");
    assert!(messages[2].is_partial && !messages[2].is_tool);
    assert!(!conversation.is_loading());

    let applied = conversation.apply(content("Here are the results."));
    assert_eq!(applied, Applied::Finalized);
    let messages = conversation.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].content, "Here are the results.");
    assert!(!messages[2].is_partial);
    assert!(!conversation.is_loading());
    assert!(!conversation.stream_in_progress());
    assert_eq!(conversation.phase(), TurnPhase::Idle);
}

#[test]
fn test_replayed_tool_start_is_idempotent() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");

    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
    let replay = conversation.apply(tool("search", ToolStatus::Starting, Some("1")));

    assert_eq!(replay, Applied::Ignored);
    assert_eq!(tools(&conversation).len(), 1);
}

#[test]
fn test_replayed_start_without_call_id_is_idempotent() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");

    conversation.apply(tool("vision", ToolStatus::Starting, None));
    conversation.apply(tool("vision", ToolStatus::Starting, None));
    conversation.apply(tool("vision", ToolStatus::Completed, None));
    conversation.apply(tool("vision", ToolStatus::Completed, None));

    let tools = tools(&conversation);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].tool_status, Some(ToolStatus::Completed));
}

#[test]
fn test_start_after_untagged_start_adopts_call_id() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");

    conversation.apply(tool("search", ToolStatus::Starting, None));
    conversation.apply(tool("search", ToolStatus::Starting, Some("4")));
    conversation.apply(tool("search", ToolStatus::Completed, Some("4")));

    let tools = tools(&conversation);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].call_id.as_deref(), Some("4"));
    assert_eq!(tools[0].tool_status, Some(ToolStatus::Completed));
}

#[test]
fn test_same_tool_twice_with_distinct_call_ids() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");

    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
    conversation.apply(tool("search", ToolStatus::Starting, Some("2")));
    conversation.apply(tool("search", ToolStatus::Completed, Some("2")));

    let tools = tools(&conversation);
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].tool_status, Some(ToolStatus::Starting));
    assert_eq!(tools[1].tool_status, Some(ToolStatus::Completed));
}

#[test]
fn test_ordering_of_tools_and_answer() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");

    for event in [
        tool("A", ToolStatus::Starting, None),
        tool("A", ToolStatus::Completed, None),
        tool("B", ToolStatus::Starting, None),
        tool("B", ToolStatus::Completed, None),
        partial("x"),
        content("y"),
    ] {
        conversation.apply(event);
    }

    let messages = conversation.messages();
    let tail = &messages[messages.len() - 3..];
    assert_eq!(tail[0].tool_name.as_deref(), Some("A"));
    assert_eq!(tail[0].tool_status, Some(ToolStatus::Completed));
    assert_eq!(tail[1].tool_name.as_deref(), Some("B"));
    assert_eq!(tail[1].tool_status, Some(ToolStatus::Completed));
    assert!(!tail[2].is_tool);
    assert!(!tail[2].is_partial);
    assert_eq!(tail[2].content, "y");
    assert!(messages.iter().all(|m| m.content != PLACEHOLDER_TEXT));
}

#[test]
fn test_loading_is_suppressed_while_a_tool_runs() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));

    let before = conversation.messages().to_vec();
    let flags = (conversation.is_loading(), conversation.stream_in_progress());

    let applied = conversation.apply(loading("Generating response..."));

    assert_eq!(applied, Applied::Ignored);
    assert_eq!(conversation.messages(), before.as_slice());
    assert_eq!((conversation.is_loading(), conversation.stream_in_progress()), flags);
}

#[test]
fn test_loading_replaces_the_placeholder_in_place() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    let slot_id = conversation.messages()[1].id.clone();

    conversation.apply(loading("Analyzing your question..."));

    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, slot_id);
    assert_eq!(messages[1].content, "Analyzing your question...");
    assert!(conversation.is_loading());
}

#[test]
fn test_single_generic_partial_at_all_times() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");

    let events = [
        loading("a"),
        partial("b"),
        loading("c"),
        partial("bd"),
        loading("e"),
        partial("bdf"),
    ];
    for event in events {
        conversation.apply(event);
        assert!(generic_partials(&conversation) <= 1);
    }
    assert_eq!(conversation.messages().last().map(|m| m.content.as_str()), Some("bdf"));
}

#[test]
fn test_loading_does_not_overwrite_streamed_text() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(partial("The answer is"));

    let applied = conversation.apply(loading("Still thinking..."));

    assert_eq!(applied, Applied::Ignored);
    assert_eq!(conversation.messages()[1].content, "The answer is");
}

#[test]
fn test_tool_start_does_not_jump_ahead_of_streamed_text() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(partial("Let me check"));
    conversation.apply(tool("search", ToolStatus::Starting, Some("9")));

    let messages = conversation.messages();
    assert_eq!(messages[1].content, "Let me check");
    assert!(messages[2].is_tool);
}

#[test]
fn test_completion_without_start_is_synthesized_before_placeholder() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");

    conversation.apply(tool("forecasting", ToolStatus::Completed, Some("2")));

    let messages = conversation.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages[1].is_tool);
    assert_eq!(messages[1].tool_status, Some(ToolStatus::Completed));
    assert_eq!(messages[2].content, PLACEHOLDER_TEXT);
}

#[test]
fn test_finalization_drains_partials_and_keeps_tools() {
    for terminal in [content("done"), StreamEvent::Error { content: "boom".to_string() }] {
        let mut conversation = Conversation::new();
        conversation.begin_turn("q");
        conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
        conversation.apply(partial("half"));

        conversation.apply(terminal);

        assert_eq!(generic_partials(&conversation), 0);
        assert_eq!(tools(&conversation).len(), 1);
        assert!(!conversation.is_loading());
        assert!(!conversation.stream_in_progress());
    }
}

#[test]
fn test_error_becomes_final_assistant_message() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");

    conversation.apply(StreamEvent::Error {
        content: "Sorry, I encountered an error: quota".to_string(),
    });

    let last = conversation.messages().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(!last.is_partial);
    assert_eq!(last.content, "Sorry, I encountered an error: quota");
}

#[test]
fn test_events_after_finalization_are_ignored() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(content("final"));
    let before = conversation.messages().to_vec();

    assert_eq!(conversation.apply(partial("late")), Applied::Ignored);
    assert_eq!(
        conversation.apply(tool("search", ToolStatus::Starting, Some("1"))),
        Applied::Ignored
    );
    assert_eq!(conversation.messages(), before.as_slice());
}

#[test]
fn test_cancel_waits_for_ack_then_freezes_the_turn() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(partial("partial answer"));

    assert!(conversation.mark_cancelling());
    assert_eq!(conversation.apply(partial("partial answer grows")), Applied::Ignored);

    // stream_cancelled arrives
    assert!(conversation.cancel_turn());
    assert!(!conversation.is_loading());
    assert!(!conversation.stream_in_progress());

    let before = conversation.messages().to_vec();
    assert_eq!(conversation.apply(content("too late")), Applied::Ignored);
    assert_eq!(conversation.messages(), before.as_slice());

    let messages = conversation.messages();
    assert_eq!(messages[1].content, "partial answer");
    assert!(!messages[1].is_partial);
    assert_eq!(messages.last().unwrap().role, Role::System);
    assert_eq!(messages.last().unwrap().content, CANCELLED_TEXT);
}

#[test]
fn test_final_answer_racing_a_cancel_still_lands() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(partial("The answer"));
    assert!(conversation.mark_cancelling());

    // Progress events stay frozen, the final answer does not
    assert_eq!(conversation.apply(partial("The answer is")), Applied::Ignored);
    assert_eq!(conversation.apply(content("The answer is 42.")), Applied::Finalized);

    assert_eq!(conversation.phase(), TurnPhase::Idle);
    assert!(!conversation.is_loading());
    assert!(!conversation.stream_in_progress());
    assert_eq!(generic_partials(&conversation), 0);

    let later = Instant::now() + Watchdog::default().cancel_grace + Duration::from_secs(1);
    assert_eq!(Watchdog::default().check(&mut conversation, later), WatchdogAction::None);

    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "The answer is 42.");
    assert!(!messages[1].is_partial);
    assert!(messages.iter().all(|m| m.content != CANCELLED_TEXT));
}

#[test]
fn test_error_racing_a_cancel_still_lands() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
    assert!(conversation.mark_cancelling());

    let error = StreamEvent::Error {
        content: "backend failed".to_string(),
    };
    assert_eq!(conversation.apply(error), Applied::Finalized);
    assert!(!conversation.has_open_turn());
    assert_eq!(conversation.messages().last().unwrap().content, "backend failed");
    assert_eq!(tools(&conversation).len(), 1);
}

#[test]
fn test_cancel_drops_the_placeholder_and_keeps_tools() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
    conversation.apply(loading("ignored"));

    assert!(conversation.cancel_turn());

    let messages = conversation.messages();
    assert_eq!(generic_partials(&conversation), 0);
    assert_eq!(tools(&conversation).len(), 1);
    assert_eq!(messages.last().unwrap().content, CANCELLED_TEXT);
}

#[test]
fn test_cancel_after_finalization_is_noop() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(content("answer"));
    let before = conversation.messages().to_vec();

    assert!(!conversation.cancel_turn());
    assert!(!conversation.mark_cancelling());
    assert_eq!(conversation.messages(), before.as_slice());
}

#[test]
fn test_restart_turn_discards_assistant_side() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("q");
    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
    conversation.apply(partial("some text"));

    assert!(conversation.restart_turn());

    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "q");
    assert_eq!(messages[1].content, PLACEHOLDER_TEXT);
    assert!(conversation.is_loading());

    // A replayed turn correlates from scratch
    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
    assert_eq!(tools(&conversation).len(), 1);
}

#[test]
fn test_tool_lookup_is_scoped_to_the_open_turn() {
    let mut conversation = Conversation::new();
    conversation.begin_turn("first");
    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));
    conversation.apply(content("one"));

    conversation.begin_turn("second");
    conversation.apply(tool("search", ToolStatus::Starting, Some("1")));

    assert_eq!(tools(&conversation).len(), 2);
}

#[test]
fn test_history_and_clear() {
    let mut conversation = Conversation::new();
    conversation.load_history(vec![
        Message::from_history("user", "Hi", Some("10:00 AM".to_string())),
        Message::from_history("assistant", "Hello!", None),
    ]);

    assert_eq!(conversation.messages().len(), 2);
    assert!(conversation.messages().iter().all(|m| !m.is_partial));
    assert!(!conversation.has_open_turn());

    conversation.clear();
    assert!(conversation.is_empty());
    assert!(!conversation.is_loading());
}
