use std::time::Instant;

use tracing::{debug, warn};

use crate::models::{Message, StreamEvent, ToolStatus, PLACEHOLDER_TEXT};

/// Note appended when a turn is stopped on request.
pub const CANCELLED_TEXT: &str = "Response generation was cancelled.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// No request outstanding; stream events are dropped.
    Idle,
    Active,
    /// Cancel sent, waiting on the acknowledgement. Stream events are dropped.
    Cancelling,
}

/// What a single reconciliation step did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Ignored,
    Changed,
    Finalized,
}

/// The authoritative message list and the turn state that goes with it.
///
/// Every transition reads and writes `self` only, so steps compose in arrival
/// order without stale snapshots.
#[derive(Debug)]
pub struct Conversation {
    messages: Vec<Message>,
    is_loading: bool,
    stream_in_progress: bool,
    phase: TurnPhase,
    /// Index of the first assistant-side message of the open turn.
    turn_start: usize,
    /// The generic slot holds answer text rather than a loading line.
    slot_streamed: bool,
    last_activity: Instant,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            is_loading: false,
            stream_in_progress: false,
            phase: TurnPhase::Idle,
            turn_start: 0,
            slot_streamed: false,
            last_activity: Instant::now(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn stream_in_progress(&self) -> bool {
        self.stream_in_progress
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn has_open_turn(&self) -> bool {
        self.phase != TurnPhase::Idle
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Append the user's message and the assistant placeholder, and open a turn.
    pub fn begin_turn(&mut self, text: impl Into<String>) -> &Message {
        if self.has_open_turn() {
            warn!("starting a new turn while the previous one is still open");
        }
        self.drop_stray_partials();
        self.messages.push(Message::user(text));
        let user_index = self.messages.len() - 1;
        self.turn_start = self.messages.len();
        self.messages.push(Message::assistant_partial(PLACEHOLDER_TEXT));
        self.slot_streamed = false;
        self.is_loading = true;
        self.stream_in_progress = true;
        self.phase = TurnPhase::Active;
        self.last_activity = Instant::now();
        &self.messages[user_index]
    }

    /// Fold one stream event into the list.
    pub fn apply(&mut self, event: StreamEvent) -> Applied {
        match self.phase {
            TurnPhase::Active => {}
            // A final answer that beat the cancel acknowledgement still lands
            TurnPhase::Cancelling if event.is_terminal() => {
                debug!(kind = event.kind(), "turn finished before the cancel took effect");
            }
            phase => {
                debug!(kind = event.kind(), ?phase, "no open turn, dropping event");
                return Applied::Ignored;
            }
        }
        self.last_activity = Instant::now();

        match event {
            StreamEvent::Error { content } | StreamEvent::Content { content } => {
                self.finalize(content);
                Applied::Finalized
            }
            StreamEvent::Tool {
                tool_name,
                status: ToolStatus::Starting,
                content,
                call_id,
            } => self.tool_started(tool_name, content, call_id),
            StreamEvent::Tool {
                tool_name,
                status: ToolStatus::Completed,
                content,
                call_id,
            } => self.tool_completed(tool_name, content, call_id),
            StreamEvent::Loading { content } => self.loading(content),
            StreamEvent::Partial { content } => self.partial(content),
        }
    }

    fn tool_started(&mut self, tool_name: String, content: String, call_id: Option<String>) -> Applied {
        if let Some(index) = self.correlate(&tool_name, call_id.as_deref(), ToolStatus::Starting) {
            debug!(tool = %tool_name, call_id = ?call_id, "duplicate tool start suppressed");
            let existing = &mut self.messages[index];
            if existing.call_id.is_none() && call_id.is_some() {
                existing.call_id = call_id;
            }
            return Applied::Ignored;
        }

        // A tool call supersedes the generic loading line, but never jumps ahead
        // of answer text that is already streaming.
        if let Some(slot) = self.generic_slot() {
            if !self.slot_streamed {
                self.messages.remove(slot);
            }
        }
        self.messages
            .push(Message::tool(tool_name, ToolStatus::Starting, content, call_id));
        self.stream_in_progress = true;
        Applied::Changed
    }

    fn tool_completed(&mut self, tool_name: String, content: String, call_id: Option<String>) -> Applied {
        match self.correlate(&tool_name, call_id.as_deref(), ToolStatus::Completed) {
            Some(index) => {
                let existing = &mut self.messages[index];
                existing.tool_status = Some(ToolStatus::Completed);
                existing.content = content;
                if existing.call_id.is_none() {
                    existing.call_id = call_id;
                }
            }
            None => {
                debug!(tool = %tool_name, call_id = ?call_id, "completion without a start, synthesizing");
                let message = Message::tool(tool_name, ToolStatus::Completed, content, call_id);
                match self.generic_slot() {
                    Some(slot) if !self.slot_streamed => self.messages.insert(slot, message),
                    _ => self.messages.push(message),
                }
            }
        }
        self.stream_in_progress = true;
        Applied::Changed
    }

    fn loading(&mut self, content: String) -> Applied {
        if self.tool_in_turn() {
            debug!("tool trace visible, suppressing generic loading line");
            return Applied::Ignored;
        }
        match self.generic_slot() {
            Some(_) if self.slot_streamed => {
                debug!("answer already streaming, ignoring loading line");
                return Applied::Ignored;
            }
            Some(slot) => self.messages[slot].content = content,
            None => self.messages.push(Message::assistant_partial(content)),
        }
        self.stream_in_progress = true;
        Applied::Changed
    }

    fn partial(&mut self, content: String) -> Applied {
        match self.generic_slot() {
            Some(slot) => self.messages[slot].content = content,
            None => self.messages.push(Message::assistant_partial(content)),
        }
        self.slot_streamed = true;
        self.is_loading = false;
        self.stream_in_progress = true;
        Applied::Changed
    }

    fn finalize(&mut self, content: String) {
        match self.generic_slot() {
            Some(slot) => {
                let message = &mut self.messages[slot];
                message.content = content;
                message.is_partial = false;
            }
            None => self.messages.push(Message::assistant_final(content)),
        }
        self.drop_stray_partials();
        self.close_turn();
    }

    /// Put an error in front of the user as the turn's final answer.
    pub fn fail_turn(&mut self, text: impl Into<String>) {
        self.finalize(text.into());
    }

    /// Stop accepting events for the open turn until the cancel is acknowledged.
    pub fn mark_cancelling(&mut self) -> bool {
        if self.phase != TurnPhase::Active {
            return false;
        }
        self.phase = TurnPhase::Cancelling;
        self.last_activity = Instant::now();
        true
    }

    /// Close the open turn locally. A no-op once the turn has finalized.
    pub fn cancel_turn(&mut self) -> bool {
        if !self.has_open_turn() {
            return false;
        }
        if let Some(slot) = self.generic_slot() {
            if self.slot_streamed {
                self.messages[slot].is_partial = false;
            } else {
                self.messages.remove(slot);
            }
        }
        self.drop_stray_partials();
        self.messages.push(Message::system(CANCELLED_TEXT));
        self.close_turn();
        true
    }

    /// Throw away the assistant side of the open turn and wait for a fresh replay.
    pub fn restart_turn(&mut self) -> bool {
        if !self.has_open_turn() {
            return false;
        }
        let start = self.turn_start.min(self.messages.len());
        self.messages.truncate(start);
        self.messages.push(Message::assistant_partial(PLACEHOLDER_TEXT));
        self.slot_streamed = false;
        self.is_loading = true;
        self.stream_in_progress = true;
        self.phase = TurnPhase::Active;
        self.last_activity = Instant::now();
        true
    }

    /// Replace the list with history replayed by the backend.
    pub fn load_history(&mut self, history: Vec<Message>) {
        self.messages = history;
        for message in &mut self.messages {
            message.is_partial = false;
        }
        self.turn_start = self.messages.len();
        self.close_turn();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.turn_start = 0;
        self.close_turn();
    }

    /// Clear progress flags left set after the list already shows a final answer.
    pub fn heal_stuck_flags(&mut self) -> bool {
        if !(self.is_loading || self.stream_in_progress) {
            return false;
        }
        match self.messages.last() {
            Some(last) if last.is_final_answer() => {
                self.close_turn();
                true
            }
            _ => false,
        }
    }

    fn close_turn(&mut self) {
        self.is_loading = false;
        self.stream_in_progress = false;
        self.slot_streamed = false;
        self.phase = TurnPhase::Idle;
    }

    fn drop_stray_partials(&mut self) {
        self.messages.retain(|m| m.is_tool || !m.is_partial);
    }

    fn generic_slot(&self) -> Option<usize> {
        self.messages.iter().rposition(Message::is_generic_slot)
    }

    fn turn_messages(&self) -> impl DoubleEndedIterator<Item = (usize, &Message)> {
        let start = self.turn_start.min(self.messages.len());
        self.messages.iter().enumerate().skip(start)
    }

    fn tool_in_turn(&self) -> bool {
        self.turn_messages().any(|(_, m)| m.is_tool && m.is_partial)
    }

    /// Find the partial tool message a start or completion refers to.
    ///
    /// With a call id the match is exact, except that a start recorded without
    /// one still pairs up. Without a call id the most recent tool of that name
    /// wins, preferring one that is still starting.
    fn correlate(&self, tool_name: &str, call_id: Option<&str>, status: ToolStatus) -> Option<usize> {
        let latest = |pred: &dyn Fn(&Message) -> bool| {
            self.turn_messages()
                .rev()
                .find(|(_, m)| m.is_partial && m.matches_tool(tool_name) && pred(*m))
                .map(|(index, _)| index)
        };
        let untagged_start =
            |m: &Message| m.call_id.is_none() && m.tool_status == Some(ToolStatus::Starting);

        match call_id {
            Some(id) => latest(&|m: &Message| m.call_id.as_deref() == Some(id)).or_else(|| latest(&untagged_start)),
            None => {
                let starting = latest(&|m: &Message| m.tool_status == Some(ToolStatus::Starting));
                match status {
                    ToolStatus::Starting => starting,
                    ToolStatus::Completed => starting.or_else(|| latest(&|_: &Message| true)),
                }
            }
        }
    }
}
