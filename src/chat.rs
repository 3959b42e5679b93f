//! The reconciliation loop and the handle the UI talks to.
//!
//! One task owns the [`Conversation`] and the [`TransportSelector`]. UI commands,
//! channel events, fallback progress and watchdog ticks all arrive as messages
//! and are handled one at a time; after each step the loop publishes a fresh
//! [`ChatView`] on a `watch` channel.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::FallbackClient;
use crate::codec::ServerEvent;
use crate::engine::{Applied, Conversation, TurnPhase, Watchdog, WatchdogAction, TIMEOUT_TEXT};
use crate::error::{ChatError, Result};
use crate::models::{ConnectionState, Message, StreamEvent};
use crate::transport::{
    CancelRoute, ChannelEvent, ChannelManager, ChannelSubscription, FallbackEvent, TransportInput,
    TransportSelector,
};

/// Everything a renderer needs, as of the last reconciliation step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub stream_in_progress: bool,
    pub connection_state: ConnectionState,
    pub using_fallback: bool,
}

impl ChatView {
    pub fn turn_open(&self) -> bool {
        self.is_loading || self.stream_in_progress
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    Submit(String),
    Cancel,
    ClearHistory,
    Shutdown,
}

pub struct ChatOptions {
    pub user_id: String,
    pub fallback: FallbackClient,
    /// `None` keeps every turn on the HTTP fallback.
    pub channel: Option<Arc<ChannelManager>>,
    pub watchdog: Watchdog,
}

/// Cheap handle onto a running chat session.
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<UiCommand>,
    view: watch::Receiver<ChatView>,
    task: JoinHandle<()>,
}

impl ChatHandle {
    fn command(&self, command: UiCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ChatError::Other("chat session has stopped".to_string()))
    }

    pub fn submit(&self, text: impl Into<String>) -> Result<()> {
        self.command(UiCommand::Submit(text.into()))
    }

    pub fn cancel(&self) -> Result<()> {
        self.command(UiCommand::Cancel)
    }

    pub fn clear_history(&self) -> Result<()> {
        self.command(UiCommand::ClearHistory)
    }

    pub fn view(&self) -> ChatView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.view.clone()
    }

    /// Stop the loop and release the persistent channel registration.
    pub async fn shutdown(self) {
        let _ = self.commands.send(UiCommand::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "chat session task ended abnormally");
        }
    }
}

pub struct ChatSession;

impl ChatSession {
    /// Start the reconciliation loop. Must be called from within a tokio runtime.
    pub fn spawn(options: ChatOptions) -> ChatHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ChatView::default());

        let subscription = options.channel.as_ref().map(|c| c.register_consumer());
        let selector = TransportSelector::new(
            options.user_id,
            options.channel,
            options.fallback,
            inputs_tx,
        );

        let state = ChatLoop {
            conversation: Conversation::new(),
            selector,
            watchdog: options.watchdog,
            view: view_tx,
        };
        let task = tokio::spawn(state.run(commands_rx, inputs_rx, subscription));

        ChatHandle {
            commands: commands_tx,
            view: view_rx,
            task,
        }
    }
}

struct ChatLoop {
    conversation: Conversation,
    selector: TransportSelector,
    watchdog: Watchdog,
    view: watch::Sender<ChatView>,
}

async fn next_channel_event(subscription: &mut Option<ChannelSubscription>) -> Option<ChannelEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

impl ChatLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<UiCommand>,
        mut inputs: mpsc::UnboundedReceiver<TransportInput>,
        mut subscription: Option<ChannelSubscription>,
    ) {
        let mut ticker = interval(self.watchdog.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.selector.start(!self.conversation.is_empty());
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(UiCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(input) = inputs.recv() => self.on_transport_input(input),
                event = next_channel_event(&mut subscription) => match event {
                    Some(event) => self.on_channel_event(event),
                    None => {
                        warn!("persistent channel subscription closed");
                        subscription = None;
                    }
                },
                _ = ticker.tick() => self.on_tick(),
            }

            if !self.conversation.has_open_turn() && self.selector.has_pending_turn() {
                self.selector.turn_finished();
            }
            self.publish();
        }

        debug!("chat session loop stopped");
    }

    fn publish(&self) {
        let next = ChatView {
            messages: self.conversation.messages().to_vec(),
            is_loading: self.conversation.is_loading(),
            stream_in_progress: self.conversation.stream_in_progress(),
            connection_state: self.selector.connection_state(),
            using_fallback: self.selector.using_fallback(),
        };
        self.view.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }

    fn on_command(&mut self, command: UiCommand) {
        match command {
            UiCommand::Submit(text) => self.submit(text),
            UiCommand::Cancel => self.cancel(),
            UiCommand::ClearHistory => {
                if self.conversation.has_open_turn() {
                    self.cancel();
                    self.selector.turn_finished();
                }
                self.conversation.clear();
                self.selector.clear_history();
            }
            UiCommand::Shutdown => {}
        }
    }

    fn submit(&mut self, text: String) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.conversation.has_open_turn() {
            warn!("a turn is already in progress, ignoring submit");
            return;
        }
        self.conversation.begin_turn(text);
        let route = self.selector.submit(text);
        debug!(?route, "turn submitted");
    }

    fn cancel(&mut self) {
        match self.selector.cancel() {
            CancelRoute::AwaitAck => {
                self.conversation.mark_cancelling();
            }
            CancelRoute::Local | CancelRoute::NoTurn => {
                if self.conversation.cancel_turn() {
                    info!("turn cancelled locally");
                }
            }
        }
    }

    fn apply(&mut self, event: StreamEvent) {
        if self.conversation.apply(event) == Applied::Finalized {
            self.selector.turn_finished();
        }
    }

    fn on_transport_input(&mut self, input: TransportInput) {
        match input {
            TransportInput::Fallback { turn, event } => {
                if !self.selector.accepts_fallback(turn) {
                    debug!(turn, "dropping event from a stale fallback turn");
                    return;
                }
                match event {
                    FallbackEvent::Stream(event) => self.apply(event),
                    FallbackEvent::Finished => {
                        if self.conversation.has_open_turn() {
                            warn!(turn, "fallback body ended without a final answer");
                        }
                    }
                    FallbackEvent::Failed(e) => {
                        if self.conversation.has_open_turn() {
                            self.conversation.fail_turn(failure_text(&e));
                        }
                        self.selector.turn_finished();
                    }
                }
            }
            TransportInput::History(Ok(messages)) => self.load_history(messages),
            TransportInput::History(Err(e)) => warn!(error = %e, "history resync failed"),
            TransportInput::Cleared(Ok(())) => debug!("backend history cleared"),
            TransportInput::Cleared(Err(e)) => warn!(error = %e, "clearing backend history failed"),
        }
    }

    fn load_history(&mut self, messages: Vec<Message>) {
        if !self.conversation.is_empty() || self.conversation.has_open_turn() {
            debug!(count = messages.len(), "conversation already has content, skipping history");
            return;
        }
        info!(count = messages.len(), "history loaded");
        self.conversation.load_history(messages);
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::State(state) => self.on_connection_state(state),
            ChannelEvent::GaveUp => {
                let has_content = !self.conversation.is_empty();
                self.selector.on_channel_gave_up(has_content);
            }
            ChannelEvent::Server(event) => self.on_server_event(event),
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        let has_content = !self.conversation.is_empty();
        let Some(stranded) = self.selector.on_connection_state(state, has_content) else {
            return;
        };
        if self.conversation.phase() == TurnPhase::Cancelling {
            self.conversation.cancel_turn();
            return;
        }
        if self.conversation.restart_turn() {
            info!("replaying the interrupted turn over the HTTP fallback");
            self.selector.start_fallback(&stranded);
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Stream(event) => {
                if self.selector.accepts_persistent_stream() {
                    self.apply(event);
                } else {
                    debug!(kind = event.kind(), "no persistent turn pending, dropping event");
                }
            }
            ServerEvent::StreamCancelled => {
                if !self.selector.accepts_persistent_stream() {
                    debug!("cancel acknowledgement without a persistent turn");
                    return;
                }
                if self.conversation.cancel_turn() {
                    info!("backend acknowledged the cancel");
                }
                self.selector.turn_finished();
            }
            ServerEvent::History(messages) => self.load_history(messages),
            ServerEvent::HistoryCleared => debug!("backend history cleared"),
            ServerEvent::Error { message } => {
                if self.selector.accepts_persistent_stream() && self.conversation.has_open_turn() {
                    self.conversation
                        .fail_turn(failure_text(&ChatError::AgentError(message)));
                    self.selector.turn_finished();
                } else {
                    warn!(%message, "backend reported an error outside a turn");
                }
            }
            ServerEvent::Welcome => debug!("backend greeted the channel"),
            ServerEvent::Pong => debug!("pong"),
        }
    }

    fn on_tick(&mut self) {
        match self.watchdog.check(&mut self.conversation, Instant::now()) {
            WatchdogAction::None => {}
            WatchdogAction::HealedFlags => debug!("watchdog cleared stale progress flags"),
            WatchdogAction::CancelExpired => self.selector.turn_finished(),
            WatchdogAction::TimedOut => {
                info!(error = %ChatError::LocalTimeout, "watchdog closed the turn");
                self.selector.turn_finished();
            }
        }
    }
}

/// The final assistant message shown when a turn fails.
fn failure_text(error: &ChatError) -> String {
    match error {
        ChatError::AgentError(message) => {
            format!("Sorry, there was an error processing your request: {}", message)
        }
        ChatError::LocalTimeout => TIMEOUT_TEXT.to_string(),
        e if e.is_transport() => {
            format!("Sorry, I couldn't reach the assistant. Please try again. ({})", e)
        }
        e => format!("Sorry, I encountered an error: {}", e),
    }
}
