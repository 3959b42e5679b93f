use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::persistent::ChannelManager;
use crate::api::{decode_body, ChatRequest, FallbackClient};
use crate::codec::ClientCommand;
use crate::error::{ChatError, Result};
use crate::models::{ConnectionState, Message, StreamEvent};

/// Progress of a turn running over the chunked fallback.
#[derive(Debug)]
pub enum FallbackEvent {
    Stream(StreamEvent),
    /// The body ended. The turn may still be open if no final answer came.
    Finished,
    Failed(ChatError),
}

/// Results of background HTTP work, delivered back to the reconciliation loop.
#[derive(Debug)]
pub enum TransportInput {
    Fallback { turn: u64, event: FallbackEvent },
    History(Result<Vec<Message>>),
    Cleared(Result<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Persistent,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRoute {
    /// `cancel_stream` went out; the turn closes on `stream_cancelled`.
    AwaitAck,
    /// Nothing to wait for; close the turn locally.
    Local,
    NoTurn,
}

enum PendingRoute {
    Persistent,
    Fallback { turn: u64, task: JoinHandle<()> },
}

struct PendingTurn {
    message: String,
    route: PendingRoute,
}

/// Decides which transport carries each request and keeps history resync to
/// one request per session.
pub struct TransportSelector {
    user_id: String,
    channel: Option<Arc<ChannelManager>>,
    fallback: FallbackClient,
    connection: ConnectionState,
    using_fallback: bool,
    gave_up: bool,
    pending: Option<PendingTurn>,
    history_requested: bool,
    next_turn: u64,
    inputs: mpsc::UnboundedSender<TransportInput>,
}

impl TransportSelector {
    pub fn new(
        user_id: impl Into<String>,
        channel: Option<Arc<ChannelManager>>,
        fallback: FallbackClient,
        inputs: mpsc::UnboundedSender<TransportInput>,
    ) -> Self {
        let using_fallback = channel.is_none();
        Self {
            user_id: user_id.into(),
            channel,
            fallback,
            connection: ConnectionState::Disconnected,
            using_fallback,
            gave_up: false,
            pending: None,
            history_requested: false,
            next_turn: 1,
            inputs,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn using_fallback(&self) -> bool {
        self.using_fallback
    }

    pub fn has_pending_turn(&self) -> bool {
        self.pending.is_some()
    }

    /// Kick off the history resync when the channel is disabled.
    pub fn start(&mut self, has_content: bool) {
        if self.channel.is_none() && !has_content {
            self.request_history_over_http();
        }
    }

    fn live_channel(&self) -> Option<&Arc<ChannelManager>> {
        match &self.channel {
            Some(channel) if self.connection.is_connected() && !self.gave_up => Some(channel),
            _ => None,
        }
    }

    fn send(&self, command: ClientCommand) -> Result<()> {
        let channel = self
            .live_channel()
            .ok_or_else(|| ChatError::Transport("persistent channel is not connected".into()))?;
        channel.send(&command)
    }

    pub fn submit(&mut self, message: &str) -> Route {
        self.abort_pending();
        let command = ClientCommand::ChatRequest {
            user_id: self.user_id.clone(),
            message: message.to_string(),
        };
        match self.send(command) {
            Ok(()) => {
                debug!("turn sent over the persistent channel");
                self.pending = Some(PendingTurn {
                    message: message.to_string(),
                    route: PendingRoute::Persistent,
                });
                Route::Persistent
            }
            Err(e) => {
                if self.channel.is_some() {
                    debug!(error = %e, "persistent channel unavailable, using fallback");
                }
                self.start_fallback(message);
                Route::Fallback
            }
        }
    }

    /// Run `message` as a one-shot chunked request.
    pub fn start_fallback(&mut self, message: &str) {
        self.abort_pending();
        let turn = self.next_turn;
        self.next_turn += 1;
        self.using_fallback = true;

        let request = ChatRequest {
            user_id: self.user_id.clone(),
            message: message.to_string(),
        };
        let task = tokio::spawn(run_fallback_turn(
            self.fallback.clone(),
            request,
            turn,
            self.inputs.clone(),
        ));
        info!(turn, "turn sent over the HTTP fallback");
        self.pending = Some(PendingTurn {
            message: message.to_string(),
            route: PendingRoute::Fallback { turn, task },
        });
    }

    pub fn cancel(&mut self) -> CancelRoute {
        let Some(pending) = self.pending.take() else {
            return CancelRoute::NoTurn;
        };
        match pending.route {
            PendingRoute::Persistent => {
                let command = ClientCommand::CancelStream {
                    user_id: self.user_id.clone(),
                };
                match self.send(command) {
                    Ok(()) => {
                        self.pending = Some(PendingTurn {
                            message: pending.message,
                            route: PendingRoute::Persistent,
                        });
                        CancelRoute::AwaitAck
                    }
                    Err(e) => {
                        warn!(error = %e, "could not send cancel, closing the turn locally");
                        CancelRoute::Local
                    }
                }
            }
            PendingRoute::Fallback { turn, task } => {
                debug!(turn, "aborting fallback body reader");
                task.abort();
                CancelRoute::Local
            }
        }
    }

    /// The engine closed the turn; forget it and stop any body reader.
    pub fn turn_finished(&mut self) {
        self.abort_pending();
    }

    fn abort_pending(&mut self) {
        if let Some(PendingTurn {
            route: PendingRoute::Fallback { task, .. },
            ..
        }) = self.pending.take()
        {
            task.abort();
        }
    }

    pub fn accepts_fallback(&self, turn: u64) -> bool {
        matches!(
            &self.pending,
            Some(PendingTurn { route: PendingRoute::Fallback { turn: current, .. }, .. }) if *current == turn
        )
    }

    pub fn accepts_persistent_stream(&self) -> bool {
        matches!(
            &self.pending,
            Some(PendingTurn {
                route: PendingRoute::Persistent,
                ..
            })
        )
    }

    /// Track a channel state change.
    ///
    /// Returns the message of a persistent turn stranded by a disconnect. The
    /// caller decides whether to replay it with [`Self::start_fallback`].
    pub fn on_connection_state(&mut self, state: ConnectionState, has_content: bool) -> Option<String> {
        let previous = std::mem::replace(&mut self.connection, state);
        if previous != state {
            debug!(?previous, ?state, "connection state");
        }

        match state {
            ConnectionState::Connected => {
                self.gave_up = false;
                self.using_fallback = self.channel.is_none();
                if !self.history_requested && !has_content {
                    let command = ClientCommand::GetChatHistory {
                        user_id: self.user_id.clone(),
                    };
                    match self.send(command) {
                        Ok(()) => self.history_requested = true,
                        Err(e) => warn!(error = %e, "history resync request failed"),
                    }
                }
                None
            }
            ConnectionState::Disconnected if self.accepts_persistent_stream() => {
                let stranded = self.pending.take().map(|p| p.message);
                info!("persistent channel lost mid-turn");
                stranded
            }
            _ => None,
        }
    }

    pub fn on_channel_gave_up(&mut self, has_content: bool) {
        info!("persistent channel gave up, staying on the HTTP fallback");
        self.gave_up = true;
        self.using_fallback = true;
        if !has_content {
            self.request_history_over_http();
        }
    }

    pub fn request_history_over_http(&mut self) {
        if self.history_requested {
            return;
        }
        self.history_requested = true;
        let client = self.fallback.clone();
        let user_id = self.user_id.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let history = client.fetch_history(&user_id).await;
            let _ = inputs.send(TransportInput::History(history));
        });
    }

    /// Clear the backend's copy of the conversation.
    pub fn clear_history(&mut self) {
        let command = ClientCommand::ClearChatHistory {
            user_id: self.user_id.clone(),
        };
        if let Err(e) = self.send(command) {
            debug!(error = %e, "clearing history over HTTP");
            let client = self.fallback.clone();
            let user_id = self.user_id.clone();
            let inputs = self.inputs.clone();
            tokio::spawn(async move {
                let result = client.clear_history(&user_id).await;
                let _ = inputs.send(TransportInput::Cleared(result));
            });
        }
    }
}

impl Drop for TransportSelector {
    fn drop(&mut self) {
        self.abort_pending();
    }
}

async fn run_fallback_turn(
    client: FallbackClient,
    request: ChatRequest,
    turn: u64,
    inputs: mpsc::UnboundedSender<TransportInput>,
) {
    let event = match stream_fallback_turn(&client, &request, turn, &inputs).await {
        Ok(()) => FallbackEvent::Finished,
        Err(e) => {
            warn!(turn, error = %e, "fallback turn failed");
            FallbackEvent::Failed(e)
        }
    };
    let _ = inputs.send(TransportInput::Fallback { turn, event });
}

async fn stream_fallback_turn(
    client: &FallbackClient,
    request: &ChatRequest,
    turn: u64,
    inputs: &mpsc::UnboundedSender<TransportInput>,
) -> Result<()> {
    let response = client.start_turn(request).await?;
    let body = Box::pin(response.bytes_stream());
    decode_body(body, client.chunk_timeout(), |event| {
        inputs
            .send(TransportInput::Fallback {
                turn,
                event: FallbackEvent::Stream(event),
            })
            .is_ok()
    })
    .await
}
