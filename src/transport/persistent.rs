//! The process-wide persistent channel.
//!
//! One WebSocket connection is shared by every consumer. The first
//! `register_consumer` opens it, dropping the last registration closes it, and
//! a single reconnect loop with backoff serves everybody in between.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use crate::codec::{decode_server_frame, ClientCommand, ServerEvent};
use crate::error::{ChatError, Result};
use crate::models::ConnectionState;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub policy: ReconnectPolicy,
    pub heartbeat: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// What consumers hear from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State(ConnectionState),
    Server(ServerEvent),
    /// Reconnect attempts are exhausted; the channel stays down.
    GaveUp,
}

type Outbound = mpsc::UnboundedSender<String>;

struct Shared {
    consumers: Mutex<Vec<(u64, mpsc::UnboundedSender<ChannelEvent>)>>,
    /// Outgoing frames for the live connection, tagged with its generation.
    outbound: Mutex<Option<(u64, Outbound)>>,
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
}

impl Shared {
    fn broadcast(&self, event: ChannelEvent) {
        let mut consumers = self.consumers.lock().unwrap_or_else(PoisonError::into_inner);
        consumers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish_state(&self, generation: u64, state: ConnectionState) {
        if !self.is_current(generation) {
            return;
        }
        if self.state.send_replace(state) != state {
            debug!(?state, "persistent channel state changed");
            self.broadcast(ChannelEvent::State(state));
        }
    }

    fn set_outbound(&self, generation: u64, tx: Option<Outbound>) {
        let mut slot = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match tx {
            Some(tx) => *slot = Some((generation, tx)),
            None => {
                if matches!(slot.as_ref(), Some((owner, _)) if *owner == generation) {
                    *slot = None;
                }
            }
        }
    }
}

pub struct ChannelManager {
    config: ChannelConfig,
    shared: Arc<Shared>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    next_consumer: AtomicU64,
}

static GLOBAL: OnceLock<Arc<ChannelManager>> = OnceLock::new();

impl ChannelManager {
    pub fn new(config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                consumers: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                state,
                generation: AtomicU64::new(0),
            }),
            shutdown: Mutex::new(None),
            next_consumer: AtomicU64::new(1),
        }
    }

    /// The one manager for this process. The first caller's config wins.
    pub fn global(config: ChannelConfig) -> Arc<ChannelManager> {
        let manager = GLOBAL.get_or_init(|| Arc::new(ChannelManager::new(config.clone())));
        if manager.config.url != config.url {
            warn!(
                requested = %config.url,
                active = %manager.config.url,
                "persistent channel already configured, reusing it"
            );
        }
        manager.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn consumer_count(&self) -> usize {
        self.shared
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Join the shared connection, opening it if this is the first consumer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register_consumer(self: &Arc<Self>) -> ChannelSubscription {
        let id = self.next_consumer.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ChannelEvent::State(self.state()));

        let first = {
            let mut consumers = self
                .shared
                .consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            consumers.push((id, tx));
            consumers.len() == 1
        };
        if first {
            self.open();
        }
        debug!(consumer = id, "registered persistent channel consumer");

        ChannelSubscription {
            manager: Arc::clone(self),
            id,
            events: rx,
        }
    }

    fn unregister_consumer(&self, id: u64) {
        let last = {
            let mut consumers = self
                .shared
                .consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            consumers.retain(|(consumer, _)| *consumer != id);
            consumers.is_empty()
        };
        debug!(consumer = id, "unregistered persistent channel consumer");
        if last {
            self.close();
        }
    }

    fn open(&self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if let Some(previous) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(shutdown_tx)
        {
            let _ = previous.send(true);
        }
        info!(url = %self.config.url, "opening persistent channel");
        tokio::spawn(run_connection(
            self.config.clone(),
            Arc::clone(&self.shared),
            generation,
            shutdown_rx,
        ));
    }

    fn close(&self) {
        if let Some(shutdown) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            info!(url = %self.config.url, "closing persistent channel, no consumers left");
            let _ = shutdown.send(true);
        }
    }

    /// Queue a command on the live connection.
    pub fn send(&self, command: &ClientCommand) -> Result<()> {
        let frame = command.encode()?;
        let slot = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (_, tx) = slot
            .as_ref()
            .ok_or_else(|| ChatError::Transport("persistent channel is not connected".into()))?;
        tx.send(frame)
            .map_err(|_| ChatError::Transport("persistent channel closed while sending".into()))?;
        debug!(command = command.name(), "queued channel command");
        Ok(())
    }
}

/// A consumer's registration. Dropping it releases the consumer.
pub struct ChannelSubscription {
    manager: Arc<ChannelManager>,
    id: u64,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelSubscription {
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.manager.unregister_consumer(self.id);
    }
}

enum ConnectionEnd {
    Lost,
    Shutdown,
}

async fn run_connection(
    config: ChannelConfig,
    shared: Arc<Shared>,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() || !shared.is_current(generation) {
            break;
        }
        let next = if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        shared.publish_state(generation, next);

        let connected = tokio::select! {
            result = tokio_tungstenite::connect_async(config.url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((ws, _)) => {
                info!(url = %config.url, "persistent channel connected");
                attempt = 0;
                let end = serve(ws, &config, &shared, generation, &mut shutdown).await;
                shared.set_outbound(generation, None);
                shared.publish_state(generation, ConnectionState::Disconnected);
                if let ConnectionEnd::Shutdown = end {
                    break;
                }
            }
            Err(e) => {
                warn!(url = %config.url, error = %e, "persistent channel connection failed");
            }
        }

        attempt += 1;
        if config.policy.exhausted(attempt) {
            warn!(attempts = attempt - 1, "giving up on the persistent channel");
            shared.publish_state(generation, ConnectionState::Disconnected);
            if shared.is_current(generation) {
                shared.broadcast(ChannelEvent::GaveUp);
            }
            return;
        }

        let delay = config.policy.delay(attempt);
        info!(?delay, attempt, "reconnecting persistent channel");
        shared.publish_state(generation, ConnectionState::Reconnecting);
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.set_outbound(generation, None);
    shared.publish_state(generation, ConnectionState::Disconnected);
}

async fn serve(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &ChannelConfig,
    shared: &Shared,
    generation: u64,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    shared.set_outbound(generation, Some(out_tx));
    shared.publish_state(generation, ConnectionState::Connected);

    let mut heartbeat = interval_at(Instant::now() + config.heartbeat, config.heartbeat);

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => dispatch(shared, &text),
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("persistent channel closed by server");
                    return ConnectionEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "persistent channel read failed");
                    return ConnectionEnd::Lost;
                }
            },
            outgoing = out_rx.recv() => match outgoing {
                Some(frame) => {
                    if let Err(e) = write.send(WsMessage::Text(frame)).await {
                        warn!(error = %e, "persistent channel write failed");
                        return ConnectionEnd::Lost;
                    }
                }
                None => return ConnectionEnd::Lost,
            },
            _ = heartbeat.tick() => {
                let ping = (ClientCommand::Ping {}).encode().unwrap_or_default();
                if let Err(e) = write.send(WsMessage::Text(ping)).await {
                    warn!(error = %e, "persistent channel heartbeat failed");
                    return ConnectionEnd::Lost;
                }
            }
            _ = shutdown.changed() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return ConnectionEnd::Shutdown;
            }
        }
    }
}

fn dispatch(shared: &Shared, text: &str) {
    match decode_server_frame(text) {
        Ok(Some(event)) => shared.broadcast(ChannelEvent::Server(event)),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "dropping malformed channel frame"),
    }
}
