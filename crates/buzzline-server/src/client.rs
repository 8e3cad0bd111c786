use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use buzzline_core::ConnectionId;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Command;

/// A connected WebSocket client.
pub struct Client {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    close: CancellationToken,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>, close: CancellationToken) -> Self {
        Self {
            id,
            tx,
            close,
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    /// Queue `message` without waiting. A full or closed queue drops it.
    fn try_send(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %self.id, "send queue closed");
                false
            }
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Client>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client. `close` ends its socket tasks when cancelled.
    pub fn register(&self, close: CancellationToken) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Client::new(id.clone(), tx, close));
        (id, rx)
    }

    pub fn unregister(&self, id: &ConnectionId) {
        let _ = self.clients.remove(id);
    }

    /// Ask a client's socket tasks to stop. Cleanup happens when they exit.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        match self.clients.get(id) {
            Some(client) => {
                client.close.cancel();
                true
            }
            None => false,
        }
    }

    /// Send a message to a specific client.
    pub fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        match self.clients.get(id) {
            Some(client) => client.try_send(message),
            None => false,
        }
    }

    /// Send a message to every client. Returns how many accepted it.
    pub fn broadcast(&self, message: &str) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.value().try_send(message.to_owned()))
            .count()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(client) = self.clients.get(id) {
            client.record_pong();
        }
    }

    /// Close clients that haven't answered a ping within `timeout`.
    pub fn cleanup_dead_clients(&self, timeout: Duration) -> usize {
        let dead: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            let _ = self.disconnect(id);
            tracing::info!(connection_id = %id, "closing unresponsive client");
        }
        dead.len()
    }
}

/// Drive one WebSocket: a writer draining the client's queue plus pings, and
/// a reader forwarding text frames to the coordinator. Reports `Closed` when
/// either side ends.
pub async fn handle_ws_connection(
    socket: WebSocket,
    id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    close: CancellationToken,
    registry: Arc<ClientRegistry>,
    commands: mpsc::Sender<Command>,
    heartbeat_interval: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = id.clone();
    let writer_close = close.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_id, "sent ping");
                }
                () = writer_close.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_id = id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader_commands = commands.clone();
    let reader_close = close.clone();
    let reader = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = ws_rx.next() => msg,
                () = reader_close.cancelled() => break,
            };
            match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let command = Command::Inbound {
                        id: reader_id.clone(),
                        text: text.to_string(),
                    };
                    if reader_commands.send(command).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Pong(_))) => reader_registry.record_pong(&reader_id),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %reader_id, error = %e, "websocket read error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }
    close.cancel();

    registry.unregister(&id);
    if commands.send(Command::Closed { id: id.clone() }).await.is_err() {
        tracing::debug!(connection_id = %id, "coordinator gone, close not reported");
    }
    tracing::info!(connection_id = %id, "websocket client disconnected");
}

/// Start a background task that periodically closes dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_clients(timeout);
                    if removed > 0 {
                        tracing::info!(removed, "dead client cleanup");
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    })
}
