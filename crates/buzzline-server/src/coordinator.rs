//! The coordinator task: sole owner of the [`Game`].
//!
//! Every socket task talks to it through one command channel, so opens,
//! frames and closes from all connections are applied one at a time in
//! arrival order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use buzzline_core::{ConnectionId, ErrorCategory, Game, GameError, GameStats, Outbound, Recipient};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn};

use crate::client::ClientRegistry;

pub enum Command {
    Opened { id: ConnectionId },
    Inbound { id: ConnectionId, text: String },
    Closed { id: ConnectionId },
    Stats { reply: oneshot::Sender<GameStats> },
}

pub struct Coordinator {
    game: Game,
    clients: Arc<ClientRegistry>,
}

impl Coordinator {
    pub fn new(game: Game, clients: Arc<ClientRegistry>) -> Self {
        Self { game, clients }
    }

    pub fn spawn(
        self,
        commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(commands, shutdown))
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                () = shutdown.cancelled() => break,
            }
        }
        debug!("coordinator stopped");
    }

    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Opened { id } => self.game.open(&id),
            Command::Inbound { id, text } => self.on_inbound(&id, &text),
            Command::Closed { id } => {
                let events = self.game.close(&id);
                self.deliver(events);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.game.stats());
            }
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    fn on_inbound(&mut self, id: &ConnectionId, text: &str) {
        let span = info_span!("frame", connection_id = %id);
        let _entered = span.enter();

        let game = &mut self.game;
        let result = panic::catch_unwind(AssertUnwindSafe(|| game.handle_text(id, text)))
            .unwrap_or_else(|payload| Err(GameError::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(events) => self.deliver(events),
            Err(err) => self.report(id, err),
        }
    }

    fn report(&mut self, id: &ConnectionId, err: GameError) {
        let player = self.game.registry().name_of(id).unwrap_or_default().to_owned();
        match err.category() {
            ErrorCategory::Protocol => {
                warn!(player = %player, error_kind = err.error_kind(), "dropped message: {err}");
            }
            ErrorCategory::Authorization => {
                warn!(player = %player, error_kind = err.error_kind(), "request denied: {err}");
            }
            ErrorCategory::Lookup => {
                warn!(player = %player, error_kind = err.error_kind(), "lookup failed: {err}");
            }
            ErrorCategory::Fault => {
                error!(player = %player, error_kind = err.error_kind(), "closing connection: {err}");
                let _ = self.clients.disconnect(id);
                let events = self.game.close(id);
                self.deliver(events);
            }
        }
    }

    /// Serialize each event once and hand it to the client queues.
    fn deliver(&self, events: Vec<Outbound>) {
        for Outbound { recipient, event } in events {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(event = event.kind(), error = %e, "failed to encode event");
                    continue;
                }
            };
            match recipient {
                Recipient::All => {
                    let sent = self.clients.broadcast(&text);
                    debug!(event = event.kind(), sent, "broadcast");
                }
                Recipient::Connection(id) => {
                    if !self.clients.send_to(&id, text) {
                        debug!(connection_id = %id, event = event.kind(), "direct send skipped");
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
