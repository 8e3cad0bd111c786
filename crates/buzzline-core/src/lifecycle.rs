//! Connection lifecycle: open, token handshake, reassociation, close.

use tracing::{debug, error, info};

use crate::errors::GameError;
use crate::events::{Outbound, ServerEvent, View};
use crate::game::{Game, Phase};
use crate::ids::{ConnectionId, SessionToken};

/// How a connection's handshake was resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// New participant under a default name, with a freshly issued token.
    Fresh { token: SessionToken },
    /// The token's previous identity was re-keyed onto this connection.
    Reconnected { name: String },
    /// The token's identity is still connected elsewhere. This connection
    /// is sent to the join page and has no record until it joins or hosts.
    Rejected { holder: ConnectionId },
}

impl Game {
    /// Register a newly opened transport connection.
    pub fn open(&mut self, id: &ConnectionId) {
        if self.connections.contains_key(id) {
            debug!(connection_id = %id, "connection already open");
            return;
        }
        let _ = self.connections.insert(id.clone(), Phase::AwaitingToken);
        debug!(connection_id = %id, "connection opened");
    }

    /// Resolve the token a connection presented in its first frame.
    pub fn handshake(
        &mut self,
        id: &ConnectionId,
        token: Option<SessionToken>,
    ) -> Result<(Admission, Vec<Outbound>), GameError> {
        match self.connections.get_mut(id) {
            Some(phase) => *phase = Phase::Active,
            None => return Err(GameError::NotOpen(id.clone())),
        }

        if let Some(token) = token {
            if let Some(previous) = self.tokens.lookup(&token).cloned() {
                if self.registry.contains(&previous) && previous != *id {
                    if self.connections.contains_key(&previous) {
                        let err = GameError::StillConnected(previous.clone());
                        error!(
                            connection_id = %id,
                            player = self.registry.name_of(&previous).unwrap_or_default(),
                            error_kind = err.error_kind(),
                            "could not reassociate: {err}"
                        );
                        let mut out = Vec::new();
                        self.direct(&mut out, id, ServerEvent::Redirect { url: View::Join });
                        return Ok((Admission::Rejected { holder: previous }, out));
                    }
                    return Ok(self.reassociate(&token, &previous, id));
                }
                debug!(connection_id = %id, "token has no live record, treating as new client");
            }
        }

        Ok(self.admit_fresh(id))
    }

    fn admit_fresh(&mut self, id: &ConnectionId) -> (Admission, Vec<Outbound>) {
        let token = self.tokens.issue(id);
        let name = self.registry.admit(id).name.clone();
        info!(connection_id = %id, player = %name, "new connection");

        let mut out = Vec::new();
        self.direct(
            &mut out,
            id,
            ServerEvent::SetCookie {
                name: self.config.token_cookie.clone(),
                value: token.to_string(),
                minutes: self.config.token_minutes,
            },
        );
        out.push(Outbound::broadcast(self.presence_event()));
        self.direct(&mut out, id, ServerEvent::Redirect { url: View::Join });
        (Admission::Fresh { token }, out)
    }

    /// Move `previous`'s record, buzz position and host slot onto `id`.
    fn reassociate(
        &mut self,
        token: &SessionToken,
        previous: &ConnectionId,
        id: &ConnectionId,
    ) -> (Admission, Vec<Outbound>) {
        let (name, score) = match self.registry.rekey(previous, id) {
            Some(participant) => (participant.name.clone(), participant.score),
            None => return self.admit_fresh(id),
        };
        self.buzzers.rekey(previous, id);
        self.roles.rekey(previous, id);
        let _ = self.tokens.repoint(token, id);
        info!(connection_id = %id, previous = %previous, player = %name, "reassociated participant");

        let mut out = Vec::new();
        let snapshot = if self.roles.is_host(id) {
            self.roster_event()
        } else {
            ServerEvent::Score {
                player: name.clone(),
                value: score,
            }
        };
        self.direct(&mut out, id, snapshot);
        out.push(Outbound::broadcast(self.presence_event()));
        (Admission::Reconnected { name }, out)
    }

    /// Forget a closed connection. The participant record, score and role
    /// stay behind for a later reconnect.
    pub fn close(&mut self, id: &ConnectionId) -> Vec<Outbound> {
        if self.connections.remove(id).is_none() {
            return Vec::new();
        }
        match self.registry.name_of(id) {
            Some(name) => info!(connection_id = %id, player = name, "disconnected"),
            None => debug!(connection_id = %id, "disconnected without a record"),
        }

        let mut out = Vec::new();
        if self.buzzers.remove(id) {
            out.push(Outbound::broadcast(self.buzz_event()));
        }
        out.push(Outbound::broadcast(self.presence_event()));
        out
    }
}
