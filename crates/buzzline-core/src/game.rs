//! The single owner of all game state.
//!
//! Nothing here is shared: whoever holds the `Game` serializes every open,
//! frame and close through `&mut self`, which is what keeps buzz ordering and
//! name uniqueness intact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::actions::{parse_handshake, ClientAction};
use crate::buzz::BuzzQueue;
use crate::errors::GameError;
use crate::events::{Outbound, ServerEvent};
use crate::ids::ConnectionId;
use crate::registry::IdentityRegistry;
use crate::roles::RoleArbiter;
use crate::tokens::SessionTokenStore;

/// Game rules that are configurable without code changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Name given to every participant before they join.
    pub default_name: String,
    /// Cookie the browser stores its session token under.
    pub token_cookie: String,
    /// Lifetime of a freshly issued token cookie.
    pub token_minutes: u32,
    /// Lifetime of the placeholder cookie written over a kicked player's token.
    pub kicked_cookie_minutes: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            default_name: "Unnamed player".into(),
            token_cookie: "token".into(),
            token_minutes: 240,
            kicked_cookie_minutes: 1,
        }
    }
}

/// Where a live connection is in its handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    AwaitingToken,
    Active,
}

/// Point-in-time counters for health reporting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GameStats {
    pub connections: usize,
    pub participants: usize,
    pub players: usize,
    pub buzzed: usize,
    pub has_host: bool,
    pub tokens: usize,
}

#[derive(Debug)]
pub struct Game {
    pub(crate) config: GameConfig,
    pub(crate) registry: IdentityRegistry,
    pub(crate) tokens: SessionTokenStore,
    pub(crate) buzzers: BuzzQueue,
    pub(crate) roles: RoleArbiter,
    pub(crate) connections: BTreeMap<ConnectionId, Phase>,
}

impl Game {
    pub fn new(config: GameConfig) -> Self {
        Self {
            registry: IdentityRegistry::new(config.default_name.clone()),
            tokens: SessionTokenStore::new(),
            buzzers: BuzzQueue::new(),
            roles: RoleArbiter::new(),
            connections: BTreeMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn host(&self) -> Option<&ConnectionId> {
        self.roles.host()
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn buzz_order(&self) -> Vec<String> {
        self.buzzers.snapshot(&self.registry)
    }

    pub fn stats(&self) -> GameStats {
        GameStats {
            connections: self.connections.len(),
            participants: self.registry.len(),
            players: self.registry.players().count(),
            buzzed: self.buzzers.len(),
            has_host: self.roles.host().is_some(),
            tokens: self.tokens.len(),
        }
    }

    /// Handle one text frame from `id`.
    ///
    /// The first frame of a connection is its token handshake. A first frame
    /// that is not a handshake is treated as coming from a client without a
    /// token.
    pub fn handle_text(
        &mut self,
        id: &ConnectionId,
        text: &str,
    ) -> Result<Vec<Outbound>, GameError> {
        match self.connections.get(id) {
            None => Err(GameError::NotOpen(id.clone())),
            Some(Phase::AwaitingToken) => {
                let token = parse_handshake(text).unwrap_or_else(|err| {
                    warn!(connection_id = %id, error = %err, "bad handshake, treating as new client");
                    None
                });
                let (_, events) = self.handshake(id, token)?;
                Ok(events)
            }
            Some(Phase::Active) => {
                let action = ClientAction::parse(text)?;
                self.dispatch(id, action)
            }
        }
    }

    pub(crate) fn roster_event(&self) -> ServerEvent {
        ServerEvent::Player {
            value: self.registry.roster(),
        }
    }

    pub(crate) fn buzz_event(&self) -> ServerEvent {
        ServerEvent::Buzz {
            value: self.buzz_order(),
        }
    }

    pub(crate) fn presence_event(&self) -> ServerEvent {
        let value = self
            .connections
            .keys()
            .filter_map(|id| {
                self.registry
                    .name_of(id)
                    .map(|name| (id.to_string(), name.to_owned()))
            })
            .collect();
        ServerEvent::Connection { value }
    }

    /// Queue a direct send, skipping identities with no live connection.
    pub(crate) fn direct(&self, out: &mut Vec<Outbound>, id: &ConnectionId, event: ServerEvent) {
        if self.connections.contains_key(id) {
            out.push(Outbound::to(id, event));
        } else {
            debug!(connection_id = %id, event = event.kind(), "recipient not connected, skipping");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{Recipient, View};
    use serde_json::json;

    /// Open a connection and complete its handshake with `token`.
    pub(crate) fn connect(game: &mut Game, token: &str) -> (ConnectionId, Vec<Outbound>) {
        let id = ConnectionId::new();
        game.open(&id);
        let events = game
            .handle_text(&id, &json!({ "token": token }).to_string())
            .unwrap();
        (id, events)
    }

    pub(crate) fn send(game: &mut Game, id: &ConnectionId, frame: serde_json::Value) -> Vec<Outbound> {
        game.handle_text(id, &frame.to_string()).unwrap()
    }

    pub(crate) fn issued_token(events: &[Outbound]) -> String {
        events
            .iter()
            .find_map(|o| match &o.event {
                ServerEvent::SetCookie { value, .. } => Some(value.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn config_defaults() {
        let config = GameConfig::default();
        assert_eq!(config.default_name, "Unnamed player");
        assert_eq!(config.token_cookie, "token");
        assert_eq!(config.token_minutes, 240);
        assert_eq!(config.kicked_cookie_minutes, 1);
    }

    #[test]
    fn config_partial_json_uses_defaults() {
        let config: GameConfig =
            serde_json::from_str(r#"{"default_name":"Mystery guest"}"#).unwrap();
        assert_eq!(config.default_name, "Mystery guest");
        assert_eq!(config.token_minutes, 240);
    }

    #[test]
    fn frames_from_unknown_connections_fault() {
        let mut game = Game::new(GameConfig::default());
        let err = game
            .handle_text(&ConnectionId::from_raw("conn_gone"), r#"{"action":"buzz"}"#)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn first_frame_without_token_is_a_fresh_client() {
        let mut game = Game::new(GameConfig::default());
        let id = ConnectionId::new();
        game.open(&id);
        let events = game.handle_text(&id, r#"{"action":"buzz"}"#).unwrap();
        assert!(matches!(events[0].event, ServerEvent::SetCookie { .. }));
        assert_eq!(game.registry().name_of(&id), Some("Unnamed player"));
    }

    #[test]
    fn protocol_errors_leave_state_alone() {
        let mut game = Game::new(GameConfig::default());
        let (id, _) = connect(&mut game, "token not set");
        assert!(game.handle_text(&id, "not json").is_err());
        assert!(game.handle_text(&id, r#"{"action":"moonwalk"}"#).is_err());
        assert!(game.is_connected(&id));
        assert_eq!(game.stats().participants, 1);
    }

    /// Default name shows up in presence, then a case-insensitive
    /// collision resolves to a suffixed name.
    #[test]
    fn default_name_then_collision_suffix() {
        let mut game = Game::new(GameConfig::default());
        let (a, events) = connect(&mut game, "token not set");
        assert!(matches!(events[0].event, ServerEvent::SetCookie { .. }));
        let presence = events
            .iter()
            .find_map(|o| match (&o.recipient, &o.event) {
                (Recipient::All, ServerEvent::Connection { value }) => Some(value.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(presence.get(a.as_str()).map(String::as_str), Some("Unnamed player"));

        let (b, _) = connect(&mut game, "token not set");
        let _ = send(&mut game, &b, json!({"action": "join", "name": "Alice"}));
        let events = send(&mut game, &a, json!({"action": "join", "name": "alice"}));

        assert_eq!(game.registry().name_of(&a), Some("alice 2"));
        let roster = events
            .iter()
            .find_map(|o| match &o.event {
                ServerEvent::Player { value } => Some(value.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            roster,
            BTreeMap::from([("alice".to_owned(), 0), ("alice 2".to_owned(), 0)])
        );
        assert!(events.contains(&Outbound::to(&a, ServerEvent::Redirect { url: View::Buzzer })));
    }

    #[test]
    fn stats_track_state() {
        let mut game = Game::new(GameConfig::default());
        let (host, _) = connect(&mut game, "");
        let (p, _) = connect(&mut game, "");
        let _ = send(&mut game, &host, json!({"action": "host"}));
        let _ = send(&mut game, &p, json!({"action": "join", "name": "bob"}));
        let _ = send(&mut game, &p, json!({"action": "buzz"}));
        assert_eq!(
            game.stats(),
            GameStats {
                connections: 2,
                participants: 2,
                players: 1,
                buzzed: 1,
                has_host: true,
                tokens: 2,
            }
        );
    }
}
