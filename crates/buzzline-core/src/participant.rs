use serde::{Deserialize, Serialize};

use crate::ids::ConnectionId;

/// What a participant is doing in the game.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Connected and named, but has neither joined nor claimed the host slot.
    #[default]
    Unassigned,
    Player,
    Host,
}

/// A named player or the host. Survives reconnects by being re-keyed to the
/// new connection identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ConnectionId,
    pub name: String,
    pub score: i64,
    pub role: Role,
}

impl Participant {
    pub fn new(id: ConnectionId, name: String) -> Self {
        Self {
            id,
            name,
            score: 0,
            role: Role::Unassigned,
        }
    }

    pub fn is_player(&self) -> bool {
        self.role == Role::Player
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_participant_defaults() {
        let p = Participant::new(ConnectionId::from_raw("conn_1"), "ann".into());
        assert_eq!(p.score, 0);
        assert_eq!(p.role, Role::Unassigned);
        assert!(!p.is_player());
        assert!(!p.is_host());
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Host).unwrap(), "\"host\"");
        assert_eq!(serde_json::to_string(&Role::Unassigned).unwrap(), "\"unassigned\"");
    }
}
