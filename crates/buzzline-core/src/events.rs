//! Outbound server events and their addressing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ConnectionId;

/// Client page a `redirect` points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Join,
    Buzzer,
    Host,
}

/// One server-to-client message, tagged by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    SetCookie {
        name: String,
        value: String,
        minutes: u32,
    },
    Redirect {
        url: View,
    },
    /// Presence: connection identity → display name for every live connection
    /// with a record.
    Connection {
        value: BTreeMap<String, String>,
    },
    /// Buzz queue names in arrival order.
    Buzz {
        value: Vec<String>,
    },
    Score {
        player: String,
        value: i64,
    },
    /// Roster: player name → score.
    Player {
        value: BTreeMap<String, i64>,
    },
    RequestBet {
        score: i64,
    },
    SubmitBet {
        player: String,
        value: Value,
    },
    RequestAnswer,
    SubmitAnswer {
        player: String,
        value: Value,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetCookie { .. } => "setCookie",
            Self::Redirect { .. } => "redirect",
            Self::Connection { .. } => "connection",
            Self::Buzz { .. } => "buzz",
            Self::Score { .. } => "score",
            Self::Player { .. } => "player",
            Self::RequestBet { .. } => "requestBet",
            Self::SubmitBet { .. } => "submitBet",
            Self::RequestAnswer => "requestAnswer",
            Self::SubmitAnswer { .. } => "submitAnswer",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Every live connection.
    All,
    Connection(ConnectionId),
}

/// An event plus who should get it.
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub recipient: Recipient,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn broadcast(event: ServerEvent) -> Self {
        Self {
            recipient: Recipient::All,
            event,
        }
    }

    pub fn to(id: &ConnectionId, event: ServerEvent) -> Self {
        Self {
            recipient: Recipient::Connection(id.clone()),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(event: &ServerEvent) -> Value {
        serde_json::to_value(event).unwrap()
    }

    #[test]
    fn cookie_and_redirect_shapes() {
        let cookie = ServerEvent::SetCookie {
            name: "token".into(),
            value: "abc".into(),
            minutes: 240,
        };
        assert_eq!(
            wire(&cookie),
            json!({"type": "setCookie", "name": "token", "value": "abc", "minutes": 240})
        );
        assert_eq!(
            wire(&ServerEvent::Redirect { url: View::Buzzer }),
            json!({"type": "redirect", "url": "buzzer"})
        );
    }

    #[test]
    fn snapshot_shapes() {
        assert_eq!(
            wire(&ServerEvent::Buzz { value: vec!["bob".into(), "carol".into()] }),
            json!({"type": "buzz", "value": ["bob", "carol"]})
        );
        assert_eq!(
            wire(&ServerEvent::Buzz { value: vec![] }),
            json!({"type": "buzz", "value": []})
        );
        let roster = BTreeMap::from([("bob".to_owned(), 200)]);
        assert_eq!(
            wire(&ServerEvent::Player { value: roster }),
            json!({"type": "player", "value": {"bob": 200}})
        );
    }

    #[test]
    fn bet_and_answer_shapes() {
        assert_eq!(
            wire(&ServerEvent::RequestBet { score: 1200 }),
            json!({"type": "requestBet", "score": 1200})
        );
        assert_eq!(wire(&ServerEvent::RequestAnswer), json!({"type": "requestAnswer"}));
        assert_eq!(
            wire(&ServerEvent::SubmitAnswer {
                player: "dave".into(),
                value: json!("who is turing")
            }),
            json!({"type": "submitAnswer", "player": "dave", "value": "who is turing"})
        );
    }

    #[test]
    fn kind_matches_type_tag() {
        let event = ServerEvent::Score { player: "x".into(), value: -5 };
        assert_eq!(wire(&event)["type"], event.kind());
    }

    #[test]
    fn events_decode_from_wire() {
        let parsed: ServerEvent =
            serde_json::from_value(json!({"type": "score", "player": "erin", "value": 3})).unwrap();
        assert_eq!(parsed, ServerEvent::Score { player: "erin".into(), value: 3 });
    }
}
