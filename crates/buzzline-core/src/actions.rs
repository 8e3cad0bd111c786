//! Inbound client frames.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::GameError;
use crate::ids::SessionToken;

/// One decoded client request.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientAction {
    Join { name: String },
    Host,
    Buzz,
    ClearBuzzers,
    ChangeScore { target: String, delta: i64 },
    KickPlayer { target: String },
    RequestBet { target: String },
    RequestAllBets,
    SubmitBet {
        #[serde(alias = "bet")]
        value: Value,
    },
    RequestAllAnswers,
    SubmitAnswer {
        #[serde(alias = "answer")]
        value: Value,
    },
}

impl ClientAction {
    pub const NAMES: [&'static str; 11] = [
        "join",
        "host",
        "buzz",
        "clearBuzzers",
        "changeScore",
        "kickPlayer",
        "requestBet",
        "requestAllBets",
        "submitBet",
        "requestAllAnswers",
        "submitAnswer",
    ];

    /// Decode a text frame, telling apart malformed JSON, a missing or
    /// unknown action, and a known action with a bad payload.
    pub fn parse(text: &str) -> Result<Self, GameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| GameError::Malformed(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(GameError::Malformed("expected a JSON object".into()));
        };
        let action = match object.get("action") {
            None | Some(Value::Null) => return Err(GameError::MissingAction),
            Some(Value::String(action)) => action.clone(),
            Some(other) => return Err(GameError::UnknownAction(other.to_string())),
        };
        if !Self::NAMES.contains(&action.as_str()) {
            return Err(GameError::UnknownAction(action));
        }
        serde_json::from_value(value).map_err(|e| GameError::InvalidPayload {
            action,
            reason: e.to_string(),
        })
    }

    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Host => "host",
            Self::Buzz => "buzz",
            Self::ClearBuzzers => "clearBuzzers",
            Self::ChangeScore { .. } => "changeScore",
            Self::KickPlayer { .. } => "kickPlayer",
            Self::RequestBet { .. } => "requestBet",
            Self::RequestAllBets => "requestAllBets",
            Self::SubmitBet { .. } => "submitBet",
            Self::RequestAllAnswers => "requestAllAnswers",
            Self::SubmitAnswer { .. } => "submitAnswer",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Handshake {
    token: Value,
}

/// Decode the first frame of a connection.
///
/// `Ok(None)` means the client holds no token. A token that is not a string
/// is treated the same way.
pub fn parse_handshake(text: &str) -> Result<Option<SessionToken>, GameError> {
    let handshake: Handshake =
        serde_json::from_str(text).map_err(|e| GameError::Malformed(e.to_string()))?;
    Ok(handshake.token.as_str().and_then(SessionToken::parse))
}
