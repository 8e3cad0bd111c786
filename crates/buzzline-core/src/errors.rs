use crate::ids::ConnectionId;

/// Everything that can go wrong while handling one inbound frame.
///
/// Only `Fault` errors affect the connection; everything else is logged and
/// the frame is dropped without telling the client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    // Protocol
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has no action field")]
    MissingAction,
    #[error("unsupported action: {0}")]
    UnknownAction(String),
    #[error("invalid {action} payload: {reason}")]
    InvalidPayload { action: String, reason: String },

    // Authorization
    #[error("{action} denied: {reason}")]
    Unauthorized {
        action: &'static str,
        reason: &'static str,
    },

    // Lookup
    #[error("no participant named {0:?}")]
    UnknownTarget(String),
    #[error("{0:?} is not a player")]
    NotAPlayer(String),
    #[error("no participant record for {0}")]
    UnknownParticipant(ConnectionId),
    #[error("{0} is still connected elsewhere")]
    StillConnected(ConnectionId),

    // Fault
    #[error("connection {0} is not open")]
    NotOpen(ConnectionId),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Coarse grouping used to decide how a failure is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Protocol,
    Authorization,
    Lookup,
    Fault,
}

impl GameError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Malformed(_)
            | Self::MissingAction
            | Self::UnknownAction(_)
            | Self::InvalidPayload { .. } => ErrorCategory::Protocol,
            Self::Unauthorized { .. } => ErrorCategory::Authorization,
            Self::UnknownTarget(_)
            | Self::NotAPlayer(_)
            | Self::UnknownParticipant(_)
            | Self::StillConnected(_) => ErrorCategory::Lookup,
            Self::NotOpen(_) | Self::Panicked(_) => ErrorCategory::Fault,
        }
    }

    /// Faults end the offending connection.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fault
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingAction => "missing_action",
            Self::UnknownAction(_) => "unknown_action",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::Unauthorized { .. } => "unauthorized",
            Self::UnknownTarget(_) => "unknown_target",
            Self::NotAPlayer(_) => "not_a_player",
            Self::UnknownParticipant(_) => "unknown_participant",
            Self::StillConnected(_) => "still_connected",
            Self::NotOpen(_) => "not_open",
            Self::Panicked(_) => "panicked",
        }
    }
}
