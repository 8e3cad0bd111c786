//! Game state and rules for a live buzzer game: participants, session
//! tokens, the buzz queue, the host slot, and the routing of client actions
//! to outbound events.
//!
//! This crate does no I/O. A caller owns one [`Game`], feeds it connection
//! opens, text frames and closes in order, and delivers the [`Outbound`]
//! events it returns.

pub mod actions;
pub mod buzz;
pub mod errors;
pub mod events;
pub mod game;
pub mod ids;
pub mod lifecycle;
pub mod participant;
pub mod registry;
pub mod roles;
pub mod router;
pub mod tokens;

pub use actions::ClientAction;
pub use errors::{ErrorCategory, GameError};
pub use events::{Outbound, Recipient, ServerEvent, View};
pub use game::{Game, GameConfig, GameStats};
pub use ids::{ConnectionId, SessionToken};
pub use lifecycle::Admission;
pub use participant::{Participant, Role};
