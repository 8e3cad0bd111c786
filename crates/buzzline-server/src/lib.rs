pub mod client;
pub mod config;
pub mod coordinator;
pub mod health;
pub mod server;
pub mod shutdown;

pub use config::{ConfigError, ServerConfig};
pub use server::{build_router, start, AppState, ServerHandle};
