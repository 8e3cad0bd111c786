//! `/health` endpoint.

use std::time::Instant;

use buzzline_core::GameStats;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` when the coordinator did not answer.
    pub status: String,
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    pub participants: usize,
    pub players: usize,
    /// Entries in the buzz queue.
    pub buzzed: usize,
    pub has_host: bool,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, stats: &GameStats) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        participants: stats.participants,
        players: stats.players,
        buzzed: stats.buzzed,
        has_host: stats.has_host,
    }
}

/// Response used when game counters are unavailable.
pub fn degraded(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "degraded".into(),
        ..health_check(start_time, connections, &GameStats::default())
    }
}
