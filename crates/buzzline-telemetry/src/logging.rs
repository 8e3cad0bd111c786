//! Incident log: warnings and errors raised while running a game, kept in
//! SQLite so the host can see afterwards which players caused trouble.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS incidents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        logged_at TEXT NOT NULL,
        level TEXT NOT NULL,
        error_kind TEXT,
        connection_id TEXT,
        player TEXT,
        message TEXT NOT NULL,
        extra TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_incidents_player ON incidents(player);
    CREATE INDEX IF NOT EXISTS idx_incidents_kind ON incidents(error_kind);
";

/// One persisted warning or error.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub logged_at: String,
    pub level: String,
    pub error_kind: Option<String>,
    pub connection_id: Option<String>,
    pub player: Option<String>,
    pub message: String,
    /// Remaining event fields as a JSON object.
    pub extra: Option<String>,
}

/// Filter for [`SqliteLogSink::query`]. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub player: Option<String>,
    pub connection_id: Option<String>,
    pub error_kind: Option<String>,
    /// Defaults to 100. Newest records come first.
    pub limit: Option<u32>,
}

/// Per-player incident totals, worst offenders first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayerIncidents {
    pub player: String,
    pub warnings: u32,
    pub errors: u32,
    pub last_kind: Option<String>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn record(&self, incident: &Incident) {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO incidents
                 (logged_at, level, error_kind, connection_id, player, message, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Utc::now().to_rfc3339(),
                incident.level.as_str(),
                incident.error_kind,
                incident.connection_id,
                incident.player,
                incident.message,
                incident.extra,
            ],
        );
        if let Err(e) = result {
            // tracing here would re-enter this layer
            eprintln!("buzzline-telemetry: dropped incident: {e}");
        }
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, logged_at, level, error_kind, connection_id, player, message, extra
             FROM incidents
             WHERE (?1 IS NULL OR player = ?1)
               AND (?2 IS NULL OR connection_id = ?2)
               AND (?3 IS NULL OR error_kind = ?3)
             ORDER BY id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![q.player, q.connection_id, q.error_kind, q.limit.unwrap_or(100)],
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    logged_at: row.get(1)?,
                    level: row.get(2)?,
                    error_kind: row.get(3)?,
                    connection_id: row.get(4)?,
                    player: row.get(5)?,
                    message: row.get(6)?,
                    extra: row.get(7)?,
                })
            },
        )?;
        rows.collect()
    }

    /// Warning and error counts for every named player.
    pub fn incidents_by_player(&self) -> Result<Vec<PlayerIncidents>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT player,
                    SUM(CASE WHEN level = 'WARN' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN level = 'ERROR' THEN 1 ELSE 0 END)
             FROM incidents
             WHERE player IS NOT NULL AND player != ''
             GROUP BY player
             ORDER BY COUNT(*) DESC, player ASC",
        )?;
        let totals = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?, row.get::<_, u32>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut last = conn.prepare(
            "SELECT error_kind FROM incidents WHERE player = ?1 ORDER BY id DESC LIMIT 1",
        )?;
        totals
            .into_iter()
            .map(|(player, warnings, errors)| {
                let last_kind = last
                    .query_row([&player], |row| row.get::<_, Option<String>>(0))
                    .optional()?
                    .flatten();
                Ok(PlayerIncidents {
                    player,
                    warnings,
                    errors,
                    last_kind,
                })
            })
            .collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))
    }
}

struct Incident {
    level: Level,
    error_kind: Option<String>,
    connection_id: Option<String>,
    player: Option<String>,
    message: String,
    extra: Option<String>,
}

/// Event and span fields split into the columns the sink indexes.
#[derive(Default)]
struct Capture {
    message: Option<String>,
    error_kind: Option<String>,
    connection_id: Option<String>,
    player: Option<String>,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Capture {
    fn put(&mut self, name: &str, value: serde_json::Value) {
        match name {
            "message" => self.message = Some(as_text(&value)),
            "error_kind" => self.error_kind = Some(as_text(&value)),
            "connection_id" => self.connection_id = Some(as_text(&value)),
            // an empty player field means "no record yet"
            "player" => self.player = Some(as_text(&value)).filter(|p| !p.is_empty()),
            _ => {
                let _ = self.extra.insert(name.to_owned(), value);
            }
        }
    }

    /// Fill identity fields this event left unset from an enclosing span.
    fn inherit(&mut self, from: &SpanIdentity) {
        if self.connection_id.is_none() {
            self.connection_id.clone_from(&from.connection_id);
        }
        if self.player.is_none() {
            self.player.clone_from(&from.player);
        }
    }
}

impl Visit for Capture {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field.name(), serde_json::Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), value.into());
    }
}

fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Identity fields carried by a span, e.g. the coordinator's `frame` span.
struct SpanIdentity {
    connection_id: Option<String>,
    player: Option<String>,
}

/// Layer that records WARN and ERROR events as incidents.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut capture = Capture::default();
        attrs.record(&mut capture);
        if capture.connection_id.is_none() && capture.player.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanIdentity {
                connection_id: capture.connection_id,
                player: capture.player,
            });
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut capture = Capture::default();
        event.record(&mut capture);
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(identity) = span.extensions().get::<SpanIdentity>() {
                    capture.inherit(identity);
                }
            }
        }

        let extra = (!capture.extra.is_empty())
            .then(|| serde_json::Value::Object(capture.extra).to_string());
        self.sink.record(&Incident {
            level,
            error_kind: capture.error_kind,
            connection_id: capture.connection_id,
            player: capture.player,
            message: capture.message.unwrap_or_default(),
            extra,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tracing_subscriber::layer::SubscriberExt;

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("buzzline-incidents-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("incidents.db")
    }

    fn incident(level: Level, player: Option<&str>, kind: &str) -> Incident {
        Incident {
            level,
            error_kind: Some(kind.into()),
            connection_id: Some("conn_1".into()),
            player: player.map(Into::into),
            message: format!("{kind} happened"),
            extra: None,
        }
    }

    /// Run `f` with only the incident layer installed.
    fn with_layer(sink: &Arc<SqliteLogSink>, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn query_filters_by_player_and_kind() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        sink.record(&incident(Level::WARN, Some("bob"), "unauthorized"));
        sink.record(&incident(Level::WARN, Some("bob"), "unknown_target"));
        sink.record(&incident(Level::WARN, Some("carol"), "unauthorized"));
        assert_eq!(sink.count().unwrap(), 3);

        let bob = sink
            .query(&LogQuery {
                player: Some("bob".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(bob.len(), 2);
        assert_eq!(bob[0].error_kind.as_deref(), Some("unknown_target"));

        let denied = sink
            .query(&LogQuery {
                error_kind: Some("unauthorized".into()),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].player.as_deref(), Some("carol"));
    }

    #[test]
    fn incidents_grouped_per_player() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        sink.record(&incident(Level::WARN, Some("carol"), "malformed"));
        sink.record(&incident(Level::WARN, Some("bob"), "unauthorized"));
        sink.record(&incident(Level::ERROR, Some("bob"), "panicked"));
        sink.record(&incident(Level::WARN, None, "malformed"));

        let summary = sink.incidents_by_player().unwrap();
        assert_eq!(
            summary,
            vec![
                PlayerIncidents {
                    player: "bob".into(),
                    warnings: 1,
                    errors: 1,
                    last_kind: Some("panicked".into()),
                },
                PlayerIncidents {
                    player: "carol".into(),
                    warnings: 1,
                    errors: 0,
                    last_kind: Some("malformed".into()),
                },
            ]
        );
    }

    #[test]
    fn layer_records_warnings_with_frame_identity() {
        let sink = Arc::new(SqliteLogSink::new(&temp_db()).unwrap());
        with_layer(&sink, || {
            let span = tracing::info_span!("frame", connection_id = "conn_xyz");
            let _entered = span.enter();
            tracing::info!("routine");
            tracing::warn!(player = "dave", error_kind = "unknown_target", delta = 5, "lookup failed");
        });

        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, "WARN");
        assert_eq!(record.message, "lookup failed");
        assert_eq!(record.error_kind.as_deref(), Some("unknown_target"));
        assert_eq!(record.connection_id.as_deref(), Some("conn_xyz"));
        assert_eq!(record.player.as_deref(), Some("dave"));
        assert_eq!(record.extra.as_deref(), Some(r#"{"delta":5}"#));
    }

    #[test]
    fn blank_player_is_not_attributed() {
        let sink = Arc::new(SqliteLogSink::new(&temp_db()).unwrap());
        with_layer(&sink, || {
            tracing::error!(player = "", error_kind = "not_open", "closing connection");
        });
        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records[0].level, "ERROR");
        assert!(records[0].player.is_none());
        assert!(sink.incidents_by_player().unwrap().is_empty());
    }
}
