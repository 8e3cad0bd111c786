use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use buzzline_core::Game;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry};
use crate::config::ServerConfig;
use crate::coordinator::{Command, Coordinator};
use crate::health;
use crate::shutdown::ShutdownCoordinator;

const STATS_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientRegistry>,
    pub commands: mpsc::Sender<Command>,
    pub config: Arc<ServerConfig>,
    /// One permit per open socket, taken before the upgrade.
    pub slots: Arc<Semaphore>,
    pub started: Instant,
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and start the coordinator, cleanup and HTTP tasks.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let shutdown = ShutdownCoordinator::new();
    let clients = Arc::new(ClientRegistry::new(config.max_send_queue));

    let (command_tx, command_rx) = mpsc::channel::<Command>(config.command_queue);
    let coordinator = Coordinator::new(Game::new(config.game.clone()), Arc::clone(&clients));
    let coordinator_task = coordinator.spawn(command_rx, shutdown.token());

    let cleanup_task = client::start_cleanup_task(
        Arc::clone(&clients),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        shutdown.token(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    let state = AppState {
        clients,
        commands: command_tx,
        slots: Arc::new(Semaphore::new(config.max_connections)),
        config: Arc::new(config),
        started: Instant::now(),
        shutdown: shutdown.token(),
    };
    let router = build_router(state);

    let serve_token = shutdown.token();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "http server failed");
        }
    });

    tracing::info!(%addr, "buzzline server started");

    Ok(ServerHandle {
        addr,
        shutdown,
        tasks: vec![server_task, coordinator_task, cleanup_task],
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: ShutdownCoordinator,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections, close sockets and wait for every task.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        self.shutdown.graceful_shutdown(self.tasks, timeout).await;
    }
}

/// WebSocket upgrade handler. Refuses upgrades beyond `max_connections`.
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(permit) = Arc::clone(&state.slots).try_acquire_owned() else {
        tracing::warn!(
            max_connections = state.config.max_connections,
            "rejecting websocket: connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };
    match ws {
        Ok(ws) => ws
            .max_message_size(state.config.max_message_size)
            .on_upgrade(move |socket| handle_socket(socket, state, permit))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Runs for the socket's lifetime; the slot frees when `_permit` drops.
async fn handle_socket(socket: WebSocket, state: AppState, _permit: OwnedSemaphorePermit) {
    let close = state.shutdown.child_token();
    let (id, rx) = state.clients.register(close.clone());
    tracing::info!(connection_id = %id, "websocket client connected");

    if state.commands.send(Command::Opened { id: id.clone() }).await.is_err() {
        tracing::warn!(connection_id = %id, "coordinator unavailable, dropping connection");
        state.clients.unregister(&id);
        return;
    }

    client::handle_ws_connection(
        socket,
        id,
        rx,
        close,
        state.clients,
        state.commands,
        state.config.heartbeat_interval(),
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.clients.count();
    let (reply, answer) = oneshot::channel();
    let stats = match state.commands.send(Command::Stats { reply }).await {
        Ok(()) => tokio::time::timeout(STATS_TIMEOUT, answer).await.ok().and_then(Result::ok),
        Err(_) => None,
    };

    match stats {
        Some(stats) => (
            StatusCode::OK,
            Json(health::health_check(state.started, connections, &stats)),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(health::degraded(state.started, connections)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use buzzline_core::GameConfig;
    use tower::ServiceExt;

    fn state(config: ServerConfig) -> (AppState, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(16);
        let state = AppState {
            clients: Arc::new(ClientRegistry::new(config.max_send_queue)),
            commands: tx,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
            started: Instant::now(),
            shutdown: CancellationToken::new(),
        };
        (state, rx)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_game_counters() {
        let (state, rx) = state(ServerConfig::default());
        let coordinator = Coordinator::new(Game::new(GameConfig::default()), Arc::clone(&state.clients));
        let _task = coordinator.spawn(rx, state.shutdown.clone());

        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["has_host"], false);
    }

    #[tokio::test]
    async fn health_degrades_without_coordinator() {
        let (state, rx) = state(ServerConfig::default());
        drop(rx);
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "degraded");
    }

    #[tokio::test]
    async fn ws_refused_at_connection_limit() {
        let (state, _rx) = state(ServerConfig {
            max_connections: 0,
            ..Default::default()
        });
        let response = build_router(state)
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn upgrade_slot_is_reserved_before_registration() {
        let (state, _rx) = state(ServerConfig {
            max_connections: 1,
            ..Default::default()
        });
        // an upgrade in flight holds the only slot before any client registers
        let held = Arc::clone(&state.slots).try_acquire_owned().unwrap();
        assert_eq!(state.clients.count(), 0);

        let router = build_router(state.clone());
        let response = router
            .clone()
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        drop(held);
        let response = router
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.slots.available_permits(), 1);
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_rejected() {
        let (state, _rx) = state(ServerConfig::default());
        let response = build_router(state)
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn start_binds_and_shuts_down() {
        let handle = start(ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(handle.port() > 0);
        handle.shutdown(Some(Duration::from_secs(2))).await;
    }
}
