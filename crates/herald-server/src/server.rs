//! `HeraldServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use herald_registry::{Presenter, SessionRegistry};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse, PoolUsage};
use crate::protocol::ProtocolDispatcher;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::CloseReason;
use crate::websocket::manager::ConnectionManager;
use crate::websocket::session::run_ws_session;

/// Server startup failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The bound address could not be read back.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Protocol dispatcher shared by all connections.
    pub dispatcher: Arc<ProtocolDispatcher>,
    /// Live connections.
    pub connections: Arc<ConnectionManager>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Herald server.
pub struct HeraldServer {
    config: Arc<ServerConfig>,
    dispatcher: Arc<ProtocolDispatcher>,
    connections: Arc<ConnectionManager>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl HeraldServer {
    /// Server over `sessions`, presenting through `presenter`.
    pub fn new(
        config: ServerConfig,
        sessions: Arc<SessionRegistry>,
        presenter: Arc<dyn Presenter>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let dispatcher = ProtocolDispatcher::new(sessions, config.session_capacity, presenter);
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            connections: Arc::new(ConnectionManager::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            connections: Arc::clone(&self.connections),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind the listener and serve until shutdown is signalled.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });

        info!(%addr, "listening");
        Ok((addr, handle))
    }

    /// Stop accepting, close every connection, and wait up to `timeout`
    /// for `handles` and all connection sessions to finish.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn shutdown_gracefully(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> bool {
        let closing = self.connections.close_all(&CloseReason::going_away()).await;
        info!(connections = closing, "shutting down");
        self.shutdown.graceful_shutdown(handles, timeout).await
    }

    /// Protocol dispatcher.
    pub fn dispatcher(&self) -> &Arc<ProtocolDispatcher> {
        &self.dispatcher
    }

    /// Live connections.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET / and /ws: upgrade to a notification session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let tracker = state.shutdown.tracker().clone();
    let token = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            tracker.track_future(run_ws_session(
                socket,
                state.dispatcher,
                state.connections,
                state.config,
                token,
            ))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.connections.connection_count().await;
    let notifications = state.dispatcher.sessions().notifications();
    let resp = health::health_check(
        state.start_time,
        connections,
        PoolUsage {
            live: state.dispatcher.open_sessions(),
            capacity: state.dispatcher.session_capacity(),
        },
        PoolUsage {
            live: notifications.len(),
            capacity: notifications.capacity(),
        },
    );
    Json(resp)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
