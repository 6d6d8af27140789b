use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use relaygate_sessions::{OutboundDispatcher, SessionRegistry};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry};
use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl From<&relaygate_settings::ServerSettings> for ServerConfig {
    fn from(settings: &relaygate_settings::ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_send_queue: settings.max_send_queue,
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs.max(1)),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub clients: Arc<ClientRegistry>,
    pub prometheus: Option<PrometheusHandle>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/start-session", post(handlers::start_session))
        .route("/api/send-message", post(handlers::send_message))
        .route("/api/close-session", post(handlers::close_session))
        .route("/api/status/{session_id}", get(handlers::session_status))
        .route("/api/qr/{session_id}", get(handlers::session_qr))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<OutboundDispatcher>,
    prometheus: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    let clients = Arc::new(ClientRegistry::new(
        Arc::clone(registry.hub()),
        config.max_send_queue,
    ));
    let cleanup = client::start_cleanup_task(Arc::clone(&clients), config.cleanup_interval);

    let state = AppState {
        registry,
        dispatcher,
        clients,
        prometheus,
    };

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "relaygate server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
        cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait up to `timeout` for in-flight
    /// requests to drain.
    pub async fn shutdown(self, timeout: Duration) {
        self.shutdown.cancel();
        self.cleanup.abort();
        let mut server = self.server;
        if tokio::time::timeout(timeout, &mut server).await.is_err() {
            tracing::warn!(timeout_secs = timeout.as_secs(), "server drain timed out");
            server.abort();
        }
        tracing::info!("relaygate server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.clients.register();
    tracing::info!(client_id = %client_id, "WebSocket client connected");
    client::handle_ws_connection(socket, client_id, rx, state.clients).await;
}
