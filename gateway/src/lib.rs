//! Gateway: terminates client WebSocket connections and the REST surface, and dispatches
//! decoded events into the `MatchmakingEngine`. The binary entrypoint lives in `src/main.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use common_net::metrics::{self, GatewayMetrics};
use matchmaker::MatchmakingEngine;

pub mod auth;
pub mod event_router;
pub mod rest;
pub mod session_registry;

use auth::SocketHandshake;
use rest::RestState;
use session_registry::SessionRegistry;

pub type BoxError = metrics::BoxError;

pub const HEALTHZ_PATH: &str = "/healthz";
pub const VERSION_PATH: &str = "/version";
pub const METRICS_PATH: &str = "/metrics";
pub const WS_PATH: &str = "/ws";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct GatewaySettings {
    pub bind_addr: SocketAddr,
    pub frontend_url: String,
}

impl GatewaySettings {
    pub fn from_env() -> Result<Self, BoxError> {
        let bind_addr: SocketAddr = std::env::var("GATEWAY_BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|err| Box::new(err) as BoxError)?;
        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| DEFAULT_FRONTEND_URL.to_string());
        Ok(Self {
            bind_addr,
            frontend_url,
        })
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.parse().expect("default gateway bind addr"),
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub frontend_url: String,
    pub ready_tx: Option<oneshot::Sender<SocketAddr>>,
}

impl GatewayConfig {
    pub fn from_settings(settings: GatewaySettings) -> Self {
        Self {
            bind_addr: settings.bind_addr,
            frontend_url: settings.frontend_url,
            ready_tx: None,
        }
    }

    pub fn from_env() -> Result<Self, BoxError> {
        GatewaySettings::from_env().map(Self::from_settings)
    }
}

#[derive(Clone)]
struct AppState {
    engine: MatchmakingEngine,
    registry: Arc<SessionRegistry>,
}

pub fn build_router(
    engine: MatchmakingEngine,
    ranking_store: Arc<dyn matchmaker::ranking_store::RankingStore>,
    registry: Arc<SessionRegistry>,
    frontend_url: &str,
) -> Router {
    let rest_state = RestState {
        ranking_store,
        engine: engine.clone(),
    };
    let state = AppState { engine, registry };

    let cors = match frontend_url {
        "*" => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
        origin => CorsLayer::new()
            .allow_origin(origin.parse::<axum::http::HeaderValue>().unwrap_or_else(|_| {
                axum::http::HeaderValue::from_static(DEFAULT_FRONTEND_URL)
            }))
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Router::new()
        .route(HEALTHZ_PATH, get(healthz))
        .route(VERSION_PATH, get(version))
        .merge(metrics::metrics_router(METRICS_PATH))
        .merge(rest::router(rest_state))
        .route(WS_PATH, get(ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> impl IntoResponse {
    metrics().http_requests_total.with_label_values(&[HEALTHZ_PATH, "200"]).inc();
    axum::http::StatusCode::OK
}

async fn version() -> impl IntoResponse {
    metrics().http_requests_total.with_label_values(&[VERSION_PATH, "200"]).inc();
    Json(serde_json::json!({
        "name": "gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn metrics() -> &'static GatewayMetrics {
    metrics::gateway_metrics()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(handshake): Query<SocketHandshake>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_session(socket, handshake, state))
}

async fn ws_session(mut socket: WebSocket, handshake: SocketHandshake, state: AppState) {
    let user_id = handshake.user_id;
    let username = handshake.resolved_username();
    let (sender, mut outbound) = state.registry.bind(&user_id);
    metrics().ws_connections.inc();
    info!(user_id, "ws: connection established");

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(event) = outgoing else { break };
                match event.encode() {
                    Ok(text) => {
                        metrics().ws_messages_total.with_label_values(&["out"]).inc();
                        if socket.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => error!(%err, user_id, "failed to encode outbound event"),
                }
            }
            incoming = socket.recv() => {
                let Some(msg) = incoming else { break };
                match msg {
                    Ok(WsMessage::Text(raw)) => {
                        metrics().ws_messages_total.with_label_values(&["in"]).inc();
                        if let Some(reply) = event_router::route_inbound(&state.engine, &user_id, &username, &raw).await {
                            if let Ok(text) = reply.encode() {
                                let _ = socket.send(WsMessage::Text(text)).await;
                            }
                        }
                    }
                    Ok(WsMessage::Ping(payload)) => {
                        let _ = socket.send(WsMessage::Pong(payload)).await;
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.registry.unbind(&user_id, &sender);
    state.engine.handle_disconnect(&user_id).await;
    metrics().ws_connections.dec();
    debug!(user_id, "ws: connection closed");
}

pub async fn run(
    config: GatewayConfig,
    engine: MatchmakingEngine,
    ranking_store: Arc<dyn matchmaker::ranking_store::RankingStore>,
    registry: Arc<SessionRegistry>,
    shutdown_rx: common_net::shutdown::ShutdownReceiver,
) -> Result<(), BoxError> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|err| Box::new(err) as BoxError)?;
    let local_addr = listener.local_addr().map_err(|err| Box::new(err) as BoxError)?;
    if let Some(tx) = config.ready_tx {
        let _ = tx.send(local_addr);
    }

    let app = build_router(engine, ranking_store, registry, &config.frontend_url);
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app.into_make_service()).await {
            error!(%err, "gateway server stopped unexpectedly");
        }
    });

    common_net::shutdown::wait(shutdown_rx).await;
    server.abort();
    Ok(())
}
