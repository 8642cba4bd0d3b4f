use std::net::SocketAddr;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use once_cell::sync::OnceCell;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Metric set for the matchmaking queue and match coordinator.
pub struct MatchmakingMetrics {
    pub queue_depth: IntGauge,
    pub queue_joins_total: IntCounter,
    pub queue_timeouts_total: IntCounter,
    pub pairoff_failures_total: IntCounter,
    pub matches_created_total: IntCounter,
    pub matches_completed_total: IntCounter,
    pub matches_cancelled_total: IntCounter,
    pub matches_timed_out_total: IntCounter,
    pub active_matches: IntGauge,
}

impl MatchmakingMetrics {
    pub fn on_startup(&self) {
        self.queue_depth.set(0);
        self.queue_joins_total.inc_by(0);
        self.queue_timeouts_total.inc_by(0);
        self.pairoff_failures_total.inc_by(0);
        self.matches_created_total.inc_by(0);
        self.matches_completed_total.inc_by(0);
        self.matches_cancelled_total.inc_by(0);
        self.matches_timed_out_total.inc_by(0);
        self.active_matches.set(0);
    }
}

/// Metric set for the gateway's HTTP and WebSocket surfaces.
pub struct GatewayMetrics {
    pub http_requests_total: IntCounterVec,
    pub ws_connections: IntGauge,
    pub ws_messages_total: IntCounterVec,
}

impl GatewayMetrics {
    pub fn on_startup(&self) {
        self.ws_connections.set(0);
    }
}

static MATCHMAKING_METRICS: OnceCell<MatchmakingMetrics> = OnceCell::new();
static GATEWAY_METRICS: OnceCell<GatewayMetrics> = OnceCell::new();

pub fn matchmaking_metrics() -> &'static MatchmakingMetrics {
    MATCHMAKING_METRICS.get_or_init(|| MatchmakingMetrics {
        queue_depth: register_int_gauge!(
            "matchmaker_queue_depth",
            "Current number of entries waiting in the matchmaking queue"
        )
        .expect("register matchmaker_queue_depth"),
        queue_joins_total: register_int_counter!(
            "matchmaker_queue_joins_total",
            "Total number of successful queue joins"
        )
        .expect("register matchmaker_queue_joins_total"),
        queue_timeouts_total: register_int_counter!(
            "matchmaker_queue_timeouts_total",
            "Total number of queue entries evicted for staleness"
        )
        .expect("register matchmaker_queue_timeouts_total"),
        pairoff_failures_total: register_int_counter!(
            "matchmaker_pairoff_failures_total",
            "Total number of pair-off attempts rolled back due to storage failure"
        )
        .expect("register matchmaker_pairoff_failures_total"),
        matches_created_total: register_int_counter!(
            "matchmaker_matches_created_total",
            "Total number of matches created by pair-off"
        )
        .expect("register matchmaker_matches_created_total"),
        matches_completed_total: register_int_counter!(
            "matchmaker_matches_completed_total",
            "Total number of matches that reached completed status"
        )
        .expect("register matchmaker_matches_completed_total"),
        matches_cancelled_total: register_int_counter!(
            "matchmaker_matches_cancelled_total",
            "Total number of matches cancelled due to dual disconnect"
        )
        .expect("register matchmaker_matches_cancelled_total"),
        matches_timed_out_total: register_int_counter!(
            "matchmaker_matches_timed_out_total",
            "Total number of matches that hit the hard timeout with no Elo applied"
        )
        .expect("register matchmaker_matches_timed_out_total"),
        active_matches: register_int_gauge!(
            "matchmaker_active_matches",
            "Current number of matches in PENDING or ACTIVE state"
        )
        .expect("register matchmaker_active_matches"),
    })
}

pub fn gateway_metrics() -> &'static GatewayMetrics {
    GATEWAY_METRICS.get_or_init(|| GatewayMetrics {
        http_requests_total: register_int_counter_vec!(
            "gateway_http_requests_total",
            "Total number of HTTP requests handled by the gateway",
            &["route", "status"]
        )
        .expect("register gateway_http_requests_total"),
        ws_connections: register_int_gauge!(
            "gateway_ws_connections",
            "Current number of live WebSocket connections"
        )
        .expect("register gateway_ws_connections"),
        ws_messages_total: register_int_counter_vec!(
            "gateway_ws_messages_total",
            "Total number of WebSocket frames processed, by direction",
            &["direction"]
        )
        .expect("register gateway_ws_messages_total"),
    })
}

pub fn metrics_router(metrics_path: &'static str) -> Router {
    Router::new().route(metrics_path, get(metrics_handler))
}

pub async fn serve_metrics(
    listener: TcpListener,
    metrics_path: &'static str,
) -> Result<(), BoxError> {
    let router = metrics_router(metrics_path);
    axum::serve(listener, router)
        .await
        .map_err(|err| Box::new(err) as BoxError)
}

pub fn spawn_metrics_exporter(
    addr: SocketAddr,
    metrics_path: &'static str,
    service_name: &'static str,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(err) = serve_metrics(listener, metrics_path).await {
                    error!(%err, service = service_name, %addr, path = metrics_path, "metrics exporter stopped unexpectedly");
                }
            }
            Err(err) => {
                error!(%err, service = service_name, %addr, path = metrics_path, "metrics exporter failed to bind");
            }
        }
    })
}

async fn metrics_handler() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(%err, "metrics: encode failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let body = match String::from_utf8(buffer) {
        Ok(text) => text,
        Err(err) => {
            error!(%err, "metrics: non-UTF-8 output");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(Body::from(body))
        .unwrap()
}
