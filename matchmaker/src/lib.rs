use std::env;
use std::sync::Arc;

use common_net::{
    error::StorageError,
    metrics::{self, MatchmakingMetrics},
    shutdown,
};
use pocketbase::PocketBaseClient;
use tokio::sync::oneshot;
use tracing::{error, info};

pub mod coordinator;
pub mod elo;
pub mod engine;
pub mod queue;
pub mod ranking_store;
pub mod sink;

pub use engine::MatchmakingEngine;
pub use ranking_store::{PocketBaseRankingStore, RankingStore};
pub use sink::EventSink;

pub type BoxError = metrics::BoxError;

const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:3200";
const DEFAULT_POCKETBASE_URL: &str = "http://127.0.0.1:8090";

pub const METRICS_PATH: &str = "/metrics";

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct MatchmakerSettings {
    pub metrics_addr: std::net::SocketAddr,
    pub pocketbase_url: String,
    pub pocketbase_admin_token: Option<String>,
}

impl MatchmakerSettings {
    pub fn from_env() -> Result<Self, BoxError> {
        let metrics_addr = env::var("MATCHMAKER_METRICS_ADDR")
            .unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr
            .parse()
            .map_err(|err| Box::new(err) as BoxError)?;
        let pocketbase_url =
            env::var("POCKETBASE_URL").unwrap_or_else(|_| DEFAULT_POCKETBASE_URL.to_string());
        let pocketbase_admin_token = env::var("POCKETBASE_ADMIN_TOKEN").ok();
        Ok(Self {
            metrics_addr,
            pocketbase_url,
            pocketbase_admin_token,
        })
    }
}

impl Default for MatchmakerSettings {
    fn default() -> Self {
        Self {
            metrics_addr: DEFAULT_METRICS_ADDR
                .parse()
                .expect("default matchmaker metrics addr"),
            pocketbase_url: DEFAULT_POCKETBASE_URL.to_string(),
            pocketbase_admin_token: None,
        }
    }
}

#[derive(Debug)]
pub struct MatchmakerConfig {
    pub metrics_addr: std::net::SocketAddr,
    pub pocketbase_url: String,
    pub pocketbase_admin_token: Option<String>,
    pub ready_tx: Option<oneshot::Sender<std::net::SocketAddr>>,
}

impl MatchmakerConfig {
    pub fn from_settings(settings: MatchmakerSettings) -> Self {
        Self {
            metrics_addr: settings.metrics_addr,
            pocketbase_url: settings.pocketbase_url,
            pocketbase_admin_token: settings.pocketbase_admin_token,
            ready_tx: None,
        }
    }

    pub fn from_env() -> Result<Self, BoxError> {
        MatchmakerSettings::from_env().map(Self::from_settings)
    }
}

pub fn matchmaking_metrics() -> &'static MatchmakingMetrics {
    metrics::matchmaking_metrics()
}

/// Builds the engine and its backing `PocketBaseRankingStore`, probing collection reachability
/// before returning (Lifecycle Manager boot step, spec §4.7). Returns the store alongside the
/// engine since the gateway's REST surface (`GET /pvp/ranking`, `/pvp/leaderboard`, `/pvp/history`)
/// reads directly from it rather than going through the engine.
pub async fn build_engine(
    config: &MatchmakerConfig,
    sink: Arc<dyn EventSink>,
) -> Result<(MatchmakingEngine, Arc<dyn RankingStore>), BoxError> {
    let mut client = PocketBaseClient::new(&config.pocketbase_url);
    if let Some(token) = &config.pocketbase_admin_token {
        client = client.with_admin_token(token.clone());
    }
    let store: Arc<dyn RankingStore> = Arc::new(PocketBaseRankingStore::new(client));
    store
        .ensure_ready()
        .await
        .map_err(|err: StorageError| Box::new(err) as BoxError)?;
    let engine = MatchmakingEngine::new(store.clone(), sink);
    Ok((engine, store))
}

pub async fn run_with_ctrl_c(
    config: MatchmakerConfig,
    engine: MatchmakingEngine,
) -> Result<(), BoxError> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let ctrl_c = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "matchmaker: failed to listen for ctrl_c");
        }
        shutdown::trigger(&shutdown_tx);
    });

    let result = run(config, engine, shutdown_rx).await;

    ctrl_c.abort();
    result
}

/// Runs the matchmaker's ambient stack against an already-built `engine`: the queue-eviction
/// ticker and the metrics-only HTTP sidecar. The engine itself is constructed once (via
/// `build_engine`) and shared with the gateway's Event Router, since both sides mutate the
/// same queue and in-flight match state (spec §2.1, §5).
pub async fn run(
    config: MatchmakerConfig,
    engine: MatchmakingEngine,
    shutdown_rx: shutdown::ShutdownReceiver,
) -> Result<(), BoxError> {
    matchmaking_metrics().on_startup();

    let MatchmakerConfig {
        metrics_addr,
        ready_tx,
        ..
    } = config;

    let listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .map_err(|err| Box::new(err) as BoxError)?;
    let local_addr = listener
        .local_addr()
        .map_err(|err| Box::new(err) as BoxError)?;

    if let Some(tx) = ready_tx {
        let _ = tx.send(local_addr);
    }

    info!(%local_addr, path = METRICS_PATH, "matchmaker metrics exporter listening");

    let metrics_server = tokio::spawn(async move {
        if let Err(err) = metrics::serve_metrics(listener, METRICS_PATH).await {
            error!(%err, "matchmaker metrics exporter stopped unexpectedly");
        }
    });

    let cleanup_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(queue::CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            engine.evict_stale_queue_entries().await;
        }
    });

    shutdown::wait(shutdown_rx).await;

    metrics_server.abort();
    cleanup_task.abort();
    Ok(())
}
