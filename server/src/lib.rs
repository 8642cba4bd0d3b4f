use std::{fs, future::Future, path::Path, pin::Pin, sync::Arc};

use common_net::shutdown;
use gateway::session_registry::SessionRegistry;
use gateway::{GatewayConfig, GatewaySettings};
use matchmaker::{MatchmakerConfig, MatchmakerSettings};
use tokio::task::JoinSet;
use tracing::{error, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ServerSettings {
    pub gateway: GatewaySettings,
    pub matchmaker: MatchmakerSettings,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, BoxError> {
        Ok(Self {
            gateway: GatewaySettings::from_env()?,
            matchmaker: MatchmakerSettings::from_env()?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, BoxError> {
        let raw = fs::read_to_string(path).map_err(|err| Box::new(err) as BoxError)?;
        let settings = serde_json::from_str(&raw).map_err(|err| Box::new(err) as BoxError)?;
        Ok(settings)
    }

    pub fn into_config(self) -> ServerConfig {
        ServerConfig::from_settings(self)
    }
}

#[derive(Debug)]
pub struct ServerConfig {
    pub gateway: GatewayConfig,
    pub matchmaker: MatchmakerConfig,
}

impl ServerConfig {
    pub fn from_settings(settings: ServerSettings) -> Self {
        Self {
            gateway: GatewayConfig::from_settings(settings.gateway),
            matchmaker: MatchmakerConfig::from_settings(settings.matchmaker),
        }
    }

    pub fn from_env() -> Result<Self, BoxError> {
        ServerSettings::from_env().map(Self::from_settings)
    }
}

pub async fn run() -> Result<(), BoxError> {
    let config = ServerConfig::from_env()?;
    run_with_ctrl_c(config).await
}

pub async fn run_with_ctrl_c(config: ServerConfig) -> Result<(), BoxError> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let ctrl_c = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "server: failed to listen for ctrl_c");
        }
        shutdown::trigger(&shutdown_tx);
    });

    let result = run_with_shutdown(config, shutdown_rx).await;

    ctrl_c.abort();
    result
}

/// Runs the gateway and matchmaker services in one process, sharing a single
/// `MatchmakingEngine`/`SessionRegistry`/`RankingStore` between them (spec §2.1's single-process
/// deployment) — the gateway's Event Router calls into the engine directly, and the Session
/// Registry (the engine's `EventSink`) delivers match events straight to the owning connection
/// without a network hop.
pub async fn run_with_shutdown(
    config: ServerConfig,
    shutdown_rx: shutdown::ShutdownReceiver,
) -> Result<(), BoxError> {
    let (service_shutdown_tx, service_shutdown_rx) = shutdown::channel();

    let ServerConfig { gateway, matchmaker } = config;

    let registry = Arc::new(SessionRegistry::new());
    let sink: Arc<dyn matchmaker::EventSink> = registry.clone();
    let (engine, ranking_store) = matchmaker::build_engine(&matchmaker, sink).await?;

    let mut join_set: JoinSet<Result<(), BoxError>> = JoinSet::new();

    let gateway_shutdown = service_shutdown_rx.clone();
    let gateway_engine = engine.clone();
    let gateway_ranking_store = ranking_store.clone();
    join_set.spawn(async move {
        gateway::run(
            gateway,
            gateway_engine,
            gateway_ranking_store,
            registry,
            gateway_shutdown,
        )
        .await
    });

    let matchmaker_shutdown = service_shutdown_rx;
    join_set.spawn(async move { matchmaker::run(matchmaker, engine, matchmaker_shutdown).await });

    let mut shutdown_future: Pin<Box<dyn Future<Output = ()> + Send>> =
        Box::pin(shutdown::wait(shutdown_rx));
    let mut service_error: Option<BoxError> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown_future => {
                info!("server: received external shutdown signal");
                shutdown::trigger(&service_shutdown_tx);
                break;
            }
            maybe_task = join_set.join_next() => {
                match maybe_task {
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(err))) => {
                        error!(%err, "server: a service ended with an error");
                        service_error = Some(err);
                        shutdown::trigger(&service_shutdown_tx);
                        break;
                    }
                    Some(Err(join_err)) => {
                        let err: BoxError = Box::new(join_err);
                        error!(%err, "server: join handle failed");
                        service_error = Some(err);
                        shutdown::trigger(&service_shutdown_tx);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    shutdown::trigger(&service_shutdown_tx);

    let drain_result = drain_join_set(&mut join_set).await;

    if let Some(err) = service_error {
        return Err(err);
    }

    drain_result
}

async fn drain_join_set(join_set: &mut JoinSet<Result<(), BoxError>>) -> Result<(), BoxError> {
    let mut first_err: Option<BoxError> = None;

    while let Some(task) = join_set.join_next().await {
        match task {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
            Err(join_err) => {
                if first_err.is_none() {
                    first_err = Some(Box::new(join_err) as BoxError);
                }
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    Ok(())
}
