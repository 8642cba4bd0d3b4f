use std::sync::Arc;

use common_net::{shutdown, telemetry};
use gateway::session_registry::SessionRegistry;
use gateway::{GatewayConfig, GatewaySettings};
use matchmaker::sink::EventSink;
use matchmaker::{MatchmakerConfig, MatchmakerSettings};
use tracing::error;

#[tokio::main]
async fn main() {
    telemetry::init("gateway");

    let gateway_settings = match GatewaySettings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "gateway: invalid configuration");
            return;
        }
    };
    let matchmaker_settings = match MatchmakerSettings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "gateway: invalid matchmaker configuration");
            return;
        }
    };

    let registry = Arc::new(SessionRegistry::new());
    let sink: Arc<dyn EventSink> = registry.clone();

    let matchmaker_config = MatchmakerConfig::from_settings(matchmaker_settings);
    let (engine, ranking_store) = match matchmaker::build_engine(&matchmaker_config, sink).await {
        Ok(built) => built,
        Err(err) => {
            error!(%err, "gateway: failed to build matchmaking engine");
            return;
        }
    };

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let ctrl_c = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "gateway: failed to listen for ctrl_c");
        }
        shutdown::trigger(&shutdown_tx);
    });

    let gateway_config = GatewayConfig::from_settings(gateway_settings);
    let matchmaker_run = matchmaker::run(matchmaker_config, engine.clone(), shutdown_rx.clone());
    let gateway_run = gateway::run(gateway_config, engine, ranking_store, registry, shutdown_rx);

    let (gateway_result, matchmaker_result) = tokio::join!(gateway_run, matchmaker_run);
    if let Err(err) = gateway_result {
        error!(%err, "gateway server ended with an error");
    }
    if let Err(err) = matchmaker_result {
        error!(%err, "matchmaker ended with an error");
    }

    ctrl_c.abort();
}
