use std::sync::Arc;

use matchmaker::{sink::EventSink, MatchmakerConfig};

use common_net::{protocol::ServerEvent, telemetry};

/// The standalone matchmaker binary has no live connections to deliver events to; it logs
/// what it would have sent. The composed `server` binary wires a real gateway-backed sink
/// instead (spec §2.1's single-process deployment).
struct LoggingSink;

#[async_trait::async_trait]
impl EventSink for LoggingSink {
    async fn emit_to_user(&self, user_id: &str, event: ServerEvent) {
        tracing::debug!(user_id, ?event, "matchmaker: no gateway attached, dropping event");
    }
}

#[tokio::main]
async fn main() {
    telemetry::init("matchmaker");

    let config = match MatchmakerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "matchmaker: invalid configuration");
            return;
        }
    };

    let sink: Arc<dyn EventSink> = Arc::new(LoggingSink);
    let (engine, _ranking_store) = match matchmaker::build_engine(&config, sink).await {
        Ok(built) => built,
        Err(err) => {
            tracing::error!(%err, "matchmaker: failed to build matchmaking engine");
            return;
        }
    };

    if let Err(err) = matchmaker::run_with_ctrl_c(config, engine).await {
        tracing::error!(%err, "matchmaker ended with an error");
    }
}
