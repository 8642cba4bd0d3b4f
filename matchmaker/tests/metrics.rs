use std::time::Duration;

use common_net::{metrics, telemetry};
use reqwest::StatusCode;

#[tokio::test]
async fn metrics_endpoint_contains_matchmaker_counters(
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    telemetry::init("matchmaker-test");
    matchmaker::matchmaking_metrics().on_startup();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        if let Err(err) = metrics::serve_metrics(listener, matchmaker::METRICS_PATH).await {
            panic!("metrics server failed: {err}");
        }
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let resp = client
        .get(format!("http://{}{}", addr, matchmaker::METRICS_PATH))
        .send()
        .await?;
    assert_eq!(StatusCode::OK, resp.status());

    let body = resp.text().await?;
    assert!(body.contains("matchmaker_queue_depth"));
    assert!(body.contains("matchmaker_matches_created_total"));
    assert!(body.contains("matchmaker_active_matches"));

    server.abort();
    Ok(())
}
