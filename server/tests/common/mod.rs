use axum::routing::get;
use axum::{Json, Router};
use tokio::task::JoinHandle;

/// A minimal stand-in for a PocketBase instance, just enough to satisfy `ensure_collection`'s
/// reachability probe and `create_record`'s echo-back shape for the `pvp_rankings`/`pvp_matches`
/// collections the matchmaker's Lifecycle Manager touches at boot.
pub async fn spawn_fake_pocketbase() -> (String, JoinHandle<()>) {
    let app = Router::new()
        .route("/api/collections/:collection/records", get(list_records).post(create_record));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake pocketbase listener");
    let addr = listener.local_addr().expect("fake pocketbase local_addr");

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), handle)
}

async fn list_records() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "page": 1, "perPage": 1, "totalItems": 0, "items": [] }))
}

async fn create_record(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    let mut record = body;
    record["id"] = serde_json::json!("fake-record-id");
    record["created"] = serde_json::json!("2026-01-01T00:00:00Z");
    record["updated"] = serde_json::json!("2026-01-01T00:00:00Z");
    Json(record)
}
