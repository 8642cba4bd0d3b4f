//! REST surface (spec §6.1). Thin wrappers over the `MatchmakingEngine`/`RankingStore` that
//! mirror what the websocket channel does for clients that only need a one-shot call, not a
//! live connection. Grounded on `services/src/api.rs`'s `ApiState`+pagination+`State` shape.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use matchmaker::ranking_store::{Match, Ranking, RankingStore};
use matchmaker::MatchmakingEngine;
use serde::{Deserialize, Serialize};

use crate::auth::Identity;

const DEFAULT_LEADERBOARD_LIMIT: u32 = 50;
const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct RestState {
    pub engine: MatchmakingEngine,
    pub ranking_store: Arc<dyn RankingStore>,
}

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    message: String,
    data: T,
}

fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        message: message.into(),
        data,
    })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

fn err(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

fn clamp_page(query: &PageQuery, default_limit: u32) -> (u32, u32) {
    let limit = query.limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);
    (limit, offset)
}

#[derive(Debug, Serialize)]
struct LeaderboardData {
    leaderboard: Vec<Ranking>,
    total: u64,
}

#[derive(Debug, Serialize)]
struct HistoryData {
    matches: Vec<Match>,
    total: u64,
}

#[derive(Debug, Serialize)]
struct QueueJoinData {
    #[serde(rename = "queueId")]
    queue_id: String,
    #[serde(rename = "queueSize")]
    queue_size: usize,
}

pub fn router(state: RestState) -> Router {
    Router::new()
        .route("/pvp/ranking/:userId", get(get_ranking))
        .route("/pvp/leaderboard", get(get_leaderboard))
        .route("/pvp/queue/join", post(join_queue))
        .route("/pvp/queue/leave", delete(leave_queue))
        .route("/pvp/history/:userId", get(get_history))
        .with_state(state)
}

async fn get_ranking(
    State(state): State<RestState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.ranking_store.get_ranking(&user_id).await {
        Ok(Some(ranking)) => ok("ranking found", ranking).into_response(),
        Ok(None) => err(StatusCode::NOT_FOUND, "no ranking for this user").into_response(),
        Err(storage_err) => {
            tracing::error!(%storage_err, user_id, "get_ranking failed");
            err(StatusCode::INTERNAL_SERVER_ERROR, "storage error").into_response()
        }
    }
}

async fn get_leaderboard(
    State(state): State<RestState>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let (limit, offset) = clamp_page(&query, DEFAULT_LEADERBOARD_LIMIT);
    match state.ranking_store.get_leaderboard(limit, offset).await {
        Ok((leaderboard, total)) => {
            ok("leaderboard", LeaderboardData { leaderboard, total }).into_response()
        }
        Err(storage_err) => {
            tracing::error!(%storage_err, "get_leaderboard failed");
            err(StatusCode::INTERNAL_SERVER_ERROR, "storage error").into_response()
        }
    }
}

/// Unlike every other REST handler, a missing identity here is a 409, not the shared
/// `Identity` extractor's blanket 401 — spec §6.1's `/pvp/queue/join` row groups "unauthenticated"
/// with "already in queue" under the same status code, so the identity is taken as `Option<Identity>`
/// and the missing case folded into the same conflict response as an existing member.
async fn join_queue(
    State(state): State<RestState>,
    identity: Option<Identity>,
) -> impl IntoResponse {
    let Some(identity) = identity else {
        return err(StatusCode::CONFLICT, "authentication required to join the queue")
            .into_response();
    };
    match state
        .engine
        .join_queue(&identity.user_id, &identity.username)
        .await
    {
        Ok(()) => ok(
            "joined the matchmaking queue",
            QueueJoinData {
                queue_id: identity.user_id,
                queue_size: state.engine.queue_size(),
            },
        )
        .into_response(),
        Err(queue_err) => err(StatusCode::CONFLICT, queue_err.to_string()).into_response(),
    }
}

async fn leave_queue(State(state): State<RestState>, identity: Identity) -> impl IntoResponse {
    match state.engine.leave_queue(&identity.user_id).await {
        Ok(()) => ok("left the matchmaking queue", ()).into_response(),
        Err(queue_err) => err(StatusCode::NOT_FOUND, queue_err.to_string()).into_response(),
    }
}

async fn get_history(
    State(state): State<RestState>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let (limit, offset) = clamp_page(&query, DEFAULT_HISTORY_LIMIT);
    match state
        .ranking_store
        .get_match_history(&user_id, limit, offset)
        .await
    {
        Ok((matches, total)) => ok("match history", HistoryData { matches, total }).into_response(),
        Err(storage_err) => {
            tracing::error!(%storage_err, user_id, "get_match_history failed");
            err(StatusCode::INTERNAL_SERVER_ERROR, "storage error").into_response()
        }
    }
}
