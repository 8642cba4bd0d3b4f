//! Ranking Store Facade (spec §4.2): idempotent CRUD over `Ranking` and `Match`, layered over
//! the PocketBase-style REST client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_net::error::StorageError;
use pocketbase::PocketBaseClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const RANKINGS_COLLECTION: &str = "pvp_rankings";
pub const MATCHES_COLLECTION: &str = "pvp_matches";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ranking {
    pub user_id: String,
    pub username: String,
    pub elo: i64,
    pub wins: u32,
    pub losses: u32,
    pub matches: u32,
    pub last_match_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ranking {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            username: username.into(),
            elo: super::elo::DEFAULT_ELO,
            wins: 0,
            losses: 0,
            matches: 0,
            last_match_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub match_id: String,
    pub player1_id: String,
    pub player1_username: String,
    pub player2_id: String,
    pub player2_username: String,
    pub player1_wpm: f64,
    pub player1_accuracy: f64,
    pub player2_wpm: f64,
    pub player2_accuracy: f64,
    pub winner_id: Option<String>,
    pub winner_name: Option<String>,
    pub player1_elo_change: i32,
    pub player2_elo_change: i32,
    pub match_duration: i64,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update applied to a `Ranking`; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RankingPatch {
    pub elo: Option<i64>,
    pub wins: Option<u32>,
    pub losses: Option<u32>,
    pub matches: Option<u32>,
    pub last_match_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct MatchPatch {
    pub player1_wpm: Option<f64>,
    pub player1_accuracy: Option<f64>,
    pub player2_wpm: Option<f64>,
    pub player2_accuracy: Option<f64>,
    pub winner_id: Option<Option<String>>,
    pub winner_name: Option<Option<String>>,
    pub player1_elo_change: Option<i32>,
    pub player2_elo_change: Option<i32>,
    pub match_duration: Option<i64>,
    pub status: Option<MatchStatus>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RankingStore: Send + Sync {
    async fn get_ranking(&self, user_id: &str) -> Result<Option<Ranking>, StorageError>;
    async fn create_ranking(&self, ranking: Ranking) -> Result<Ranking, StorageError>;
    async fn update_ranking(
        &self,
        user_id: &str,
        patch: RankingPatch,
    ) -> Result<Option<Ranking>, StorageError>;
    async fn get_leaderboard(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Ranking>, u64), StorageError>;

    async fn create_match(&self, m: Match) -> Result<Match, StorageError>;
    async fn get_match(&self, match_id: &str) -> Result<Option<Match>, StorageError>;
    async fn update_match(
        &self,
        match_id: &str,
        patch: MatchPatch,
    ) -> Result<Option<Match>, StorageError>;
    async fn get_match_history(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Match>, u64), StorageError>;

    /// Probes that the backing collections are reachable. Called by the Lifecycle Manager at boot.
    async fn ensure_ready(&self) -> Result<(), StorageError>;
}

/// Ensures a ranking exists for `user_id`, idempotently. Convenience built atop `get_ranking` +
/// `create_ranking` for the Match Coordinator's "ensure both rankings exist" pair-off effect.
pub async fn get_or_create_ranking(
    store: &dyn RankingStore,
    user_id: &str,
    username: &str,
) -> Result<Ranking, StorageError> {
    if let Some(existing) = store.get_ranking(user_id).await? {
        return Ok(existing);
    }
    store
        .create_ranking(Ranking::new(user_id, username))
        .await
}

pub struct PocketBaseRankingStore {
    client: PocketBaseClient,
}

impl PocketBaseRankingStore {
    pub fn new(client: PocketBaseClient) -> Self {
        Self { client }
    }
}

fn ranking_to_json(r: &Ranking) -> Value {
    json!({
        "userId": r.user_id,
        "username": r.username,
        "elo": r.elo,
        "wins": r.wins,
        "losses": r.losses,
        "matches": r.matches,
        "lastMatchAt": r.last_match_at,
        "createdAt": r.created_at,
        "updatedAt": r.updated_at,
    })
}

fn ranking_from_record(record: &pocketbase::Record) -> Result<Ranking, StorageError> {
    let value = Value::Object(
        record
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    serde_json::from_value(value).map_err(|err| StorageError::Decode(err.to_string()))
}

fn match_to_json(m: &Match) -> Value {
    json!({
        "matchId": m.match_id,
        "player1Id": m.player1_id,
        "player1Username": m.player1_username,
        "player2Id": m.player2_id,
        "player2Username": m.player2_username,
        "player1Wpm": m.player1_wpm,
        "player1Accuracy": m.player1_accuracy,
        "player2Wpm": m.player2_wpm,
        "player2Accuracy": m.player2_accuracy,
        "winnerId": m.winner_id,
        "winnerName": m.winner_name,
        "player1EloChange": m.player1_elo_change,
        "player2EloChange": m.player2_elo_change,
        "matchDuration": m.match_duration,
        "status": m.status,
        "createdAt": m.created_at,
        "completedAt": m.completed_at,
    })
}

fn match_from_record(record: &pocketbase::Record) -> Result<Match, StorageError> {
    let value = Value::Object(
        record
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    serde_json::from_value(value).map_err(|err| StorageError::Decode(err.to_string()))
}

#[async_trait]
impl RankingStore for PocketBaseRankingStore {
    async fn get_ranking(&self, user_id: &str) -> Result<Option<Ranking>, StorageError> {
        let record = self
            .client
            .get_record(RANKINGS_COLLECTION, user_id)
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        record.as_ref().map(ranking_from_record).transpose()
    }

    async fn create_ranking(&self, ranking: Ranking) -> Result<Ranking, StorageError> {
        let result = self
            .client
            .create_record(RANKINGS_COLLECTION, ranking_to_json(&ranking))
            .await;
        match result {
            Ok(record) => ranking_from_record(&record),
            // On a uniqueness violation the store already has a record for this userId;
            // fetch and return it instead of failing, avoiding the first-match creation race.
            Err(_) => self
                .get_ranking(&ranking.user_id)
                .await?
                .ok_or_else(|| StorageError::Decode("ranking vanished after conflict".into())),
        }
    }

    async fn update_ranking(
        &self,
        user_id: &str,
        patch: RankingPatch,
    ) -> Result<Option<Ranking>, StorageError> {
        let mut body = json!({ "updatedAt": Utc::now() });
        let obj = body.as_object_mut().expect("object literal");
        if let Some(elo) = patch.elo {
            obj.insert("elo".into(), json!(elo));
        }
        if let Some(wins) = patch.wins {
            obj.insert("wins".into(), json!(wins));
        }
        if let Some(losses) = patch.losses {
            obj.insert("losses".into(), json!(losses));
        }
        if let Some(matches) = patch.matches {
            obj.insert("matches".into(), json!(matches));
        }
        if let Some(last_match_at) = patch.last_match_at {
            obj.insert("lastMatchAt".into(), json!(last_match_at));
        }

        let record = self
            .client
            .update_record(RANKINGS_COLLECTION, user_id, body)
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        record.as_ref().map(ranking_from_record).transpose()
    }

    async fn get_leaderboard(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Ranking>, u64), StorageError> {
        let (records, total) = self
            .client
            .list_records(
                RANKINGS_COLLECTION,
                None,
                Some("-elo,updatedAt"),
                limit,
                offset,
            )
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        let rankings = records
            .iter()
            .map(ranking_from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rankings, total))
    }

    async fn create_match(&self, m: Match) -> Result<Match, StorageError> {
        let record = self
            .client
            .create_record(MATCHES_COLLECTION, match_to_json(&m))
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        match_from_record(&record)
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<Match>, StorageError> {
        let record = self
            .client
            .get_record(MATCHES_COLLECTION, match_id)
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        record.as_ref().map(match_from_record).transpose()
    }

    async fn update_match(
        &self,
        match_id: &str,
        patch: MatchPatch,
    ) -> Result<Option<Match>, StorageError> {
        let mut body = json!({});
        let obj = body.as_object_mut().expect("object literal");
        if let Some(v) = patch.player1_wpm {
            obj.insert("player1Wpm".into(), json!(v));
        }
        if let Some(v) = patch.player1_accuracy {
            obj.insert("player1Accuracy".into(), json!(v));
        }
        if let Some(v) = patch.player2_wpm {
            obj.insert("player2Wpm".into(), json!(v));
        }
        if let Some(v) = patch.player2_accuracy {
            obj.insert("player2Accuracy".into(), json!(v));
        }
        if let Some(v) = patch.winner_id {
            obj.insert("winnerId".into(), json!(v));
        }
        if let Some(v) = patch.winner_name {
            obj.insert("winnerName".into(), json!(v));
        }
        if let Some(v) = patch.player1_elo_change {
            obj.insert("player1EloChange".into(), json!(v));
        }
        if let Some(v) = patch.player2_elo_change {
            obj.insert("player2EloChange".into(), json!(v));
        }
        if let Some(v) = patch.match_duration {
            obj.insert("matchDuration".into(), json!(v));
        }
        if let Some(v) = patch.status {
            obj.insert("status".into(), json!(v));
        }
        if let Some(v) = patch.completed_at {
            obj.insert("completedAt".into(), json!(v));
        }

        let record = self
            .client
            .update_record(MATCHES_COLLECTION, match_id, body)
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        record.as_ref().map(match_from_record).transpose()
    }

    async fn get_match_history(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Match>, u64), StorageError> {
        let filter = format!(
            "(player1Id='{user_id}' || player2Id='{user_id}') && status='completed'",
            user_id = user_id
        );
        let (records, total) = self
            .client
            .list_records(
                MATCHES_COLLECTION,
                Some(&filter),
                Some("-createdAt"),
                limit,
                offset,
            )
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        let matches = records
            .iter()
            .map(match_from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((matches, total))
    }

    async fn ensure_ready(&self) -> Result<(), StorageError> {
        self.client
            .ensure_collection(RANKINGS_COLLECTION)
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        self.client
            .ensure_collection(MATCHES_COLLECTION)
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))
    }
}
