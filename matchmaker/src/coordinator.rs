//! Match Coordinator (spec §4.5): the per-match state machine, `PENDING → ACTIVE →
//! COMPLETED|CANCELLED`. Generalized from the teacher's `Room`/`RoomManager` shape (a manager
//! struct owning per-entity state behind a map, with a dedicated error enum) from game rooms to
//! matches, with a per-match `tokio::sync::Mutex` in place of the teacher's single room-wide
//! lock so events for different matches proceed independently (spec §5).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common_net::error::MatchStateError;
use common_net::metrics::MatchmakingMetrics;
use common_net::protocol::{OpponentRef, PlayerRef, ServerEvent};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::elo;
use crate::queue::QueueEntry;
use crate::ranking_store::{
    get_or_create_ranking, Match, MatchPatch, MatchStatus, RankingPatch, RankingStore,
};
use crate::sink::EventSink;

pub const TEST_DURATION_SECS: u32 = 60;
pub const MATCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
struct PlayerInfo {
    id: String,
    username: String,
}

struct MatchState {
    match_id: String,
    player1: PlayerInfo,
    player2: PlayerInfo,
    phase: Phase,
    created_at: DateTime<Utc>,
    live_progress: HashMap<String, (f64, f64, DateTime<Utc>)>,
    finals: HashMap<String, (f64, f64)>,
    disconnected: HashSet<String>,
    timer: Option<JoinHandle<()>>,
}

impl MatchState {
    fn opponent_of(&self, user_id: &str) -> Option<&PlayerInfo> {
        if self.player1.id == user_id {
            Some(&self.player2)
        } else if self.player2.id == user_id {
            Some(&self.player1)
        } else {
            None
        }
    }

    fn is_participant(&self, user_id: &str) -> bool {
        self.player1.id == user_id || self.player2.id == user_id
    }
}

enum FinalizeReason {
    Natural,
    Forfeit { winner_id: String },
}

#[derive(Clone)]
pub struct MatchCoordinator {
    matches: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<MatchState>>>>>,
    ranking_store: Arc<dyn RankingStore>,
    sink: Arc<dyn EventSink>,
    metrics: &'static MatchmakingMetrics,
}

impl MatchCoordinator {
    pub fn new(ranking_store: Arc<dyn RankingStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            matches: Arc::new(StdMutex::new(HashMap::new())),
            ranking_store,
            sink,
            metrics: common_net::metrics::matchmaking_metrics(),
        }
    }

    fn lookup(&self, match_id: &str) -> Option<Arc<AsyncMutex<MatchState>>> {
        self.matches
            .lock()
            .expect("matches map lock poisoned")
            .get(match_id)
            .cloned()
    }

    fn remove(&self, match_id: &str) {
        self.matches
            .lock()
            .expect("matches map lock poisoned")
            .remove(match_id);
        self.metrics.active_matches.dec();
    }

    /// Pair-off effect: persist the match row, ensure both rankings exist, emit `match_found`.
    /// Leaves no trace in the active-match map on failure, so the caller (the queue) can safely
    /// requeue the pair — spec §4.4/§5's "rollback on pairing failure" and scenario S5.
    pub async fn create_match(
        &self,
        first: QueueEntry,
        second: QueueEntry,
    ) -> Result<(), common_net::error::StorageError> {
        let match_id = Uuid::new_v4().to_string();

        let ranking1 =
            get_or_create_ranking(&*self.ranking_store, &first.user_id, &first.username).await?;
        let ranking2 =
            get_or_create_ranking(&*self.ranking_store, &second.user_id, &second.username)
                .await?;

        let now = Utc::now();
        let row = Match {
            match_id: match_id.clone(),
            player1_id: first.user_id.clone(),
            player1_username: first.username.clone(),
            player2_id: second.user_id.clone(),
            player2_username: second.username.clone(),
            player1_wpm: 0.0,
            player1_accuracy: 0.0,
            player2_wpm: 0.0,
            player2_accuracy: 0.0,
            winner_id: None,
            winner_name: None,
            player1_elo_change: 0,
            player2_elo_change: 0,
            match_duration: 0,
            status: MatchStatus::Active,
            created_at: now,
            completed_at: None,
        };
        self.ranking_store.create_match(row).await?;

        let state = MatchState {
            match_id: match_id.clone(),
            player1: PlayerInfo {
                id: first.user_id.clone(),
                username: first.username.clone(),
            },
            player2: PlayerInfo {
                id: second.user_id.clone(),
                username: second.username.clone(),
            },
            phase: Phase::Pending,
            created_at: now,
            live_progress: HashMap::new(),
            finals: HashMap::new(),
            disconnected: HashSet::new(),
            timer: None,
        };
        self.matches
            .lock()
            .expect("matches map lock poisoned")
            .insert(match_id.clone(), Arc::new(AsyncMutex::new(state)));
        self.metrics.matches_created_total.inc();
        self.metrics.active_matches.inc();

        // The room is keyed by match_id so later symmetric broadcasts (game_start,
        // match_result, match_timeout) can go out as one `emit_to_room` call each instead of
        // one `emit_to_user` per participant.
        self.sink.join_room(&first.user_id, &match_id).await;
        self.sink.join_room(&second.user_id, &match_id).await;

        // match_found's payload is per-recipient (each side's `opponent` differs), so it stays
        // two targeted emits rather than one room broadcast.
        self.sink
            .emit_to_user(
                &first.user_id,
                ServerEvent::MatchFound {
                    match_id: match_id.clone(),
                    opponent: OpponentRef {
                        id: second.user_id.clone(),
                        username: second.username.clone(),
                        elo: ranking2.elo,
                    },
                },
            )
            .await;
        self.sink
            .emit_to_user(
                &second.user_id,
                ServerEvent::MatchFound {
                    match_id,
                    opponent: OpponentRef {
                        id: first.user_id.clone(),
                        username: first.username.clone(),
                        elo: ranking1.elo,
                    },
                },
            )
            .await;

        Ok(())
    }

    /// `ACCEPT_MATCH`: the first request transitions `PENDING → ACTIVE` and arms the timeout;
    /// later requests (either player re-joining the room) are an idempotent no-op.
    pub async fn start_match(
        &self,
        match_id: &str,
        requester_user_id: &str,
    ) -> Result<(), MatchStateError> {
        let handle = self
            .lookup(match_id)
            .ok_or_else(|| MatchStateError::NotFound {
                match_id: match_id.to_string(),
            })?;
        let mut state = handle.lock().await;
        if !state.is_participant(requester_user_id) {
            return Err(MatchStateError::NotParticipant {
                match_id: match_id.to_string(),
                user_id: requester_user_id.to_string(),
            });
        }
        match state.phase {
            Phase::Active => return Ok(()),
            Phase::Pending => {}
            _ => {
                return Err(MatchStateError::WrongState {
                    match_id: match_id.to_string(),
                })
            }
        }

        state.phase = Phase::Active;
        let start_time = Utc::now().timestamp_millis();

        // Same payload for both participants — one room broadcast instead of two targeted emits.
        self.sink
            .emit_to_room(
                &state.match_id,
                ServerEvent::GameStart {
                    match_id: state.match_id.clone(),
                    player1: PlayerRef {
                        id: state.player1.id.clone(),
                        username: state.player1.username.clone(),
                    },
                    player2: PlayerRef {
                        id: state.player2.id.clone(),
                        username: state.player2.username.clone(),
                    },
                    start_time,
                    test_duration: TEST_DURATION_SECS,
                },
            )
            .await;

        let coordinator = self.clone();
        let timeout_match_id = state.match_id.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(MATCH_TIMEOUT).await;
            coordinator.handle_timeout(&timeout_match_id).await;
        }));

        Ok(())
    }

    pub async fn submit_progress(
        &self,
        match_id: &str,
        user_id: &str,
        wpm: f64,
        accuracy: f64,
    ) -> Result<(), MatchStateError> {
        let handle = self
            .lookup(match_id)
            .ok_or_else(|| MatchStateError::NotFound {
                match_id: match_id.to_string(),
            })?;
        let mut state = handle.lock().await;
        if state.phase != Phase::Active {
            return Err(MatchStateError::WrongState {
                match_id: match_id.to_string(),
            });
        }
        let opponent = state
            .opponent_of(user_id)
            .ok_or_else(|| MatchStateError::NotParticipant {
                match_id: match_id.to_string(),
                user_id: user_id.to_string(),
            })?
            .clone();

        let now = Utc::now();
        state
            .live_progress
            .insert(user_id.to_string(), (wpm, accuracy, now));

        let patch = if state.player1.id == user_id {
            MatchPatch {
                player1_wpm: Some(wpm),
                player1_accuracy: Some(accuracy),
                ..Default::default()
            }
        } else {
            MatchPatch {
                player2_wpm: Some(wpm),
                player2_accuracy: Some(accuracy),
                ..Default::default()
            }
        };
        if let Err(err) = self.ranking_store.update_match(match_id, patch).await {
            warn!(%err, match_id, "failed to persist progress update");
        }

        self.sink
            .emit_to_user(
                &opponent.id,
                ServerEvent::OpponentProgress {
                    match_id: match_id.to_string(),
                    opponent_wpm: wpm,
                    opponent_accuracy: accuracy,
                    timestamp: now.timestamp_millis(),
                },
            )
            .await;

        Ok(())
    }

    pub async fn submit_complete(
        &self,
        match_id: &str,
        user_id: &str,
        wpm: f64,
        accuracy: f64,
    ) -> Result<(), MatchStateError> {
        {
            let handle = self
                .lookup(match_id)
                .ok_or_else(|| MatchStateError::NotFound {
                    match_id: match_id.to_string(),
                })?;
            let mut state = handle.lock().await;
            if state.phase != Phase::Active {
                return Err(MatchStateError::WrongState {
                    match_id: match_id.to_string(),
                });
            }
            if !state.is_participant(user_id) {
                return Err(MatchStateError::NotParticipant {
                    match_id: match_id.to_string(),
                    user_id: user_id.to_string(),
                });
            }

            state.finals.insert(user_id.to_string(), (wpm, accuracy));
            let patch = if state.player1.id == user_id {
                MatchPatch {
                    player1_wpm: Some(wpm),
                    player1_accuracy: Some(accuracy),
                    ..Default::default()
                }
            } else {
                MatchPatch {
                    player2_wpm: Some(wpm),
                    player2_accuracy: Some(accuracy),
                    ..Default::default()
                }
            };
            if let Err(err) = self.ranking_store.update_match(match_id, patch).await {
                warn!(%err, match_id, "failed to persist final stats");
            }
        }

        self.try_finalize(match_id, FinalizeReason::Natural).await;
        Ok(())
    }

    pub async fn forfeit(&self, match_id: &str, user_id: &str) -> Result<(), MatchStateError> {
        let winner_id = {
            let handle = self
                .lookup(match_id)
                .ok_or_else(|| MatchStateError::NotFound {
                    match_id: match_id.to_string(),
                })?;
            let state = handle.lock().await;
            if state.phase != Phase::Active {
                return Err(MatchStateError::WrongState {
                    match_id: match_id.to_string(),
                });
            }
            let opponent = state
                .opponent_of(user_id)
                .ok_or_else(|| MatchStateError::NotParticipant {
                    match_id: match_id.to_string(),
                    user_id: user_id.to_string(),
                })?;
            self.sink
                .emit_to_user(&opponent.id, ServerEvent::OpponentForfeited {
                    match_id: match_id.to_string(),
                })
                .await;
            opponent.id.clone()
        };

        self.try_finalize(match_id, FinalizeReason::Forfeit { winner_id })
            .await;
        Ok(())
    }

    pub async fn reconnect(&self, match_id: &str, user_id: &str) -> Result<(), MatchStateError> {
        let handle = self
            .lookup(match_id)
            .ok_or_else(|| MatchStateError::NotFound {
                match_id: match_id.to_string(),
            })?;
        let opponent = {
            let mut state = handle.lock().await;
            if !state.is_participant(user_id) {
                return Err(MatchStateError::NotParticipant {
                    match_id: match_id.to_string(),
                    user_id: user_id.to_string(),
                });
            }
            state.disconnected.remove(user_id);
            state.opponent_of(user_id).cloned()
        };
        if let Some(opponent) = opponent {
            self.sink
                .emit_to_user(
                    &opponent.id,
                    ServerEvent::OpponentReconnected {
                        match_id: match_id.to_string(),
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Invoked by the gateway's lifecycle channel when a connection closes (spec §9: the
    /// registry never calls the coordinator except through this one-way notification).
    pub async fn handle_disconnect(&self, user_id: &str) {
        let candidates: Vec<Arc<AsyncMutex<MatchState>>> = self
            .matches
            .lock()
            .expect("matches map lock poisoned")
            .values()
            .cloned()
            .collect();

        for handle in candidates {
            let should_cancel = {
                let mut state = handle.lock().await;
                if state.phase != Phase::Active && state.phase != Phase::Pending {
                    continue;
                }
                if !state.is_participant(user_id) {
                    continue;
                }
                state.disconnected.insert(user_id.to_string());
                state.disconnected.len() >= 2
            };
            if should_cancel {
                let match_id = {
                    let state = handle.lock().await;
                    state.match_id.clone()
                };
                self.cancel(&match_id).await;
            }
            return;
        }
    }

    async fn cancel(&self, match_id: &str) {
        let Some(handle) = self.lookup(match_id) else {
            return;
        };
        let mut state = handle.lock().await;
        if state.phase == Phase::Completed || state.phase == Phase::Cancelled {
            return;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.phase = Phase::Cancelled;

        let patch = MatchPatch {
            status: Some(MatchStatus::Cancelled),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(err) = self.ranking_store.update_match(match_id, patch).await {
            error!(%err, match_id, "failed to persist cancelled match");
        }
        state.live_progress.clear();
        let (player1_id, player2_id) = (state.player1.id.clone(), state.player2.id.clone());
        drop(state);
        self.sink.leave_room(&player1_id, match_id).await;
        self.sink.leave_room(&player2_id, match_id).await;
        self.metrics.matches_cancelled_total.inc();
        self.remove(match_id);
    }

    /// 120s hard cap. A no-op if the match already left `Active` by the time the timer fires.
    async fn handle_timeout(&self, match_id: &str) {
        let Some(handle) = self.lookup(match_id) else {
            return;
        };
        let (player1, player2, created_at) = {
            let mut state = handle.lock().await;
            if state.phase != Phase::Active {
                return;
            }
            state.phase = Phase::Completed;
            state.timer = None;
            state.live_progress.clear();
            (
                state.player1.clone(),
                state.player2.clone(),
                state.created_at,
            )
        };

        let completed_at = Utc::now();
        let duration_secs = (completed_at - created_at).num_seconds().max(0);
        let patch = MatchPatch {
            status: Some(MatchStatus::Completed),
            completed_at: Some(completed_at),
            match_duration: Some(duration_secs),
            ..Default::default()
        };
        // No Elo change is ever applied on a pure timeout, even with partial progress reported —
        // spec §4.5/§9 follows the source behavior here deliberately.
        if let Err(err) = self.ranking_store.update_match(match_id, patch).await {
            error!(%err, match_id, "failed to persist timed-out match");
        }

        self.metrics.matches_timed_out_total.inc();
        self.remove(match_id);

        self.sink
            .emit_to_room(
                match_id,
                ServerEvent::MatchTimeout {
                    match_id: match_id.to_string(),
                    message: "Match timed out".to_string(),
                },
            )
            .await;
        self.sink.leave_room(&player1.id, match_id).await;
        self.sink.leave_room(&player2.id, match_id).await;
        info!(match_id, "match timed out with no Elo change");
    }

    /// Finalization (barrier release, spec §4.5). Requires both players' final stats for the
    /// `Natural` reason; `Forfeit` finalizes immediately regardless of reported stats.
    async fn try_finalize(&self, match_id: &str, reason: FinalizeReason) {
        let Some(handle) = self.lookup(match_id) else {
            return;
        };

        let (player1, player2, finals_ready) = {
            let state = handle.lock().await;
            if state.phase != Phase::Active {
                return;
            }
            let ready = match &reason {
                FinalizeReason::Natural => state.finals.len() == 2,
                FinalizeReason::Forfeit { .. } => true,
            };
            (state.player1.clone(), state.player2.clone(), ready)
        };
        if !finals_ready {
            return;
        }

        let (p1_wpm, p1_acc, p2_wpm, p2_acc) = {
            let state = handle.lock().await;
            let (w1, a1) = state
                .finals
                .get(&player1.id)
                .copied()
                .unwrap_or((0.0, 0.0));
            let (w2, a2) = state
                .finals
                .get(&player2.id)
                .copied()
                .unwrap_or((0.0, 0.0));
            (w1, a1, w2, a2)
        };

        let winner_id = match &reason {
            FinalizeReason::Forfeit { winner_id } => Some(winner_id.clone()),
            FinalizeReason::Natural => {
                let score1 = 0.8 * p1_wpm + 0.2 * p1_acc;
                let score2 = 0.8 * p2_wpm + 0.2 * p2_acc;
                if score1 > score2 {
                    Some(player1.id.clone())
                } else if score2 > score1 {
                    Some(player2.id.clone())
                } else {
                    None
                }
            }
        };
        let winner_name = winner_id.as_ref().map(|id| {
            if *id == player1.id {
                player1.username.clone()
            } else {
                player2.username.clone()
            }
        });

        let ranking1 = match self.ranking_store.get_ranking(&player1.id).await {
            Ok(Some(r)) => r,
            _ => {
                error!(match_id, "ranking for player1 missing at finalization");
                return;
            }
        };
        let ranking2 = match self.ranking_store.get_ranking(&player2.id).await {
            Ok(Some(r)) => r,
            _ => {
                error!(match_id, "ranking for player2 missing at finalization");
                return;
            }
        };

        let (result1, result2) = match &winner_id {
            Some(id) if *id == player1.id => (1.0, 0.0),
            Some(_) => (0.0, 1.0),
            None => (0.5, 0.5),
        };
        let delta1 = elo::rating_delta(ranking1.elo, ranking2.elo, result1);
        let delta2 = elo::rating_delta(ranking2.elo, ranking1.elo, result2);

        let created_at = {
            let state = handle.lock().await;
            state.created_at
        };
        let completed_at = Utc::now();
        let duration_secs = (completed_at - created_at).num_seconds().max(0);

        let persist = async {
            self.ranking_store
                .update_match(
                    match_id,
                    MatchPatch {
                        winner_id: Some(winner_id.clone()),
                        winner_name: Some(winner_name.clone()),
                        player1_elo_change: Some(delta1),
                        player2_elo_change: Some(delta2),
                        match_duration: Some(duration_secs),
                        status: Some(MatchStatus::Completed),
                        completed_at: Some(completed_at),
                        ..Default::default()
                    },
                )
                .await?;

            let new_elo1 = elo::apply_delta(ranking1.elo, delta1);
            self.ranking_store
                .update_ranking(
                    &player1.id,
                    RankingPatch {
                        elo: Some(new_elo1),
                        wins: Some(
                            ranking1.wins + matches!(&winner_id, Some(id) if *id == player1.id) as u32,
                        ),
                        losses: Some(
                            ranking1.losses + matches!(&winner_id, Some(id) if *id == player2.id) as u32,
                        ),
                        matches: Some(ranking1.matches + 1),
                        last_match_at: Some(completed_at),
                    },
                )
                .await?;

            let new_elo2 = elo::apply_delta(ranking2.elo, delta2);
            self.ranking_store
                .update_ranking(
                    &player2.id,
                    RankingPatch {
                        elo: Some(new_elo2),
                        wins: Some(
                            ranking2.wins + matches!(&winner_id, Some(id) if *id == player2.id) as u32,
                        ),
                        losses: Some(
                            ranking2.losses + matches!(&winner_id, Some(id) if *id == player1.id) as u32,
                        ),
                        matches: Some(ranking2.matches + 1),
                        last_match_at: Some(completed_at),
                    },
                )
                .await?;
            Ok::<(), common_net::error::StorageError>(())
        };

        // Retried once; on repeat failure the match is left active and recoverable on the
        // next inbound event, per spec §4.5 failure semantics.
        if persist.await.is_err() {
            warn!(match_id, "finalization persistence failed, retrying once");
            let retry = async {
                self.ranking_store
                    .update_match(
                        match_id,
                        MatchPatch {
                            winner_id: Some(winner_id.clone()),
                            winner_name: Some(winner_name.clone()),
                            player1_elo_change: Some(delta1),
                            player2_elo_change: Some(delta2),
                            match_duration: Some(duration_secs),
                            status: Some(MatchStatus::Completed),
                            completed_at: Some(completed_at),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok::<(), common_net::error::StorageError>(())
            };
            if retry.await.is_err() {
                error!(match_id, "finalization failed twice, leaving match active");
                return;
            }
        }

        {
            let mut state = handle.lock().await;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.phase = Phase::Completed;
            state.live_progress.clear();
        }
        self.metrics.matches_completed_total.inc();
        self.remove(match_id);

        // Identical payload for both participants — one room broadcast instead of two.
        self.sink
            .emit_to_room(
                match_id,
                ServerEvent::MatchResult {
                    match_id: match_id.to_string(),
                    winner_id: winner_id.clone(),
                    winner_name: winner_name.clone(),
                    player1_id: player1.id.clone(),
                    player1_name: player1.username.clone(),
                    player1_wpm: p1_wpm,
                    player1_accuracy: p1_acc,
                    player1_elo_change: delta1,
                    player2_id: player2.id.clone(),
                    player2_name: player2.username.clone(),
                    player2_wpm: p2_wpm,
                    player2_accuracy: p2_acc,
                    player2_elo_change: delta2,
                    match_duration: duration_secs,
                },
            )
            .await;
        self.sink.leave_room(&player1.id, match_id).await;
        self.sink.leave_room(&player2.id, match_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking_store::{Ranking, RankingPatch};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct FakeStore {
        rankings: StdMutex<HashMap<String, Ranking>>,
        matches: StdMutex<HashMap<String, Match>>,
    }

    #[async_trait]
    impl RankingStore for FakeStore {
        async fn get_ranking(
            &self,
            user_id: &str,
        ) -> Result<Option<Ranking>, common_net::error::StorageError> {
            Ok(self.rankings.lock().unwrap().get(user_id).cloned())
        }
        async fn create_ranking(
            &self,
            ranking: Ranking,
        ) -> Result<Ranking, common_net::error::StorageError> {
            self.rankings
                .lock()
                .unwrap()
                .insert(ranking.user_id.clone(), ranking.clone());
            Ok(ranking)
        }
        async fn update_ranking(
            &self,
            user_id: &str,
            patch: RankingPatch,
        ) -> Result<Option<Ranking>, common_net::error::StorageError> {
            let mut rankings = self.rankings.lock().unwrap();
            let Some(ranking) = rankings.get_mut(user_id) else {
                return Ok(None);
            };
            if let Some(v) = patch.elo {
                ranking.elo = v;
            }
            if let Some(v) = patch.wins {
                ranking.wins = v;
            }
            if let Some(v) = patch.losses {
                ranking.losses = v;
            }
            if let Some(v) = patch.matches {
                ranking.matches = v;
            }
            if let Some(v) = patch.last_match_at {
                ranking.last_match_at = Some(v);
            }
            Ok(Some(ranking.clone()))
        }
        async fn get_leaderboard(
            &self,
            _limit: u32,
            _offset: u32,
        ) -> Result<(Vec<Ranking>, u64), common_net::error::StorageError> {
            Ok((Vec::new(), 0))
        }
        async fn create_match(&self, m: Match) -> Result<Match, common_net::error::StorageError> {
            self.matches
                .lock()
                .unwrap()
                .insert(m.match_id.clone(), m.clone());
            Ok(m)
        }
        async fn get_match(
            &self,
            match_id: &str,
        ) -> Result<Option<Match>, common_net::error::StorageError> {
            Ok(self.matches.lock().unwrap().get(match_id).cloned())
        }
        async fn update_match(
            &self,
            match_id: &str,
            patch: MatchPatch,
        ) -> Result<Option<Match>, common_net::error::StorageError> {
            let mut matches = self.matches.lock().unwrap();
            let Some(m) = matches.get_mut(match_id) else {
                return Ok(None);
            };
            if let Some(v) = patch.winner_id {
                m.winner_id = v;
            }
            if let Some(v) = patch.winner_name {
                m.winner_name = v;
            }
            if let Some(v) = patch.player1_elo_change {
                m.player1_elo_change = v;
            }
            if let Some(v) = patch.player2_elo_change {
                m.player2_elo_change = v;
            }
            if let Some(v) = patch.match_duration {
                m.match_duration = v;
            }
            if let Some(v) = patch.status {
                m.status = v;
            }
            if let Some(v) = patch.completed_at {
                m.completed_at = Some(v);
            }
            Ok(Some(m.clone()))
        }
        async fn get_match_history(
            &self,
            _user_id: &str,
            _limit: u32,
            _offset: u32,
        ) -> Result<(Vec<Match>, u64), common_net::error::StorageError> {
            Ok((Vec::new(), 0))
        }
        async fn ensure_ready(&self) -> Result<(), common_net::error::StorageError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: AsyncMutex<Vec<(String, ServerEvent)>>,
        rooms: StdMutex<HashMap<String, HashSet<String>>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn emit_to_user(&self, user_id: &str, event: ServerEvent) {
            self.events
                .lock()
                .await
                .push((user_id.to_string(), event));
        }

        async fn join_room(&self, user_id: &str, room_id: &str) {
            self.rooms
                .lock()
                .unwrap()
                .entry(room_id.to_string())
                .or_default()
                .insert(user_id.to_string());
        }

        async fn leave_room(&self, user_id: &str, room_id: &str) {
            if let Some(members) = self.rooms.lock().unwrap().get_mut(room_id) {
                members.remove(user_id);
            }
        }

        async fn emit_to_room(&self, room_id: &str, event: ServerEvent) {
            let members: Vec<String> = self
                .rooms
                .lock()
                .unwrap()
                .get(room_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect();
            for user_id in members {
                self.emit_to_user(&user_id, event.clone()).await;
            }
        }
    }

    fn entry(user_id: &str, username: &str) -> QueueEntry {
        QueueEntry {
            user_id: user_id.to_string(),
            username: username.to_string(),
            joined_at: Instant::now(),
        }
    }

    async fn seeded_coordinator(
        elo_a: i64,
        elo_b: i64,
    ) -> (MatchCoordinator, Arc<FakeStore>, Arc<RecordingSink>) {
        let store = Arc::new(FakeStore::default());
        store.rankings.lock().unwrap().insert(
            "a".to_string(),
            Ranking {
                elo: elo_a,
                ..Ranking::new("a", "alice")
            },
        );
        store.rankings.lock().unwrap().insert(
            "b".to_string(),
            Ranking {
                elo: elo_b,
                ..Ranking::new("b", "bob")
            },
        );
        let sink = Arc::new(RecordingSink::default());
        let coordinator = MatchCoordinator::new(
            store.clone() as Arc<dyn RankingStore>,
            sink.clone() as Arc<dyn EventSink>,
        );
        (coordinator, store, sink)
    }

    async fn match_id_from(sink: &RecordingSink) -> String {
        let events = sink.events.lock().await;
        events
            .iter()
            .find_map(|(_, e)| match e {
                ServerEvent::MatchFound { match_id, .. } => Some(match_id.clone()),
                _ => None,
            })
            .expect("match_found was emitted")
    }

    /// Scenario S2: tied scores produce a drawn result with no Elo movement either way.
    #[tokio::test]
    async fn tied_final_scores_produce_a_draw() {
        let (coordinator, store, sink) = seeded_coordinator(1500, 1500).await;
        coordinator
            .create_match(entry("a", "alice"), entry("b", "bob"))
            .await
            .unwrap();
        let match_id = match_id_from(&sink).await;

        coordinator.start_match(&match_id, "a").await.unwrap();
        coordinator
            .submit_complete(&match_id, "a", 50.0, 90.0)
            .await
            .unwrap();
        coordinator
            .submit_complete(&match_id, "b", 50.0, 90.0)
            .await
            .unwrap();

        let events = sink.events.lock().await;
        let results: Vec<_> = events
            .iter()
            .filter(|(_, e)| matches!(e, ServerEvent::MatchResult { .. }))
            .collect();
        assert_eq!(results.len(), 2);
        for (_, event) in &results {
            let ServerEvent::MatchResult {
                winner_id,
                player1_elo_change,
                player2_elo_change,
                ..
            } = event
            else {
                unreachable!()
            };
            assert!(winner_id.is_none());
            assert_eq!(*player1_elo_change, 0);
            assert_eq!(*player2_elo_change, 0);
        }
        let ranking_a = store.rankings.lock().unwrap().get("a").unwrap().clone();
        let ranking_b = store.rankings.lock().unwrap().get("b").unwrap().clone();
        assert_eq!(ranking_a.elo, 1500);
        assert_eq!(ranking_b.elo, 1500);
        assert_eq!(ranking_a.wins, 0);
        assert_eq!(ranking_a.losses, 0);
        assert_eq!(ranking_a.matches, 1);
    }

    /// Scenario S3: a match that never receives both `complete`s hits the 120s cap and is
    /// closed out with no ranking mutation at all.
    #[tokio::test]
    async fn unfinished_match_times_out_without_touching_rankings() {
        let (coordinator, store, sink) = seeded_coordinator(1000, 1000).await;
        coordinator
            .create_match(entry("a", "alice"), entry("b", "bob"))
            .await
            .unwrap();
        let match_id = match_id_from(&sink).await;

        coordinator.start_match(&match_id, "a").await.unwrap();
        coordinator
            .submit_progress(&match_id, "a", 80.0, 95.0)
            .await
            .unwrap();

        coordinator.handle_timeout(&match_id).await;

        let events = sink.events.lock().await;
        let timeouts: Vec<_> = events
            .iter()
            .filter(|(_, e)| matches!(e, ServerEvent::MatchTimeout { .. }))
            .collect();
        assert_eq!(timeouts.len(), 2, "both players receive match_timeout");
        assert!(!events
            .iter()
            .any(|(_, e)| matches!(e, ServerEvent::MatchResult { .. })));

        let ranking_a = store.rankings.lock().unwrap().get("a").unwrap().clone();
        assert_eq!(ranking_a.elo, 1000, "a pure timeout never moves Elo");

        // A second, late-firing timer is a no-op against an already-closed match.
        coordinator.handle_timeout(&match_id).await;
        let events = sink.events.lock().await;
        let timeouts: Vec<_> = events
            .iter()
            .filter(|(_, e)| matches!(e, ServerEvent::MatchTimeout { .. }))
            .collect();
        assert_eq!(timeouts.len(), 2, "a repeat timeout does not double-fire");
    }
}
