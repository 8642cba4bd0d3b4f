//! The `MatchmakingEngine` ties the Queue, Coordinator, and Ranking Store together and is the
//! single entry point the gateway's Event Router calls into (spec §4.6's dispatch boundary).

use std::sync::Arc;

use common_net::error::{MatchStateError, QueueError, StorageError};
use common_net::metrics::MatchmakingMetrics;
use common_net::protocol::ServerEvent;
use tracing::{info, warn};

use crate::coordinator::MatchCoordinator;
use crate::queue::MatchmakingQueue;
use crate::ranking_store::RankingStore;
use crate::sink::EventSink;

#[derive(Clone)]
pub struct MatchmakingEngine {
    queue: Arc<MatchmakingQueue>,
    coordinator: MatchCoordinator,
    sink: Arc<dyn EventSink>,
    metrics: &'static MatchmakingMetrics,
}

impl MatchmakingEngine {
    pub fn new(ranking_store: Arc<dyn RankingStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            queue: Arc::new(MatchmakingQueue::new()),
            coordinator: MatchCoordinator::new(ranking_store, sink.clone()),
            sink,
            metrics: common_net::metrics::matchmaking_metrics(),
        }
    }

    /// `pvp:join_queue`, and the REST join endpoint (spec §6.1/§9: a REST join needs no live
    /// socket — the `emit_to_user` call below is a best-effort no-op if none exists yet).
    pub async fn join_queue(&self, user_id: &str, username: &str) -> Result<(), QueueError> {
        if self.queue.is_in_queue(user_id) {
            return Err(QueueError::AlreadyQueued);
        }
        let size = self.queue.join(user_id, username);
        self.metrics.queue_joins_total.inc();
        self.metrics.queue_depth.set(size as i64);
        self.sink
            .emit_to_user(
                user_id,
                ServerEvent::QueueJoined {
                    queue_size: size,
                    message: "Joined the matchmaking queue".to_string(),
                },
            )
            .await;
        self.broadcast_queue_status().await;
        self.try_pair_off().await;
        Ok(())
    }

    pub async fn leave_queue(&self, user_id: &str) -> Result<(), QueueError> {
        if !self.queue.leave(user_id) {
            return Err(QueueError::NotQueued);
        }
        self.metrics.queue_depth.set(self.queue.size() as i64);
        self.sink
            .emit_to_user(
                user_id,
                ServerEvent::QueueLeft {
                    message: "Left the matchmaking queue".to_string(),
                },
            )
            .await;
        self.broadcast_queue_status().await;
        Ok(())
    }

    /// `pvp:queue_status` broadcast to every currently-queued user (spec §6.2: "broadcast to
    /// all in queue on each size change").
    async fn broadcast_queue_status(&self) {
        let size = self.queue.size();
        for user_id in self.queue.queued_user_ids() {
            self.sink
                .emit_to_user(&user_id, ServerEvent::QueueStatus { queue_size: size })
                .await;
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    /// `ACCEPT_MATCH`.
    pub async fn start_match(&self, match_id: &str, user_id: &str) -> Result<(), MatchStateError> {
        self.coordinator.start_match(match_id, user_id).await
    }

    /// `MATCH_PROGRESS` / `pvp:progress`.
    pub async fn submit_progress(
        &self,
        match_id: &str,
        user_id: &str,
        wpm: f64,
        accuracy: f64,
    ) -> Result<(), MatchStateError> {
        self.coordinator
            .submit_progress(match_id, user_id, wpm, accuracy)
            .await
    }

    /// `MATCH_COMPLETE`.
    pub async fn submit_complete(
        &self,
        match_id: &str,
        user_id: &str,
        wpm: f64,
        accuracy: f64,
    ) -> Result<(), MatchStateError> {
        self.coordinator
            .submit_complete(match_id, user_id, wpm, accuracy)
            .await
    }

    /// `FORFEIT`.
    pub async fn forfeit(&self, match_id: &str, user_id: &str) -> Result<(), MatchStateError> {
        self.coordinator.forfeit(match_id, user_id).await
    }

    /// `RECONNECT`.
    pub async fn reconnect(&self, match_id: &str, user_id: &str) -> Result<(), MatchStateError> {
        self.coordinator.reconnect(match_id, user_id).await
    }

    /// Called by the gateway's Session Registry when a socket unbinds. Also drops the user from
    /// the queue, since a disconnect while queued must not leave a stale entry behind.
    pub async fn handle_disconnect(&self, user_id: &str) {
        if self.queue.leave(user_id) {
            self.metrics.queue_depth.set(self.queue.size() as i64);
        }
        self.coordinator.handle_disconnect(user_id).await;
    }

    /// Pop as many pairs as are currently available. Runs after every join and on every cleanup
    /// tick. A pairing failure rolls the pair back to the head of the queue (spec §5's
    /// atomicity rule, scenario S5) rather than dropping either player.
    pub async fn try_pair_off(&self) {
        let mut paired_any = false;
        loop {
            let Some((first, second)) = self.queue.pop_pair() else {
                break;
            };
            self.metrics.queue_depth.set(self.queue.size() as i64);
            match self
                .coordinator
                .create_match(first.clone(), second.clone())
                .await
            {
                Ok(()) => {
                    paired_any = true;
                    info!(
                        player1 = %first.user_id,
                        player2 = %second.user_id,
                        "paired off a match"
                    );
                }
                Err(err) => {
                    warn!(%err, "pair-off failed, requeueing both players");
                    self.metrics.pairoff_failures_total.inc();
                    self.queue.requeue_front(first, second);
                    self.metrics.queue_depth.set(self.queue.size() as i64);
                    break;
                }
            }
        }
        if paired_any {
            self.broadcast_queue_status().await;
        }
    }

    /// Evicts queue entries older than the timeout, emitting `pvp:queue_timeout` to each (spec
    /// §4.4, scenario S4). Driven by the cleanup ticker in `lib.rs`.
    pub async fn evict_stale_queue_entries(&self) {
        let evicted = self.queue.evict_stale();
        if evicted.is_empty() {
            return;
        }
        self.metrics.queue_depth.set(self.queue.size() as i64);
        self.metrics
            .queue_timeouts_total
            .inc_by(evicted.len() as u64);
        for entry in evicted {
            self.sink
                .emit_to_user(
                    &entry.user_id,
                    ServerEvent::QueueTimeout {
                        message: "No opponent found within the matchmaking window".to_string(),
                    },
                )
                .await;
        }
        self.broadcast_queue_status().await;
    }

    pub fn error_for(message: impl Into<String>) -> ServerEvent {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

impl std::fmt::Debug for MatchmakingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchmakingEngine")
            .field("queue_size", &self.queue.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking_store::{Match, MatchPatch, Ranking, RankingPatch};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct FakeStore {
        rankings: StdMutex<std::collections::HashMap<String, Ranking>>,
        matches: StdMutex<std::collections::HashMap<String, Match>>,
    }

    #[async_trait]
    impl RankingStore for FakeStore {
        async fn get_ranking(&self, user_id: &str) -> Result<Option<Ranking>, StorageError> {
            Ok(self.rankings.lock().unwrap().get(user_id).cloned())
        }
        async fn create_ranking(&self, ranking: Ranking) -> Result<Ranking, StorageError> {
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
        ) -> Result<Option<Ranking>, StorageError> {
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
        ) -> Result<(Vec<Ranking>, u64), StorageError> {
            Ok((Vec::new(), 0))
        }
        async fn create_match(&self, m: Match) -> Result<Match, StorageError> {
            self.matches
                .lock()
                .unwrap()
                .insert(m.match_id.clone(), m.clone());
            Ok(m)
        }
        async fn get_match(&self, match_id: &str) -> Result<Option<Match>, StorageError> {
            Ok(self.matches.lock().unwrap().get(match_id).cloned())
        }
        async fn update_match(
            &self,
            match_id: &str,
            patch: MatchPatch,
        ) -> Result<Option<Match>, StorageError> {
            let mut matches = self.matches.lock().unwrap();
            let Some(m) = matches.get_mut(match_id) else {
                return Ok(None);
            };
            if let Some(v) = patch.player1_wpm {
                m.player1_wpm = v;
            }
            if let Some(v) = patch.player1_accuracy {
                m.player1_accuracy = v;
            }
            if let Some(v) = patch.player2_wpm {
                m.player2_wpm = v;
            }
            if let Some(v) = patch.player2_accuracy {
                m.player2_accuracy = v;
            }
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
        ) -> Result<(Vec<Match>, u64), StorageError> {
            Ok((Vec::new(), 0))
        }
        async fn ensure_ready(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: AsyncMutex<Vec<(String, ServerEvent)>>,
        rooms: StdMutex<std::collections::HashMap<String, std::collections::HashSet<String>>>,
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

    fn engine() -> (MatchmakingEngine, Arc<RecordingSink>) {
        let store: Arc<dyn RankingStore> = Arc::new(FakeStore::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = MatchmakingEngine::new(store, sink.clone() as Arc<dyn EventSink>);
        (engine, sink)
    }

    #[tokio::test]
    async fn joining_with_one_player_does_not_pair() {
        let (engine, _sink) = engine();
        engine.join_queue("a", "alice").await.unwrap();
        assert_eq!(engine.queue_size(), 1);
    }

    #[tokio::test]
    async fn two_joins_pair_off_immediately() {
        let (engine, sink) = engine();
        engine.join_queue("a", "alice").await.unwrap();
        engine.join_queue("b", "bob").await.unwrap();
        assert_eq!(engine.queue_size(), 0);
        let events = sink.events.lock().await;
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, ServerEvent::MatchFound { .. })));
    }

    #[tokio::test]
    async fn double_join_is_rejected() {
        let (engine, _sink) = engine();
        engine.join_queue("a", "alice").await.unwrap();
        let err = engine.join_queue("a", "alice").await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyQueued));
    }

    #[tokio::test]
    async fn full_happy_path_produces_a_symmetric_match_result() {
        let (engine, sink) = engine();
        engine.join_queue("a", "alice").await.unwrap();
        engine.join_queue("b", "bob").await.unwrap();

        let match_id = {
            let events = sink.events.lock().await;
            let (_, event) = events
                .iter()
                .find(|(_, e)| matches!(e, ServerEvent::MatchFound { .. }))
                .unwrap();
            match event {
                ServerEvent::MatchFound { match_id, .. } => match_id.clone(),
                _ => unreachable!(),
            }
        };

        engine.start_match(&match_id, "a").await.unwrap();
        // Formula-derived score for A{wpm:80,acc:95} is 83.0, not the spec worked example's 79.0.
        engine.submit_complete(&match_id, "a", 80.0, 95.0).await.unwrap();
        engine.submit_complete(&match_id, "b", 70.0, 97.0).await.unwrap();

        let events = sink.events.lock().await;
        let results: Vec<_> = events
            .iter()
            .filter(|(_, e)| matches!(e, ServerEvent::MatchResult { .. }))
            .collect();
        assert_eq!(results.len(), 2, "both players receive a match_result");
        for (_, event) in &results {
            if let ServerEvent::MatchResult {
                winner_id,
                player1_elo_change,
                player2_elo_change,
                ..
            } = event
            {
                assert_eq!(winner_id.as_deref(), Some("a"));
                assert_eq!(*player1_elo_change, 16);
                assert_eq!(*player2_elo_change, -16);
            } else {
                unreachable!()
            }
        }
    }

    /// Fails `create_match` a fixed number of times before delegating to a real `FakeStore`, to
    /// exercise the pair-off rollback path (spec scenario S5) deterministically.
    #[derive(Default)]
    struct FlakyStore {
        inner: FakeStore,
        failures_remaining: StdMutex<u32>,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                inner: FakeStore::default(),
                failures_remaining: StdMutex::new(times),
            }
        }
    }

    #[async_trait]
    impl RankingStore for FlakyStore {
        async fn get_ranking(&self, user_id: &str) -> Result<Option<Ranking>, StorageError> {
            self.inner.get_ranking(user_id).await
        }
        async fn create_ranking(&self, ranking: Ranking) -> Result<Ranking, StorageError> {
            self.inner.create_ranking(ranking).await
        }
        async fn update_ranking(
            &self,
            user_id: &str,
            patch: RankingPatch,
        ) -> Result<Option<Ranking>, StorageError> {
            self.inner.update_ranking(user_id, patch).await
        }
        async fn get_leaderboard(
            &self,
            limit: u32,
            offset: u32,
        ) -> Result<(Vec<Ranking>, u64), StorageError> {
            self.inner.get_leaderboard(limit, offset).await
        }
        async fn create_match(&self, m: Match) -> Result<Match, StorageError> {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Transport("pocketbase unreachable".to_string()));
            }
            drop(remaining);
            self.inner.create_match(m).await
        }
        async fn get_match(&self, match_id: &str) -> Result<Option<Match>, StorageError> {
            self.inner.get_match(match_id).await
        }
        async fn update_match(
            &self,
            match_id: &str,
            patch: MatchPatch,
        ) -> Result<Option<Match>, StorageError> {
            self.inner.update_match(match_id, patch).await
        }
        async fn get_match_history(
            &self,
            user_id: &str,
            limit: u32,
            offset: u32,
        ) -> Result<(Vec<Match>, u64), StorageError> {
            self.inner.get_match_history(user_id, limit, offset).await
        }
        async fn ensure_ready(&self) -> Result<(), StorageError> {
            self.inner.ensure_ready().await
        }
    }

    /// Scenario S5: a failed pair-off rolls both players back to the queue head instead of
    /// dropping either, and a later retry succeeds once the store recovers.
    #[tokio::test]
    async fn pairoff_storage_failure_requeues_both_players_in_order() {
        let store: Arc<dyn RankingStore> = Arc::new(FlakyStore::failing(1));
        let sink = Arc::new(RecordingSink::default());
        let engine = MatchmakingEngine::new(store, sink.clone() as Arc<dyn EventSink>);

        engine.join_queue("a", "alice").await.unwrap();
        engine.join_queue("b", "bob").await.unwrap();

        assert_eq!(
            engine.queue_size(),
            2,
            "a failed pair-off must requeue both players"
        );
        assert!(!sink
            .events
            .lock()
            .await
            .iter()
            .any(|(_, e)| matches!(e, ServerEvent::MatchFound { .. })));

        // The next join re-triggers pair-off; the store has recovered by now.
        engine.join_queue("c", "carol").await.unwrap();

        assert_eq!(engine.queue_size(), 1, "carol is left waiting alone");
        let events = sink.events.lock().await;
        let found: Vec<_> = events
            .iter()
            .filter_map(|(_, e)| match e {
                ServerEvent::MatchFound { opponent, .. } => Some(opponent.id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(found.len(), 2, "alice and bob are paired on the retry");
        assert!(found.contains(&"a".to_string()));
        assert!(found.contains(&"b".to_string()));
    }

    /// Scenario S6: a queued user who never finds an opponent is evicted after the timeout and
    /// may rejoin afterward.
    #[tokio::test]
    async fn stale_queue_entry_is_evicted_and_can_rejoin() {
        let (engine, sink) = engine();
        engine.queue.join_backdated(
            "a",
            "alice",
            crate::queue::QUEUE_TIMEOUT + std::time::Duration::from_secs(1),
        );

        engine.evict_stale_queue_entries().await;

        assert_eq!(engine.queue_size(), 0);
        let events = sink.events.lock().await;
        assert!(events
            .iter()
            .any(|(user_id, e)| user_id == "a" && matches!(e, ServerEvent::QueueTimeout { .. })));
        drop(events);

        engine.join_queue("a", "alice").await.unwrap();
        assert_eq!(engine.queue_size(), 1, "a evicted user may rejoin");
    }
}
