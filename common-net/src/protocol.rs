//! Wire vocabulary for the pvp realtime channel (spec §6.2).
//!
//! Each event is a tagged JSON object keyed on `type`, following the same discriminated-payload
//! idiom the teacher uses for its control/state frames, generalized to one flat tag space that
//! covers both the `pvp:*` namespace and the legacy uppercase variants side by side.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "pvp:join_queue")]
    JoinQueue {},
    #[serde(rename = "pvp:leave_queue")]
    LeaveQueue {},
    #[serde(rename = "ACCEPT_MATCH")]
    AcceptMatch {
        #[serde(rename = "matchId")]
        match_id: String,
    },
    #[serde(rename = "MATCH_PROGRESS")]
    MatchProgress {
        #[serde(rename = "matchId")]
        match_id: String,
        wpm: f64,
        acc: f64,
    },
    #[serde(rename = "MATCH_COMPLETE")]
    MatchComplete {
        #[serde(rename = "matchId")]
        match_id: String,
        wpm: f64,
        acc: f64,
    },
    #[serde(rename = "FORFEIT")]
    Forfeit {
        #[serde(rename = "matchId")]
        match_id: String,
    },
    #[serde(rename = "RECONNECT")]
    Reconnect {
        #[serde(rename = "matchId")]
        match_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerRef {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpponentRef {
    pub id: String,
    pub username: String,
    pub elo: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "pvp:queue_joined")]
    QueueJoined { queue_size: usize, message: String },
    #[serde(rename = "pvp:queue_left")]
    QueueLeft { message: String },
    #[serde(rename = "pvp:queue_status")]
    QueueStatus { queue_size: usize },
    #[serde(rename = "pvp:queue_timeout")]
    QueueTimeout { message: String },
    #[serde(rename = "pvp:match_found")]
    MatchFound {
        match_id: String,
        opponent: OpponentRef,
    },
    #[serde(rename = "pvp:game_start")]
    GameStart {
        match_id: String,
        player1: PlayerRef,
        player2: PlayerRef,
        start_time: i64,
        test_duration: u32,
    },
    #[serde(rename = "pvp:opponent_progress")]
    OpponentProgress {
        match_id: String,
        opponent_wpm: f64,
        opponent_accuracy: f64,
        timestamp: i64,
    },
    #[serde(rename = "pvp:match_result")]
    MatchResult {
        match_id: String,
        winner_id: Option<String>,
        winner_name: Option<String>,
        player1_id: String,
        player1_name: String,
        player1_wpm: f64,
        player1_accuracy: f64,
        player1_elo_change: i32,
        player2_id: String,
        player2_name: String,
        player2_wpm: f64,
        player2_accuracy: f64,
        player2_elo_change: i32,
        match_duration: i64,
    },
    #[serde(rename = "pvp:match_timeout")]
    MatchTimeout { match_id: String, message: String },
    #[serde(rename = "OPPONENT_FINISHED")]
    OpponentFinished {
        match_id: String,
        wpm: f64,
        acc: f64,
    },
    #[serde(rename = "OPPONENT_FORFEITED")]
    OpponentForfeited { match_id: String },
    #[serde(rename = "OPPONENT_RECONNECTED")]
    OpponentReconnected { match_id: String },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
