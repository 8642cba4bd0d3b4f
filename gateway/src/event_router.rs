//! Event Router (spec §4.6): decodes an inbound `ClientEvent` and dispatches it to the
//! `MatchmakingEngine`. Grounded on `gateway/src/lib.rs`'s `ws_session` inbound-frame match arm,
//! generalized from the binary `Frame`/`FramePayload` wire format to the tagged-JSON
//! `ClientEvent` enum.

use common_net::protocol::{ClientEvent, ServerEvent};
use matchmaker::MatchmakingEngine;
use tracing::warn;

/// Parses a raw inbound text frame and dispatches it. Progress/complete/forfeit events
/// targeting a non-active match, or sent by a non-participant, are discarded with a logged
/// warning rather than surfaced to the client as an `error` event — the spec treats these as
/// benign races (a reconnect or a late retransmit), not client-facing failures.
pub async fn route_inbound(
    engine: &MatchmakingEngine,
    user_id: &str,
    username: &str,
    raw: &str,
) -> Option<ServerEvent> {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(err) => {
            warn!(%err, user_id, "discarding unparseable client event");
            return Some(ServerEvent::Error {
                message: "malformed event".to_string(),
            });
        }
    };

    match event {
        ClientEvent::JoinQueue {} => {
            if let Err(err) = engine.join_queue(user_id, username).await {
                warn!(%err, user_id, "join_queue rejected");
                return Some(ServerEvent::Error {
                    message: err.to_string(),
                });
            }
            None
        }
        ClientEvent::LeaveQueue {} => {
            if let Err(err) = engine.leave_queue(user_id).await {
                warn!(%err, user_id, "leave_queue rejected");
                return Some(ServerEvent::Error {
                    message: err.to_string(),
                });
            }
            None
        }
        ClientEvent::AcceptMatch { match_id } => {
            if let Err(err) = engine.start_match(&match_id, user_id).await {
                warn!(%err, user_id, match_id, "accept_match discarded");
            }
            None
        }
        ClientEvent::MatchProgress { match_id, wpm, acc } => {
            if let Err(err) = engine.submit_progress(&match_id, user_id, wpm, acc).await {
                warn!(%err, user_id, match_id, "match_progress discarded");
            }
            None
        }
        ClientEvent::MatchComplete { match_id, wpm, acc } => {
            if let Err(err) = engine.submit_complete(&match_id, user_id, wpm, acc).await {
                warn!(%err, user_id, match_id, "match_complete discarded");
            }
            None
        }
        ClientEvent::Forfeit { match_id } => {
            if let Err(err) = engine.forfeit(&match_id, user_id).await {
                warn!(%err, user_id, match_id, "forfeit discarded");
            }
            None
        }
        ClientEvent::Reconnect { match_id } => {
            if let Err(err) = engine.reconnect(&match_id, user_id).await {
                warn!(%err, user_id, match_id, "reconnect discarded");
            }
            None
        }
    }
}
