//! Session Registry (spec §4.3): routes outbound `ServerEvent`s to every live WebSocket
//! connection bound to a `userId`, and tracks logical room membership for match-scoped
//! broadcasts. Grounded on the teacher's existing `dashmap` dependency and its
//! `AppState`-holds-shared-registries shape (`gateway/src/lib.rs`).
//!
//! A user may have more than one concurrent connection (e.g. two tabs); all of them receive
//! targeted emits, matching the spec's "a user may have multiple concurrent connections; all
//! receive targeted emits" requirement rather than a single-active-socket assumption.

use std::collections::HashSet;

use async_trait::async_trait;
use common_net::protocol::ServerEvent;
use dashmap::DashMap;
use matchmaker::sink::EventSink;
use tokio::sync::mpsc;
use tracing::debug;

pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<ServerEvent>;

#[derive(Default)]
pub struct SessionRegistry {
    connections: DashMap<String, Vec<OutboundSender>>,
    rooms: DashMap<String, HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a fresh outbound channel for `user_id`, alongside any other connections already
    /// live for the same user. Returns both halves: the connection's write loop drains the
    /// receiver, and keeps the sender around to pass back into `unbind` once the connection
    /// closes.
    pub fn bind(&self, user_id: &str) -> (OutboundSender, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .entry(user_id.to_string())
            .or_default()
            .push(tx.clone());
        (tx, rx)
    }

    /// Removes `sender` from `user_id`'s live connections. A no-op if it was already removed
    /// (e.g. a duplicate unbind racing a fresher bind for the same socket).
    pub fn unbind(&self, user_id: &str, sender: &OutboundSender) {
        let mut now_empty = false;
        if let Some(mut senders) = self.connections.get_mut(user_id) {
            senders.retain(|s| !s.same_channel(sender));
            now_empty = senders.is_empty();
        }
        if now_empty {
            self.connections.remove(user_id);
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections
            .get(user_id)
            .map(|senders| !senders.is_empty())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl EventSink for SessionRegistry {
    /// Fans the event out to every live connection bound to `user_id`, pruning any that have
    /// gone stale (their receiver dropped without an `unbind` — e.g. a crashed task).
    async fn emit_to_user(&self, user_id: &str, event: ServerEvent) {
        let Some(mut senders) = self.connections.get_mut(user_id) else {
            debug!(user_id, "no live connection, dropping event");
            return;
        };
        senders.retain(|sender| sender.send(event.clone()).is_ok());
        if senders.is_empty() {
            drop(senders);
            self.connections.remove(user_id);
        }
    }

    async fn join_room(&self, user_id: &str, room_id: &str) {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    async fn leave_room(&self, user_id: &str, room_id: &str) {
        let mut now_empty = false;
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(user_id);
            now_empty = members.is_empty();
        }
        if now_empty {
            self.rooms.remove(room_id);
        }
    }

    async fn emit_to_room(&self, room_id: &str, event: ServerEvent) {
        let Some(members) = self.rooms.get(room_id).map(|members| members.clone()) else {
            debug!(room_id, "emit_to_room on an empty or unknown room");
            return;
        };
        for user_id in members {
            self.emit_to_user(&user_id, event.clone()).await;
        }
    }
}
