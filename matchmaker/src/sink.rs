//! The one-way call boundary that breaks the coordinator/registry cycle (spec §9): the
//! coordinator emits, an `EventSink` implementation (the gateway's Session Registry) routes.
//! The registry never calls back into the coordinator directly.

use async_trait::async_trait;
use common_net::protocol::ServerEvent;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Best-effort delivery to every live connection bound to `user_id`. Must swallow a
    /// missing/closed connection rather than surface an error — see spec §4.3.
    async fn emit_to_user(&self, user_id: &str, event: ServerEvent);

    /// Adds `user_id` to the logical room `room_id`, so a later `emit_to_room` reaches them.
    /// Default no-op for sinks with no live connections to route to (the standalone
    /// matchmaker binary's logging sink).
    async fn join_room(&self, _user_id: &str, _room_id: &str) {}

    /// Removes `user_id` from `room_id`.
    async fn leave_room(&self, _user_id: &str, _room_id: &str) {}

    /// Delivers the same `event` to every current member of `room_id` — used for match-scoped
    /// broadcasts whose payload is identical for every recipient (spec §4.3).
    async fn emit_to_room(&self, _room_id: &str, _event: ServerEvent) {}
}
