//! Online-user fan-out.
//!
//! The full list goes to every attached connection, not a room: any contact
//! list may reference any user.

use parley_models::gateway::OutboundEvent;
use parley_models::ConnectionId;

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomMultiplexer;

/// Returns the number of connections that accepted the update.
pub fn broadcast_online_users(registry: &ConnectionRegistry, rooms: &RoomMultiplexer) -> usize {
    let online = registry.online_user_ids();
    let count = online.len();
    let delivered = rooms.broadcast(OutboundEvent::OnlineUsers(online));
    tracing::debug!(online = count, delivered, "presence broadcast");
    delivered
}

pub fn send_online_users_to(
    registry: &ConnectionRegistry,
    rooms: &RoomMultiplexer,
    connection_id: ConnectionId,
) -> bool {
    rooms.emit_to_connection(
        connection_id,
        OutboundEvent::OnlineUsers(registry.online_user_ids()),
    )
}
