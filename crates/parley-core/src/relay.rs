//! Stateless pass-through for chat messages and typing indicators.

use parley_models::gateway::OutboundEvent;
use parley_models::message::ChatMessage;
use parley_models::ConnectionId;

use crate::rooms::{Room, RoomMultiplexer};

/// Fan a persisted message out to every chat member's personal room except
/// the sender's. Returns the number of connections reached.
pub fn relay_new_message(rooms: &RoomMultiplexer, message: ChatMessage) -> usize {
    if message.chat.users.is_empty() {
        tracing::warn!(chat_id = %message.chat.id, "new message without chat users, not relayed");
        return 0;
    }
    let recipients: Vec<_> = message.recipients().cloned().collect();
    let mut delivered = 0;
    for user_id in recipients {
        delivered += rooms.emit_to_room(
            &Room::User(user_id),
            OutboundEvent::MessageReceived(message.clone()),
            None,
        );
    }
    tracing::debug!(chat_id = %message.chat.id, delivered, "message relayed");
    delivered
}

pub fn relay_typing(rooms: &RoomMultiplexer, from: ConnectionId, chat_id: String, typing: bool) {
    let room = Room::Chat(chat_id.clone());
    let event = if typing {
        OutboundEvent::Typing(chat_id)
    } else {
        OutboundEvent::StopTyping(chat_id)
    };
    rooms.emit_to_room(&room, event, Some(from));
}
