use std::collections::{HashMap, HashSet};
use std::fmt;

use parley_models::gateway::OutboundEvent;
use parley_models::{CallId, ChatId, ConnectionId, MeetingId, UserId};
use tokio::sync::mpsc;

/// Per-connection outbound queue drained by the socket task.
pub type Outbox = mpsc::Sender<OutboundEvent>;

/// Typed delivery scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Message delivery and typing indicators for one chat.
    Chat(ChatId),
    /// Personal room: every connection of one user.
    User(UserId),
    /// The two media connections of an active call.
    Call(CallId),
    Meeting(MeetingId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Chat(id) => write!(f, "chat:{id}"),
            Room::User(id) => write!(f, "user:{id}"),
            Room::Call(id) => write!(f, "call:{id}"),
            Room::Meeting(id) => write!(f, "meeting:{id}"),
        }
    }
}

/// Room membership plus the outbound queue of every attached connection.
///
/// Delivery never blocks: a full queue drops the event, a closed queue is
/// ignored until the socket task reports the disconnect.
#[derive(Default)]
pub struct RoomMultiplexer {
    outboxes: HashMap<ConnectionId, Outbox>,
    members: HashMap<Room, HashSet<ConnectionId>>,
    /// Reverse index: connection -> rooms it joined.
    memberships: HashMap<ConnectionId, HashSet<Room>>,
}

impl RoomMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, connection_id: ConnectionId, outbox: Outbox) {
        self.outboxes.insert(connection_id, outbox);
    }

    /// Drop the connection's queue and every membership it holds.
    /// Returns the rooms it was in.
    pub fn detach(&mut self, connection_id: ConnectionId) -> HashSet<Room> {
        self.outboxes.remove(&connection_id);
        let rooms = self.memberships.remove(&connection_id).unwrap_or_default();
        for room in &rooms {
            self.remove_member(room, connection_id);
        }
        rooms
    }

    pub fn is_attached(&self, connection_id: ConnectionId) -> bool {
        self.outboxes.contains_key(&connection_id)
    }

    /// Returns false for unknown connections or repeated joins.
    pub fn join(&mut self, connection_id: ConnectionId, room: Room) -> bool {
        if !self.is_attached(connection_id) {
            return false;
        }
        let added = self
            .memberships
            .entry(connection_id)
            .or_default()
            .insert(room.clone());
        if added {
            self.members.entry(room).or_default().insert(connection_id);
        }
        added
    }

    pub fn leave(&mut self, connection_id: ConnectionId, room: &Room) -> bool {
        let removed = self
            .memberships
            .get_mut(&connection_id)
            .is_some_and(|rooms| rooms.remove(room));
        if removed {
            self.remove_member(room, connection_id);
        }
        removed
    }

    /// Remove every member of a room.
    pub fn close(&mut self, room: &Room) {
        if let Some(members) = self.members.remove(room) {
            for connection_id in members {
                if let Some(rooms) = self.memberships.get_mut(&connection_id) {
                    rooms.remove(room);
                }
            }
        }
    }

    fn remove_member(&mut self, room: &Room, connection_id: ConnectionId) {
        if let Some(members) = self.members.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.members.remove(room);
            }
        }
    }

    pub fn is_member(&self, connection_id: ConnectionId, room: &Room) -> bool {
        self.members
            .get(room)
            .is_some_and(|members| members.contains(&connection_id))
    }

    pub fn member_count(&self, room: &Room) -> usize {
        self.members.get(room).map_or(0, HashSet::len)
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> impl Iterator<Item = &Room> {
        self.memberships
            .get(&connection_id)
            .into_iter()
            .flat_map(|rooms| rooms.iter())
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }

    pub fn emit_to_connection(&self, connection_id: ConnectionId, event: OutboundEvent) -> bool {
        match self.outboxes.get(&connection_id) {
            Some(outbox) => deliver(connection_id, outbox, event),
            None => false,
        }
    }

    /// Deliver to every member of `room` except `exclude`. Returns the number
    /// of queues that accepted the event.
    pub fn emit_to_room(
        &self,
        room: &Room,
        event: OutboundEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let Some(members) = self.members.get(room) else {
            return 0;
        };
        members
            .iter()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| self.outboxes.get(id).map(|outbox| (*id, outbox)))
            .filter(|(id, outbox)| deliver(*id, outbox, event.clone()))
            .count()
    }

    /// Deliver to every attached connection, registered or not.
    pub fn broadcast(&self, event: OutboundEvent) -> usize {
        self.outboxes
            .iter()
            .filter(|(id, outbox)| deliver(**id, outbox, event.clone()))
            .count()
    }
}

fn deliver(connection_id: ConnectionId, outbox: &Outbox, event: OutboundEvent) -> bool {
    match outbox.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(
                connection_id = %connection_id,
                event = event.name(),
                "outbound queue full, dropping event"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(connection_id = %connection_id, "outbound queue closed");
            false
        }
    }
}
