use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parley_models::user::UserInfo;
use parley_models::{ConnectionId, UserId};

/// A registered transport connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub info: UserInfo,
    pub registered_at: DateTime<Utc>,
}

/// Result of unregistering a connection that had been registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub user_id: UserId,
    /// The user's last connection closed and they left the online set.
    pub went_offline: bool,
}

/// Maps users to their live connections. The online set is derived: a user is
/// online iff they hold at least one registered connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    presence: HashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a user. Idempotent; a repeated call only
    /// refreshes the cached metadata. A connection's identity never changes,
    /// so a call naming a different user is ignored.
    ///
    /// Returns true when the online set changed.
    pub fn register(&mut self, connection_id: ConnectionId, user_id: &str, info: UserInfo) -> bool {
        if let Some(existing) = self.connections.get_mut(&connection_id) {
            if existing.user_id == user_id {
                existing.info = info;
            } else {
                tracing::warn!(
                    connection_id = %connection_id,
                    registered_as = %existing.user_id,
                    attempted = %user_id,
                    "ignoring setup with a different identity"
                );
            }
            return false;
        }

        self.connections.insert(
            connection_id,
            Connection {
                id: connection_id,
                user_id: user_id.to_string(),
                info,
                registered_at: Utc::now(),
            },
        );
        let sockets = self.presence.entry(user_id.to_string()).or_default();
        sockets.insert(connection_id);
        sockets.len() == 1
    }

    /// Safe for connections that never registered.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<Departure> {
        let connection = self.connections.remove(&connection_id)?;
        let went_offline = match self.presence.get_mut(&connection.user_id) {
            Some(sockets) => {
                sockets.remove(&connection_id);
                sockets.is_empty()
            }
            None => false,
        };
        if went_offline {
            self.presence.remove(&connection.user_id);
        }
        Some(Departure {
            user_id: connection.user_id,
            went_offline,
        })
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<&UserId> {
        self.connections.get(&connection_id).map(|c| &c.user_id)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.contains_key(user_id)
    }

    pub fn connections_of(&self, user_id: &str) -> usize {
        self.presence.get(user_id).map_or(0, HashSet::len)
    }

    /// Sorted so successive broadcasts of the same set are identical.
    pub fn online_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.presence.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn online_count(&self) -> usize {
        self.presence.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
