use chrono::{DateTime, Utc};
use parley_models::gateway::InboundEvent;
use parley_models::{ConnectionId, UserId};

/// Socket-side view of one connection. The hub holds the authoritative
/// registration; this only tracks what the socket needs for rate limiting
/// and logs.
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: Option<UserId>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4(),
            user_id: None,
            connected_at: Utc::now(),
        }
    }

    /// The first `setup` fixes the identity for the socket's lifetime.
    pub fn observe(&mut self, event: &InboundEvent) {
        if let (None, InboundEvent::Setup(setup)) = (&self.user_id, event) {
            self.user_id = Some(setup.user_id.clone());
        }
    }

    /// Budgets are shared by all sockets of a user once identified.
    pub fn rate_key(&self) -> String {
        match &self.user_id {
            Some(user_id) => format!("u:{user_id}"),
            None => format!("c:{}", self.connection_id),
        }
    }

    pub fn user_label(&self) -> &str {
        self.user_id.as_deref().unwrap_or("-")
    }
}
