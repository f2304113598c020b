use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parley_models::call::{
    CallAccept, CallEnd, CallIceCandidate, CallInitiate, CallKind, CallReject, CallStatus,
};
use parley_models::gateway::OutboundEvent;
use parley_models::{CallId, ConnectionId, UserId};
use uuid::Uuid;

use crate::error::CoreError;
use crate::rooms::{Room, RoomMultiplexer};

pub const REASON_DISCONNECT: &str = "disconnect";
pub const REASON_TIMEOUT: &str = "timeout";
pub const REASON_BUSY: &str = "busy";

#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// Refuse a second initiate while the same pair already has a call.
    pub reject_duplicates: bool,
    /// Ringing calls older than this are expired by the sweep. `None` keeps
    /// them until accept, reject, end or disconnect.
    pub ring_timeout: Option<Duration>,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            reject_duplicates: false,
            ring_timeout: Some(Duration::seconds(45)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: CallId,
    pub caller: UserId,
    pub callee: UserId,
    pub kind: CallKind,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn involves(&self, user_id: &str) -> bool {
        self.caller == user_id || self.callee == user_id
    }

    pub fn counterpart(&self, user_id: &str) -> Option<&UserId> {
        if self.caller == user_id {
            Some(&self.callee)
        } else if self.callee == user_id {
            Some(&self.caller)
        } else {
            None
        }
    }

    fn pairs(&self, a: &str, b: &str) -> bool {
        (self.caller == a && self.callee == b) || (self.caller == b && self.callee == a)
    }
}

/// Owns every 1:1 call. Ended calls are removed, never kept in a terminal
/// state, so resolving an unknown id is a no-op.
#[derive(Debug, Default)]
pub struct CallSessionManager {
    sessions: HashMap<CallId, CallSession>,
    policy: CallPolicy,
}

impl CallSessionManager {
    pub fn new(policy: CallPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            policy,
        }
    }

    pub fn initiate(
        &mut self,
        rooms: &mut RoomMultiplexer,
        connection_id: ConnectionId,
        caller: &str,
        request: CallInitiate,
    ) -> Result<CallId, CoreError> {
        if request.to == caller {
            return Err(CoreError::InvalidState("cannot call yourself".into()));
        }
        if self.policy.reject_duplicates
            && self.sessions.values().any(|s| s.pairs(caller, &request.to))
        {
            return Err(CoreError::Conflict(format!(
                "a call with {} is already in progress",
                request.to
            )));
        }

        let call_id = format!("call_{}", Uuid::new_v4().simple());
        self.sessions.insert(
            call_id.clone(),
            CallSession {
                id: call_id.clone(),
                caller: caller.to_string(),
                callee: request.to.clone(),
                kind: request.call_type,
                status: CallStatus::Ringing,
                created_at: Utc::now(),
                started_at: None,
            },
        );
        rooms.join(connection_id, Room::Call(call_id.clone()));

        let reached = rooms.emit_to_room(
            &Room::User(request.to.clone()),
            OutboundEvent::CallIncoming {
                call_id: call_id.clone(),
                from: caller.to_string(),
                caller_info: request.caller_info,
                call_type: request.call_type,
                offer: request.offer,
            },
            Some(connection_id),
        );
        rooms.emit_to_connection(
            connection_id,
            OutboundEvent::CallInitiated {
                call_id: call_id.clone(),
            },
        );
        tracing::info!(
            call_id = %call_id,
            caller = %caller,
            callee = %request.to,
            kind = ?request.call_type,
            reached,
            "call ringing"
        );
        Ok(call_id)
    }

    /// Only the callee may accept, and only while ringing.
    pub fn accept(
        &mut self,
        rooms: &mut RoomMultiplexer,
        connection_id: ConnectionId,
        user_id: &str,
        request: CallAccept,
    ) -> Result<(), CoreError> {
        let session = self
            .sessions
            .get_mut(&request.call_id)
            .ok_or(CoreError::NotFound("call"))?;
        if session.callee != user_id {
            return Err(CoreError::Forbidden);
        }
        if session.status != CallStatus::Ringing {
            return Err(CoreError::InvalidState("call is not ringing".into()));
        }

        session.status = CallStatus::Active;
        session.started_at = Some(Utc::now());
        let caller = session.caller.clone();
        rooms.join(connection_id, Room::Call(request.call_id.clone()));
        rooms.emit_to_room(
            &Room::User(caller),
            OutboundEvent::CallAccepted {
                call_id: request.call_id.clone(),
                answer: request.answer,
            },
            None,
        );
        tracing::info!(call_id = %request.call_id, "call active");
        Ok(())
    }

    /// Returns false when the call was already gone.
    pub fn reject(
        &mut self,
        rooms: &mut RoomMultiplexer,
        user_id: &str,
        request: CallReject,
    ) -> Result<bool, CoreError> {
        let Some(session) = self.take_for(rooms, user_id, &request.call_id)? else {
            return Ok(false);
        };
        if let Some(other) = session.counterpart(user_id) {
            rooms.emit_to_room(
                &Room::User(other.clone()),
                OutboundEvent::CallRejected {
                    call_id: session.id.clone(),
                    reason: request.reason.clone(),
                },
                None,
            );
        }
        tracing::info!(call_id = %session.id, reason = ?request.reason, "call rejected");
        Ok(true)
    }

    /// Idempotent: both parties hanging up at once is fine.
    pub fn end(
        &mut self,
        rooms: &mut RoomMultiplexer,
        user_id: &str,
        request: CallEnd,
    ) -> Result<bool, CoreError> {
        let Some(session) = self.take_for(rooms, user_id, &request.call_id)? else {
            return Ok(false);
        };
        if let Some(other) = session.counterpart(user_id) {
            rooms.emit_to_room(
                &Room::User(other.clone()),
                OutboundEvent::CallEnded {
                    call_id: session.id.clone(),
                    reason: None,
                },
                None,
            );
        }
        tracing::info!(call_id = %session.id, "call ended");
        Ok(true)
    }

    /// Pure forwarding. Candidates for an active call go to the call room
    /// when the sender and the counterpart's media connection are both in
    /// it, otherwise to every device of `to`.
    pub fn relay_ice_candidate(
        &self,
        rooms: &RoomMultiplexer,
        connection_id: ConnectionId,
        user_id: &str,
        request: CallIceCandidate,
    ) -> usize {
        let event = OutboundEvent::CallIceCandidate {
            candidate: request.candidate,
            from: user_id.to_string(),
            call_id: request.call_id.clone(),
        };
        let in_call_room = request
            .call_id
            .as_ref()
            .and_then(|id| self.sessions.get(id))
            .filter(|s| s.status == CallStatus::Active && s.involves(user_id))
            .map(|s| Room::Call(s.id.clone()))
            .filter(|room| {
                rooms.is_member(connection_id, room) && rooms.member_count(room) > 1
            });
        let room = in_call_room.unwrap_or(Room::User(request.to));
        rooms.emit_to_room(&room, event, Some(connection_id))
    }

    /// Force-end every call the user is part of, telling each counterpart why.
    pub fn end_all_for_user(
        &mut self,
        rooms: &mut RoomMultiplexer,
        user_id: &str,
        reason: &str,
    ) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self
            .sessions
            .values()
            .filter(|s| s.involves(user_id))
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        for id in &ids {
            let Some(session) = self.take(rooms, id) else {
                continue;
            };
            if let Some(other) = session.counterpart(user_id) {
                rooms.emit_to_room(
                    &Room::User(other.clone()),
                    OutboundEvent::CallEnded {
                        call_id: id.clone(),
                        reason: Some(reason.to_string()),
                    },
                    None,
                );
            }
            tracing::info!(call_id = %id, user_id = %user_id, reason, "call force-ended");
        }
        ids
    }

    /// End calls that have been ringing longer than the policy allows. Both
    /// parties are told.
    pub fn expire_ringing(&mut self, rooms: &mut RoomMultiplexer, now: DateTime<Utc>) -> Vec<CallId> {
        let Some(timeout) = self.policy.ring_timeout else {
            return Vec::new();
        };
        let mut expired: Vec<CallId> = self
            .sessions
            .values()
            .filter(|s| s.status == CallStatus::Ringing && now - s.created_at >= timeout)
            .map(|s| s.id.clone())
            .collect();
        expired.sort();
        for id in &expired {
            let Some(session) = self.take(rooms, id) else {
                continue;
            };
            for party in [&session.caller, &session.callee] {
                rooms.emit_to_room(
                    &Room::User(party.clone()),
                    OutboundEvent::CallEnded {
                        call_id: id.clone(),
                        reason: Some(REASON_TIMEOUT.to_string()),
                    },
                    None,
                );
            }
            tracing::info!(call_id = %id, "ringing call expired");
        }
        expired
    }

    pub fn get(&self, call_id: &str) -> Option<&CallSession> {
        self.sessions.get(call_id)
    }

    pub fn sessions_for<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a CallSession> {
        self.sessions.values().filter(move |s| s.involves(user_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove a call the requester is party to. `Ok(None)` if already gone.
    fn take_for(
        &mut self,
        rooms: &mut RoomMultiplexer,
        user_id: &str,
        call_id: &str,
    ) -> Result<Option<CallSession>, CoreError> {
        match self.sessions.get(call_id) {
            None => Ok(None),
            Some(session) if !session.involves(user_id) => Err(CoreError::Forbidden),
            Some(_) => Ok(self.take(rooms, call_id)),
        }
    }

    fn take(&mut self, rooms: &mut RoomMultiplexer, call_id: &str) -> Option<CallSession> {
        let session = self.sessions.remove(call_id)?;
        rooms.close(&Room::Call(session.id.clone()));
        Some(session)
    }
}
