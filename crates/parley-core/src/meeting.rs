use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parley_models::gateway::OutboundEvent;
use parley_models::meeting::{
    MediaType, MeetingCreate, MeetingJoin, MeetingKind, MeetingSignal, MeetingSummary,
    ParticipantSnapshot, ToggleMedia,
};
use parley_models::user::UserInfo;
use parley_models::{ChatId, ConnectionId, MeetingId, UserId};
use uuid::Uuid;

use crate::error::CoreError;
use crate::rooms::{Room, RoomMultiplexer};

/// Default cap on roster size. Every participant holds a peer connection to
/// every other one.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 16;

#[derive(Debug, Clone)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub info: UserInfo,
    pub audio: bool,
    pub video: bool,
    pub screen_sharing: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    fn new(connection_id: ConnectionId, user_id: &str, info: UserInfo) -> Self {
        Self {
            connection_id,
            user_id: user_id.to_string(),
            info,
            audio: false,
            video: false,
            screen_sharing: false,
            joined_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> ParticipantSnapshot {
        ParticipantSnapshot {
            connection_id: self.connection_id,
            user_id: self.user_id.clone(),
            name: self.info.name.clone(),
            pic: self.info.pic.clone(),
            is_audio_on: self.audio,
            is_video_on: self.video,
            is_screen_sharing: self.screen_sharing,
            joined_at: self.joined_at,
        }
    }
}

/// An N-party meeting scoped to one chat. Never exists with an empty roster.
#[derive(Debug, Clone)]
pub struct MeetingSession {
    pub id: MeetingId,
    pub chat_id: ChatId,
    pub kind: MeetingKind,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    participants: HashMap<ConnectionId, Participant>,
}

impl MeetingSession {
    pub fn participant(&self, connection_id: ConnectionId) -> Option<&Participant> {
        self.participants.get(&connection_id)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Roster in join order.
    pub fn snapshot(&self) -> Vec<ParticipantSnapshot> {
        let mut roster: Vec<&Participant> = self.participants.values().collect();
        roster.sort_by_key(|p| (p.joined_at, p.connection_id));
        roster.into_iter().map(Participant::snapshot).collect()
    }

    pub fn summary(&self) -> MeetingSummary {
        MeetingSummary {
            meeting_id: self.id.clone(),
            meeting_type: self.kind,
            participant_count: self.participants.len(),
            creator_id: self.creator_id.clone(),
        }
    }
}

/// Owns every meeting. At most one meeting runs per chat.
#[derive(Debug)]
pub struct MeetingSessionManager {
    meetings: HashMap<MeetingId, MeetingSession>,
    by_chat: HashMap<ChatId, MeetingId>,
    max_participants: usize,
}

impl Default for MeetingSessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARTICIPANTS)
    }
}

impl MeetingSessionManager {
    pub fn new(max_participants: usize) -> Self {
        Self {
            meetings: HashMap::new(),
            by_chat: HashMap::new(),
            max_participants: max_participants.max(1),
        }
    }

    pub fn create(
        &mut self,
        rooms: &mut RoomMultiplexer,
        connection_id: ConnectionId,
        user_id: &str,
        request: MeetingCreate,
    ) -> Result<MeetingId, CoreError> {
        if let Some(existing) = self.by_chat.get(&request.chat_id) {
            return Err(CoreError::Conflict(format!(
                "meeting {existing} is already running in this chat"
            )));
        }

        let kind = request.meeting_type.unwrap_or_default();
        let meeting_id = format!("meeting_{}_{}", request.chat_id, Uuid::new_v4().simple());
        let creator = Participant::new(connection_id, user_id, request.creator_info.clone());
        let session = MeetingSession {
            id: meeting_id.clone(),
            chat_id: request.chat_id.clone(),
            kind,
            creator_id: user_id.to_string(),
            created_at: Utc::now(),
            participants: HashMap::from([(connection_id, creator)]),
        };
        self.meetings.insert(meeting_id.clone(), session);
        self.by_chat
            .insert(request.chat_id.clone(), meeting_id.clone());
        rooms.join(connection_id, Room::Meeting(meeting_id.clone()));

        rooms.emit_to_connection(
            connection_id,
            OutboundEvent::MeetingCreated {
                meeting_id: meeting_id.clone(),
                meeting_type: kind,
            },
        );
        rooms.emit_to_room(
            &Room::Chat(request.chat_id.clone()),
            OutboundEvent::MeetingStarted {
                meeting_id: meeting_id.clone(),
                chat_id: request.chat_id.clone(),
                creator_info: request.creator_info,
                meeting_type: kind,
            },
            Some(connection_id),
        );
        tracing::info!(
            meeting_id = %meeting_id,
            chat_id = %request.chat_id,
            creator = %user_id,
            kind = ?kind,
            "meeting started"
        );
        Ok(meeting_id)
    }

    pub fn check_active(&self, chat_id: &str) -> Option<MeetingSummary> {
        self.by_chat
            .get(chat_id)
            .and_then(|id| self.meetings.get(id))
            .map(MeetingSession::summary)
    }

    /// Add the connection and return the roster as it was before it joined;
    /// the joiner offers to each of those peers. Joining again from the same
    /// connection only refreshes its metadata.
    pub fn join(
        &mut self,
        rooms: &mut RoomMultiplexer,
        connection_id: ConnectionId,
        user_id: &str,
        request: MeetingJoin,
    ) -> Result<Vec<ParticipantSnapshot>, CoreError> {
        let max_participants = self.max_participants;
        let meeting = self
            .meetings
            .get_mut(&request.meeting_id)
            .ok_or(CoreError::NotFound("meeting"))?;

        if let Some(existing) = meeting.participants.get_mut(&connection_id) {
            existing.info = request.user_info;
            let others: Vec<ParticipantSnapshot> = meeting
                .snapshot()
                .into_iter()
                .filter(|p| p.connection_id != connection_id)
                .collect();
            rooms.emit_to_connection(
                connection_id,
                OutboundEvent::MeetingJoined {
                    meeting_id: request.meeting_id,
                    participants: others.clone(),
                },
            );
            return Ok(others);
        }

        if meeting.participants.len() >= max_participants {
            return Err(CoreError::Full(max_participants));
        }

        let existing = meeting.snapshot();
        meeting.participants.insert(
            connection_id,
            Participant::new(connection_id, user_id, request.user_info.clone()),
        );
        let room = Room::Meeting(request.meeting_id.clone());
        rooms.join(connection_id, room.clone());

        rooms.emit_to_room(
            &room,
            OutboundEvent::MeetingUserJoined {
                meeting_id: request.meeting_id.clone(),
                connection_id,
                user_id: user_id.to_string(),
                user_info: request.user_info,
            },
            Some(connection_id),
        );
        rooms.emit_to_connection(
            connection_id,
            OutboundEvent::MeetingJoined {
                meeting_id: request.meeting_id.clone(),
                participants: existing.clone(),
            },
        );
        tracing::info!(
            meeting_id = %request.meeting_id,
            connection_id = %connection_id,
            participants = meeting.participants.len(),
            "participant joined"
        );
        Ok(existing)
    }

    /// Idempotent. Returns false when the connection was not in the meeting.
    pub fn leave(
        &mut self,
        rooms: &mut RoomMultiplexer,
        connection_id: ConnectionId,
        meeting_id: &str,
    ) -> bool {
        self.remove_participant(rooms, meeting_id, connection_id)
    }

    /// Drop the connection from every meeting it is in.
    pub fn remove_connection(
        &mut self,
        rooms: &mut RoomMultiplexer,
        connection_id: ConnectionId,
    ) -> Vec<MeetingId> {
        let mut ids: Vec<MeetingId> = self
            .meetings
            .values()
            .filter(|m| m.participants.contains_key(&connection_id))
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        for id in &ids {
            self.remove_participant(rooms, id, connection_id);
        }
        ids
    }

    fn remove_participant(
        &mut self,
        rooms: &mut RoomMultiplexer,
        meeting_id: &str,
        connection_id: ConnectionId,
    ) -> bool {
        let Some(meeting) = self.meetings.get_mut(meeting_id) else {
            return false;
        };
        let Some(participant) = meeting.participants.remove(&connection_id) else {
            return false;
        };
        let room = Room::Meeting(meeting_id.to_string());
        rooms.leave(connection_id, &room);

        if meeting.participants.is_empty() {
            let chat_id = meeting.chat_id.clone();
            self.meetings.remove(meeting_id);
            self.by_chat.remove(&chat_id);
            rooms.close(&room);
            rooms.emit_to_room(
                &Room::Chat(chat_id.clone()),
                OutboundEvent::MeetingEnded {
                    meeting_id: meeting_id.to_string(),
                    chat_id: chat_id.clone(),
                },
                None,
            );
            tracing::info!(meeting_id = %meeting_id, chat_id = %chat_id, "meeting ended (last participant left)");
        } else {
            rooms.emit_to_room(
                &room,
                OutboundEvent::MeetingUserLeft {
                    meeting_id: meeting_id.to_string(),
                    connection_id,
                    user_id: participant.user_id,
                },
                None,
            );
            tracing::info!(
                meeting_id = %meeting_id,
                connection_id = %connection_id,
                participants = meeting.participants.len(),
                "participant left"
            );
        }
        true
    }

    /// Point-to-point forwarding. The target is not checked against the
    /// roster; a departed connection simply receives nothing.
    pub fn relay_offer(&self, rooms: &RoomMultiplexer, from: ConnectionId, signal: MeetingSignal) -> bool {
        rooms.emit_to_connection(
            signal.to,
            OutboundEvent::MeetingOffer {
                meeting_id: signal.meeting_id,
                from,
                offer: signal.payload,
            },
        )
    }

    pub fn relay_answer(&self, rooms: &RoomMultiplexer, from: ConnectionId, signal: MeetingSignal) -> bool {
        rooms.emit_to_connection(
            signal.to,
            OutboundEvent::MeetingAnswer {
                meeting_id: signal.meeting_id,
                from,
                answer: signal.payload,
            },
        )
    }

    pub fn relay_ice_candidate(
        &self,
        rooms: &RoomMultiplexer,
        from: ConnectionId,
        signal: MeetingSignal,
    ) -> bool {
        rooms.emit_to_connection(
            signal.to,
            OutboundEvent::MeetingIceCandidate {
                meeting_id: signal.meeting_id,
                from,
                candidate: signal.payload,
            },
        )
    }

    /// Ignored when the connection is not a participant.
    pub fn toggle_media(
        &mut self,
        rooms: &RoomMultiplexer,
        connection_id: ConnectionId,
        request: ToggleMedia,
    ) -> bool {
        let Some(participant) = self.participant_mut(&request.meeting_id, connection_id) else {
            return false;
        };
        match request.media_type {
            MediaType::Audio => participant.audio = request.is_enabled,
            MediaType::Video => participant.video = request.is_enabled,
        }
        rooms.emit_to_room(
            &Room::Meeting(request.meeting_id.clone()),
            OutboundEvent::MeetingMediaToggled {
                meeting_id: request.meeting_id,
                connection_id,
                media_type: request.media_type,
                is_enabled: request.is_enabled,
            },
            Some(connection_id),
        );
        true
    }

    /// Ignored when the connection is not a participant.
    pub fn set_screen_sharing(
        &mut self,
        rooms: &RoomMultiplexer,
        connection_id: ConnectionId,
        meeting_id: &str,
        enabled: bool,
    ) -> bool {
        let Some(participant) = self.participant_mut(meeting_id, connection_id) else {
            return false;
        };
        participant.screen_sharing = enabled;
        let event = if enabled {
            OutboundEvent::MeetingScreenShareStarted {
                meeting_id: meeting_id.to_string(),
                connection_id,
                user_name: participant.info.name.clone(),
            }
        } else {
            OutboundEvent::MeetingScreenShareStopped {
                meeting_id: meeting_id.to_string(),
                connection_id,
            }
        };
        rooms.emit_to_room(
            &Room::Meeting(meeting_id.to_string()),
            event,
            Some(connection_id),
        );
        true
    }

    fn participant_mut(
        &mut self,
        meeting_id: &str,
        connection_id: ConnectionId,
    ) -> Option<&mut Participant> {
        self.meetings
            .get_mut(meeting_id)?
            .participants
            .get_mut(&connection_id)
    }

    pub fn get(&self, meeting_id: &str) -> Option<&MeetingSession> {
        self.meetings.get(meeting_id)
    }

    /// True if any meeting roster still holds the connection.
    pub fn references(&self, connection_id: ConnectionId) -> bool {
        self.meetings
            .values()
            .any(|m| m.participants.contains_key(&connection_id))
    }

    pub fn len(&self) -> usize {
        self.meetings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meetings.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.meetings.values().map(|m| m.participants.len()).sum()
    }
}
