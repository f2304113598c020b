use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::user::UserInfo;
use crate::{ChatId, ConnectionId, MeetingId, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingKind {
    Voice,
    Video,
    #[default]
    Meeting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

/// One roster entry as seen by other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSnapshot {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pic: Option<String>,
    pub is_audio_on: bool,
    pub is_video_on: bool,
    pub is_screen_sharing: bool,
    pub joined_at: DateTime<Utc>,
}

/// Answer to "is there a meeting running in this chat".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSummary {
    pub meeting_id: MeetingId,
    pub meeting_type: MeetingKind,
    pub participant_count: usize,
    pub creator_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingCreate {
    pub chat_id: ChatId,
    #[serde(default)]
    pub creator_info: UserInfo,
    #[serde(default)]
    pub meeting_type: Option<MeetingKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingChat {
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingJoin {
    pub meeting_id: MeetingId,
    #[serde(default)]
    pub user_info: UserInfo,
}

/// Payload of events that only name a meeting (`meeting:leave`, screen share).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRef {
    pub meeting_id: MeetingId,
}

/// Point-to-point WebRTC payload between two meeting connections. The body
/// key differs per event (`offer`, `answer`, `candidate`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSignal {
    pub meeting_id: MeetingId,
    pub to: ConnectionId,
    #[serde(alias = "offer", alias = "answer", alias = "candidate")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleMedia {
    pub meeting_id: MeetingId,
    pub media_type: MediaType,
    pub is_enabled: bool,
}
