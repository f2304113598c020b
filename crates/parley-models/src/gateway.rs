//! Socket event vocabulary.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`; `data`
//! is absent for events without a payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call::{CallAccept, CallEnd, CallIceCandidate, CallInitiate, CallKind, CallReject};
use crate::meeting::{
    MediaType, MeetingChat, MeetingCreate, MeetingJoin, MeetingKind, MeetingRef, MeetingSignal,
    MeetingSummary, ParticipantSnapshot, ToggleMedia,
};
use crate::message::ChatMessage;
use crate::user::{Setup, UserInfo};
use crate::{CallId, ChatId, ConnectionId, MeetingId, UserId};

// Error codes carried by `error`, `call:error` and `meeting:error`.
pub const ERR_INVALID_EVENT: &str = "INVALID_EVENT";
pub const ERR_RATE_LIMITED: &str = "RATE_LIMITED";
pub const ERR_SETUP_REQUIRED: &str = "SETUP_REQUIRED";
pub const ERR_TOO_MANY_CONNECTIONS: &str = "TOO_MANY_CONNECTIONS";
pub const ERR_NOT_FOUND: &str = "NOT_FOUND";
pub const ERR_INVALID_STATE: &str = "INVALID_STATE";
pub const ERR_FORBIDDEN: &str = "FORBIDDEN";
pub const ERR_CONFLICT: &str = "CONFLICT";
pub const ERR_FULL: &str = "FULL";
pub const ERR_UNAVAILABLE: &str = "UNAVAILABLE";

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "setup")]
    Setup(Setup),
    #[serde(rename = "get online users")]
    GetOnlineUsers,
    #[serde(rename = "join chat")]
    JoinChat(ChatId),
    #[serde(rename = "leave chat")]
    LeaveChat(ChatId),
    #[serde(rename = "typing")]
    Typing(ChatId),
    #[serde(rename = "stop typing")]
    StopTyping(ChatId),
    #[serde(rename = "new message")]
    NewMessage(ChatMessage),

    #[serde(rename = "call:initiate")]
    CallInitiate(CallInitiate),
    #[serde(rename = "call:accept")]
    CallAccept(CallAccept),
    #[serde(rename = "call:reject")]
    CallReject(CallReject),
    #[serde(rename = "call:end")]
    CallEnd(CallEnd),
    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate(CallIceCandidate),

    #[serde(rename = "meeting:create")]
    MeetingCreate(MeetingCreate),
    #[serde(rename = "meeting:check-active")]
    MeetingCheckActive(MeetingChat),
    #[serde(rename = "meeting:join")]
    MeetingJoin(MeetingJoin),
    #[serde(rename = "meeting:leave")]
    MeetingLeave(MeetingRef),
    #[serde(rename = "meeting:offer")]
    MeetingOffer(MeetingSignal),
    #[serde(rename = "meeting:answer")]
    MeetingAnswer(MeetingSignal),
    #[serde(rename = "meeting:ice-candidate")]
    MeetingIceCandidate(MeetingSignal),
    #[serde(rename = "meeting:toggle-media")]
    MeetingToggleMedia(ToggleMedia),
    #[serde(rename = "meeting:screen-share-start")]
    MeetingScreenShareStart(MeetingRef),
    #[serde(rename = "meeting:screen-share-stop")]
    MeetingScreenShareStop(MeetingRef),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Setup(_) => "setup",
            InboundEvent::GetOnlineUsers => "get online users",
            InboundEvent::JoinChat(_) => "join chat",
            InboundEvent::LeaveChat(_) => "leave chat",
            InboundEvent::Typing(_) => "typing",
            InboundEvent::StopTyping(_) => "stop typing",
            InboundEvent::NewMessage(_) => "new message",
            InboundEvent::CallInitiate(_) => "call:initiate",
            InboundEvent::CallAccept(_) => "call:accept",
            InboundEvent::CallReject(_) => "call:reject",
            InboundEvent::CallEnd(_) => "call:end",
            InboundEvent::CallIceCandidate(_) => "call:ice-candidate",
            InboundEvent::MeetingCreate(_) => "meeting:create",
            InboundEvent::MeetingCheckActive(_) => "meeting:check-active",
            InboundEvent::MeetingJoin(_) => "meeting:join",
            InboundEvent::MeetingLeave(_) => "meeting:leave",
            InboundEvent::MeetingOffer(_) => "meeting:offer",
            InboundEvent::MeetingAnswer(_) => "meeting:answer",
            InboundEvent::MeetingIceCandidate(_) => "meeting:ice-candidate",
            InboundEvent::MeetingToggleMedia(_) => "meeting:toggle-media",
            InboundEvent::MeetingScreenShareStart(_) => "meeting:screen-share-start",
            InboundEvent::MeetingScreenShareStop(_) => "meeting:screen-share-stop",
        }
    }

    /// Typing indicators are high frequency and dropped silently when throttled.
    pub fn is_typing(&self) -> bool {
        matches!(self, InboundEvent::Typing(_) | InboundEvent::StopTyping(_))
    }
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "online users updated")]
    OnlineUsers(Vec<UserId>),
    #[serde(rename = "typing")]
    Typing(ChatId),
    #[serde(rename = "stop typing")]
    StopTyping(ChatId),
    #[serde(rename = "message received")]
    MessageReceived(ChatMessage),

    #[serde(rename = "call:initiated", rename_all = "camelCase")]
    CallInitiated { call_id: CallId },
    #[serde(rename = "call:incoming", rename_all = "camelCase")]
    CallIncoming {
        call_id: CallId,
        from: UserId,
        caller_info: UserInfo,
        call_type: CallKind,
        offer: Value,
    },
    #[serde(rename = "call:accepted", rename_all = "camelCase")]
    CallAccepted { call_id: CallId, answer: Value },
    #[serde(rename = "call:rejected", rename_all = "camelCase")]
    CallRejected {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "call:ended", rename_all = "camelCase")]
    CallEnded {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "call:ice-candidate", rename_all = "camelCase")]
    CallIceCandidate {
        candidate: Value,
        from: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<CallId>,
    },
    #[serde(rename = "call:error", rename_all = "camelCase")]
    CallError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<CallId>,
        code: String,
        message: String,
    },

    #[serde(rename = "meeting:created", rename_all = "camelCase")]
    MeetingCreated {
        meeting_id: MeetingId,
        meeting_type: MeetingKind,
    },
    #[serde(rename = "meeting:started", rename_all = "camelCase")]
    MeetingStarted {
        meeting_id: MeetingId,
        chat_id: ChatId,
        creator_info: UserInfo,
        meeting_type: MeetingKind,
    },
    #[serde(rename = "meeting:active-status", rename_all = "camelCase")]
    MeetingActiveStatus {
        chat_id: ChatId,
        active_meeting: Option<MeetingSummary>,
    },
    #[serde(rename = "meeting:joined", rename_all = "camelCase")]
    MeetingJoined {
        meeting_id: MeetingId,
        participants: Vec<ParticipantSnapshot>,
    },
    #[serde(rename = "meeting:user-joined", rename_all = "camelCase")]
    MeetingUserJoined {
        meeting_id: MeetingId,
        connection_id: ConnectionId,
        user_id: UserId,
        user_info: UserInfo,
    },
    #[serde(rename = "meeting:user-left", rename_all = "camelCase")]
    MeetingUserLeft {
        meeting_id: MeetingId,
        connection_id: ConnectionId,
        user_id: UserId,
    },
    #[serde(rename = "meeting:offer", rename_all = "camelCase")]
    MeetingOffer {
        meeting_id: MeetingId,
        from: ConnectionId,
        offer: Value,
    },
    #[serde(rename = "meeting:answer", rename_all = "camelCase")]
    MeetingAnswer {
        meeting_id: MeetingId,
        from: ConnectionId,
        answer: Value,
    },
    #[serde(rename = "meeting:ice-candidate", rename_all = "camelCase")]
    MeetingIceCandidate {
        meeting_id: MeetingId,
        from: ConnectionId,
        candidate: Value,
    },
    #[serde(rename = "meeting:media-toggled", rename_all = "camelCase")]
    MeetingMediaToggled {
        meeting_id: MeetingId,
        connection_id: ConnectionId,
        media_type: MediaType,
        is_enabled: bool,
    },
    #[serde(rename = "meeting:screen-share-started", rename_all = "camelCase")]
    MeetingScreenShareStarted {
        meeting_id: MeetingId,
        connection_id: ConnectionId,
        user_name: String,
    },
    #[serde(rename = "meeting:screen-share-stopped", rename_all = "camelCase")]
    MeetingScreenShareStopped {
        meeting_id: MeetingId,
        connection_id: ConnectionId,
    },
    #[serde(rename = "meeting:ended", rename_all = "camelCase")]
    MeetingEnded { meeting_id: MeetingId, chat_id: ChatId },
    #[serde(rename = "meeting:error", rename_all = "camelCase")]
    MeetingError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meeting_id: Option<MeetingId>,
        code: String,
        message: String,
    },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Connected => "connected",
            OutboundEvent::OnlineUsers(_) => "online users updated",
            OutboundEvent::Typing(_) => "typing",
            OutboundEvent::StopTyping(_) => "stop typing",
            OutboundEvent::MessageReceived(_) => "message received",
            OutboundEvent::CallInitiated { .. } => "call:initiated",
            OutboundEvent::CallIncoming { .. } => "call:incoming",
            OutboundEvent::CallAccepted { .. } => "call:accepted",
            OutboundEvent::CallRejected { .. } => "call:rejected",
            OutboundEvent::CallEnded { .. } => "call:ended",
            OutboundEvent::CallIceCandidate { .. } => "call:ice-candidate",
            OutboundEvent::CallError { .. } => "call:error",
            OutboundEvent::MeetingCreated { .. } => "meeting:created",
            OutboundEvent::MeetingStarted { .. } => "meeting:started",
            OutboundEvent::MeetingActiveStatus { .. } => "meeting:active-status",
            OutboundEvent::MeetingJoined { .. } => "meeting:joined",
            OutboundEvent::MeetingUserJoined { .. } => "meeting:user-joined",
            OutboundEvent::MeetingUserLeft { .. } => "meeting:user-left",
            OutboundEvent::MeetingOffer { .. } => "meeting:offer",
            OutboundEvent::MeetingAnswer { .. } => "meeting:answer",
            OutboundEvent::MeetingIceCandidate { .. } => "meeting:ice-candidate",
            OutboundEvent::MeetingMediaToggled { .. } => "meeting:media-toggled",
            OutboundEvent::MeetingScreenShareStarted { .. } => "meeting:screen-share-started",
            OutboundEvent::MeetingScreenShareStopped { .. } => "meeting:screen-share-stopped",
            OutboundEvent::MeetingEnded { .. } => "meeting:ended",
            OutboundEvent::MeetingError { .. } => "meeting:error",
            OutboundEvent::Error { .. } => "error",
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payloadless_event_needs_no_data() {
        let event: InboundEvent = serde_json::from_str(r#"{"event":"get online users"}"#).unwrap();
        assert_eq!(event, InboundEvent::GetOnlineUsers);
        assert_eq!(
            serde_json::to_value(OutboundEvent::Connected).unwrap(),
            json!({ "event": "connected" })
        );
    }

    #[test]
    fn bare_chat_id_payloads() {
        let event: InboundEvent =
            serde_json::from_str(r#"{"event":"typing","data":"chat-9"}"#).unwrap();
        assert_eq!(event, InboundEvent::Typing("chat-9".into()));
        assert!(event.is_typing());
    }

    #[test]
    fn call_initiate_uses_camel_case_keys() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "call:initiate",
            "data": { "to": "u2", "callType": "video", "offer": { "sdp": "o" }, "callerInfo": { "name": "Ada" } }
        }))
        .unwrap();
        let InboundEvent::CallInitiate(initiate) = event else {
            panic!("expected call:initiate");
        };
        assert_eq!(initiate.to, "u2");
        assert_eq!(initiate.call_type, CallKind::Video);
        assert_eq!(initiate.caller_info.name, "Ada");
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result = serde_json::from_str::<InboundEvent>(r#"{"event":"call:teleport","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn active_status_serializes_explicit_null() {
        let event = OutboundEvent::MeetingActiveStatus {
            chat_id: "c1".into(),
            active_meeting: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "meeting:active-status", "data": { "chatId": "c1", "activeMeeting": null } })
        );
    }

    #[test]
    fn ended_reason_is_omitted_when_absent() {
        let event = OutboundEvent::CallEnded {
            call_id: "call_1".into(),
            reason: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "call:ended", "data": { "callId": "call_1" } })
        );
    }

    #[test]
    fn names_match_wire_tags() {
        let events = [
            OutboundEvent::Connected,
            OutboundEvent::OnlineUsers(vec!["u1".into()]),
            OutboundEvent::CallInitiated { call_id: "c".into() },
            OutboundEvent::MeetingEnded {
                meeting_id: "m".into(),
                chat_id: "c".into(),
            },
            OutboundEvent::error(ERR_RATE_LIMITED, "slow down"),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }
}
