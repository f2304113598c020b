use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::user::UserInfo;
use crate::{CallId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
}

/// Lifecycle of a 1:1 call. Ended calls are removed rather than marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiate {
    pub to: UserId,
    pub call_type: CallKind,
    #[serde(default)]
    pub offer: Value,
    #[serde(default)]
    pub caller_info: UserInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAccept {
    pub call_id: CallId,
    #[serde(default)]
    pub answer: Value,
    #[serde(default)]
    pub to: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReject {
    pub call_id: CallId,
    #[serde(default)]
    pub to: Option<UserId>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnd {
    pub call_id: CallId,
    #[serde(default)]
    pub to: Option<UserId>,
}

/// Trickle ICE candidate. Forwarded without consulting the call table, so the
/// call id is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallIceCandidate {
    pub to: UserId,
    pub candidate: Value,
    #[serde(default)]
    pub call_id: Option<CallId>,
}
