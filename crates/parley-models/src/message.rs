use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ChatId, UserId};

/// A chat message already persisted by the REST layer. Only the routing keys
/// are typed; everything else is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender: MessageUser,
    pub chat: MessageChat,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUser {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChat {
    #[serde(rename = "_id")]
    pub id: ChatId,
    #[serde(default)]
    pub users: Vec<MessageUser>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Chat members other than the sender.
    pub fn recipients(&self) -> impl Iterator<Item = &UserId> {
        self.chat
            .users
            .iter()
            .map(|user| &user.id)
            .filter(move |id| **id != self.sender.id)
    }
}
