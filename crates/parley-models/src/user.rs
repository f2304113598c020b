use serde::{Deserialize, Serialize};

use crate::UserId;

/// Display metadata cached per connection and attached to call/meeting notices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pic: Option<String>,
}

/// Payload of the `setup` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    #[serde(alias = "_id")]
    pub user_id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pic: Option<String>,
}

impl Setup {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            name: self.name.clone(),
            pic: self.pic.clone(),
        }
    }
}
