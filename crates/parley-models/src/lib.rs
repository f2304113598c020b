pub mod call;
pub mod gateway;
pub mod meeting;
pub mod message;
pub mod user;

/// Identifier of one live transport connection.
pub type ConnectionId = uuid::Uuid;
/// Persistent identity a user authenticates as.
pub type UserId = String;
pub type ChatId = String;
pub type CallId = String;
pub type MeetingId = String;
