use axum::{
    extract::{Path, State},
    Json,
};
use parley_core::AppState;
use parley_models::meeting::MeetingSummary;

use crate::error::ApiError;

/// The meeting currently running in a chat, for clients deciding between
/// "start" and "join" before opening a socket.
pub async fn active_meeting(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<MeetingSummary>, ApiError> {
    state
        .gateway
        .active_meeting(&chat_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no active meeting in this chat".into()))
}
