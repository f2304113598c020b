use axum::{extract::State, Json};
use parley_core::gateway::GatewayStats;
use parley_core::AppState;

use crate::error::ApiError;

/// Live table sizes from the signaling hub.
pub async fn stats(State(state): State<AppState>) -> Result<Json<GatewayStats>, ApiError> {
    let stats = state.gateway.stats().await?;
    Ok(Json(stats))
}
