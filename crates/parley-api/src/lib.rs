use axum::{
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use parley_core::AppState;
use serde_json::json;

pub mod error;
pub mod routes;

pub fn build_router() -> Router<AppState> {
    let cors = build_cors_layer();
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        // Signaling state
        .route("/api/v1/realtime/stats", get(routes::realtime::stats))
        .route(
            "/api/v1/chats/{chat_id}/meeting",
            get(routes::meetings::active_meeting),
        )
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn build_cors_layer() -> tower_http::cors::CorsLayer {
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "parley" })),
    )
}
