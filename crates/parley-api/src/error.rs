use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("signaling unavailable")]
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Unavailable => {
                tracing::warn!("API request failed: signaling hub is not running");
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
        };
        (status, Json(json!({ "error": error, "message": self.to_string() }))).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            CoreError::Forbidden => ApiError::Forbidden,
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            CoreError::Unavailable => ApiError::Unavailable,
            CoreError::InvalidState(_)
            | CoreError::Full(_)
            | CoreError::SetupRequired
            | CoreError::TooManyConnections(_) => ApiError::BadRequest(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (CoreError::NotFound("meeting"), StatusCode::NOT_FOUND),
            (CoreError::Forbidden, StatusCode::FORBIDDEN),
            (CoreError::Conflict("busy".into()), StatusCode::CONFLICT),
            (CoreError::Full(16), StatusCode::BAD_REQUEST),
            (CoreError::Unavailable, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (core, status) in cases {
            assert_eq!(ApiError::from(core).into_response().status(), status);
        }
    }
}
