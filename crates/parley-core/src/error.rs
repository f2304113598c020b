use parley_models::gateway::{
    ERR_CONFLICT, ERR_FORBIDDEN, ERR_FULL, ERR_INVALID_STATE, ERR_NOT_FOUND, ERR_SETUP_REQUIRED,
    ERR_TOO_MANY_CONNECTIONS, ERR_UNAVAILABLE,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("forbidden")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("meeting is full (max {0} participants)")]
    Full(usize),
    #[error("setup required")]
    SetupRequired,
    #[error("too many connections for this user (max {0})")]
    TooManyConnections(usize),
    #[error("gateway unavailable")]
    Unavailable,
}

impl CoreError {
    /// Machine-readable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => ERR_NOT_FOUND,
            CoreError::InvalidState(_) => ERR_INVALID_STATE,
            CoreError::Forbidden => ERR_FORBIDDEN,
            CoreError::Conflict(_) => ERR_CONFLICT,
            CoreError::Full(_) => ERR_FULL,
            CoreError::SetupRequired => ERR_SETUP_REQUIRED,
            CoreError::TooManyConnections(_) => ERR_TOO_MANY_CONNECTIONS,
            CoreError::Unavailable => ERR_UNAVAILABLE,
        }
    }
}
