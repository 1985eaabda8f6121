//! Error taxonomy for the session manager and the preset store

use thiserror::Error;

use crate::constants::{http, store};
use crate::rest::HttpOutcome;

/// Failure of a single authentication attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("configuration invalid: {0}")]
    InvalidConfiguration(String),

    #[error("could not reach auth endpoint: {0}")]
    Transport(String),

    #[error("auth rejected with HTTP {status}")]
    Rejected { status: u16, body: String },

    #[error("malformed auth response: {0}")]
    MalformedResponse(String),
}

/// Operation families guarded against concurrent duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Save,
    Load,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Save => write!(f, "save"),
            Operation::Load => write!(f, "load"),
        }
    }
}

/// Error type for every store/client operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthError),

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("preset name already taken: {name}")]
    Conflict { name: String },

    #[error("deleted {deleted} of {total} presets")]
    PartialFailure { deleted: usize, total: usize },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("no free name for '{base}' after {attempts} attempts")]
    UniqueNameExhausted { base: String, attempts: usize },

    #[error("{0} already in progress")]
    Busy(Operation),

    #[error("preset not found: {0}")]
    NotFound(String),

    #[error("no preset selected")]
    NoSelection,
}

impl SyncError {
    /// Classify a non-2xx outcome. `name` is the preset the call targeted,
    /// used to label conflicts.
    pub fn from_outcome(outcome: &HttpOutcome, name: &str) -> Self {
        if outcome.is_transport_failure() {
            SyncError::Transport(outcome.body.clone())
        } else if is_conflict(outcome) {
            SyncError::Conflict {
                name: name.to_string(),
            }
        } else {
            SyncError::Http {
                status: outcome.status,
                body: outcome.body.clone(),
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

/// A uniqueness violation: HTTP 409, or a duplicate marker in an error body
pub fn is_conflict(outcome: &HttpOutcome) -> bool {
    if outcome.ok {
        return false;
    }
    outcome.status == http::CONFLICT
        || outcome.body.contains(store::DUPLICATE_MARKER)
        || outcome.body.contains(store::UNIQUE_VIOLATION_CODE)
}
