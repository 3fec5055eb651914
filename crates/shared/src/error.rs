use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed, caller-surfaced error taxonomy. Every engine command fails with
/// exactly one of these; none of them is retryable without changing the
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    /// Role or ownership check failed. Deliberately generic: the message
    /// never explains which check, to avoid leaking structure.
    Forbidden,
    /// Entity absent, or present but hidden from this caller. The two are
    /// intentionally indistinguishable.
    NotFound,
    /// Duplicate or concurrently-created state (second project per lead,
    /// membership in two teams, lost capacity race).
    Conflict,
    /// Malformed input: bad date, out-of-range grade, over-long field,
    /// missing conditional field.
    Validation,
    /// Illegal state-machine edge, e.g. `lead -> participant`.
    InvalidTransition,
    /// Team already at its size cap.
    CapacityExceeded,
    Internal,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
