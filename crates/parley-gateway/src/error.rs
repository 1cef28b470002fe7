use thiserror::Error;

/// Failure taxonomy for a single client event. Every variant is contained
/// to the event that produced it; nothing here ever tears down the
/// connection or affects other connections' delivery.
#[derive(Debug, Error)]
pub enum EventError {
    /// Actor lacks the right to act on this resource. Silently dropped.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Malformed or out-of-bounds payload. Silently dropped.
    #[error("invalid event: {0}")]
    Validation(String),

    /// A per-user policy rejected the event. Surfaced to the client as an
    /// `error` event with this human-readable reason.
    #[error("{0}")]
    Policy(String),

    /// Referenced message or room does not exist. Silently dropped.
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EventError {
    /// Only policy violations are reported back to the originator; the
    /// rest are logged and swallowed.
    pub fn user_visible(&self) -> bool {
        matches!(self, EventError::Policy(_))
    }
}
