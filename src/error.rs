use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderBotError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("delivery error: {0}")]
    Delivery(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub use crate::Result;

/// Why a candidate or stored record was not scheduled.
///
/// Produced by the parse and resolve steps instead of a catch-all, so callers
/// can log or report each skipped entry individually.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("subject is empty")]
    EmptySubject,
    #[error("unparsable timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("unknown recurrence `{0}`")]
    InvalidRecurrence(String),
    #[error("local time `{0}` does not exist in the configured timezone")]
    NonexistentLocalTime(String),
    #[error("scheduled time {0} is not in the future")]
    PastDue(String),
    #[error("an identical reminder is already scheduled")]
    Duplicate,
    #[error("reminder could not be saved: {0}")]
    StorageFailed(String),
}

impl SkipReason {
    /// Stable machine-readable tag used in logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::EmptySubject => "empty_subject",
            SkipReason::InvalidTimestamp(_) => "invalid_timestamp",
            SkipReason::InvalidRecurrence(_) => "invalid_recurrence",
            SkipReason::NonexistentLocalTime(_) => "nonexistent_local_time",
            SkipReason::PastDue(_) => "past_due",
            SkipReason::Duplicate => "duplicate",
            SkipReason::StorageFailed(_) => "storage_failed",
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            SkipReason::EmptySubject
                | SkipReason::InvalidTimestamp(_)
                | SkipReason::InvalidRecurrence(_)
                | SkipReason::NonexistentLocalTime(_)
        )
    }
}
