use serde::{Deserialize, Serialize};

/// Wall-clock format of `run_date`, always in the configured zone.
pub const RUN_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// On-disk shape of one reminder. Fields stay as plain strings so a single
/// malformed record never makes the whole file unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredReminder {
    pub subject: String,
    pub run_date: String,
    #[serde(default)]
    pub recurrence: String,
}
