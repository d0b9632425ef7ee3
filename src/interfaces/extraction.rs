use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SkipReason};
use crate::reminders::{parse_run_date, Candidate, Recurrence};

/// A reminder as extracted from free text, before any validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub subject: String,
    pub when: String,
    #[serde(default)]
    pub recurrence: String,
}

impl RawCandidate {
    pub fn new(
        subject: impl Into<String>,
        when: impl Into<String>,
        recurrence: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            when: when.into(),
            recurrence: recurrence.into(),
        }
    }

    /// Validates the strings and interprets `when` in `tz`.
    pub fn parse(&self, tz: Tz) -> std::result::Result<Candidate, SkipReason> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(SkipReason::EmptySubject);
        }
        let recurrence = self.recurrence.parse::<Recurrence>()?;
        let when = parse_run_date(&self.when, tz)?;
        Ok(Candidate::new(subject, when, recurrence))
    }
}

/// Turns free text (typed, transcribed or OCR'd) into candidate reminders.
#[async_trait]
pub trait CandidateExtractor: Send + Sync {
    async fn extract(&self, text: &str, now: DateTime<Tz>) -> Result<Vec<RawCandidate>>;
}

/// Reads `SUBJECT | YYYY-MM-DD HH:MM:SS | RECURRENCE` lines. Lines without
/// a `|` are ignored; a missing recurrence column means a one-shot reminder.
pub fn parse_candidate_lines(text: &str) -> Vec<RawCandidate> {
    text.lines()
        .filter(|line| line.contains('|'))
        .map(|line| {
            let mut parts = line.split('|').map(str::trim);
            let subject = parts.next().unwrap_or_default();
            let when = parts.next().unwrap_or_default();
            let recurrence = parts.next().unwrap_or_default();
            RawCandidate::new(
                subject.trim_start_matches(['-', '*', ' ']),
                when,
                recurrence,
            )
        })
        .collect()
}

/// Extractor for input that is already in the pipe-delimited line format.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineExtractor;

#[async_trait]
impl CandidateExtractor for LineExtractor {
    async fn extract(&self, text: &str, _now: DateTime<Tz>) -> Result<Vec<RawCandidate>> {
        Ok(parse_candidate_lines(text))
    }
}
