use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::{Result, SkipReason};
use crate::interfaces::clock::Clock;
use crate::interfaces::extraction::{CandidateExtractor, RawCandidate};
use crate::reconcile::{reconcile, ReconcileOptions, ReconcileReport};
use crate::reminders::{
    resolve, Candidate, PendingReminder, Recurrence, Reminder, ReminderStore,
};
use crate::scheduler::{FiredReminder, Scheduler};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub rearm_annual: bool,
    pub prune_expired: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            rearm_annual: true,
            prune_expired: true,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rearm_annual: config.scheduler.rearm_annual,
            prune_expired: config.scheduler.prune_expired,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCandidate {
    pub subject: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub scheduled: usize,
    pub skipped: Vec<SkippedCandidate>,
}

impl IngestReport {
    /// True when nothing could be scheduled; the caller should tell the user
    /// their message was not understood.
    pub fn nothing_understood(&self) -> bool {
        self.scheduled == 0
    }

    fn skip(&mut self, owner_id: &str, subject: &str, reason: SkipReason) {
        debug!(owner_id, subject, reason = reason.kind(), detail = %reason, "candidate skipped");
        self.skipped.push(SkippedCandidate {
            subject: subject.to_string(),
            reason,
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub cancelled_timers: usize,
    pub removed_records: usize,
}

/// Ties the durable store to the in-memory scheduler. Every exposed
/// operation (ingest, listing, clearing, reconciliation) goes through here.
pub struct ReminderEngine {
    store: Arc<ReminderStore>,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    tz: Tz,
    options: EngineOptions,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<ReminderStore>,
        scheduler: Scheduler,
        clock: Arc<dyn Clock>,
        tz: Tz,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
            tz,
            options,
        }
    }

    pub fn store(&self) -> &ReminderStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now(&self) -> DateTime<Tz> {
        self.clock.now().with_timezone(&self.tz)
    }

    /// Resolves, persists and arms each candidate.
    ///
    /// A timer is armed only once its record is saved, and under the store
    /// lock, so a concurrent [`clear`](Self::clear) either sees the record
    /// and cancels the timer or runs first and leaves both untouched. A
    /// candidate whose record cannot be saved is reported as skipped and the
    /// rest of the batch still runs.
    pub async fn ingest(&self, owner_id: &str, candidates: Vec<Candidate>) -> Result<IngestReport> {
        let span = info_span!("reminder.ingest", owner_id, candidates = candidates.len());
        async move {
            let now = self.now();
            let mut report = IngestReport::default();

            for candidate in candidates {
                let subject = candidate.subject.clone();
                let reminder = match resolve(candidate, now) {
                    Ok(reminder) => reminder,
                    Err(reason) => {
                        report.skip(owner_id, &subject, reason);
                        continue;
                    }
                };

                let record = reminder.to_record();
                let appended = self
                    .store
                    .append_then(owner_id, record, || {
                        self.scheduler.arm(owner_id, reminder);
                    })
                    .await;
                match appended {
                    Ok(true) => report.scheduled += 1,
                    Ok(false) => report.skip(owner_id, &subject, SkipReason::Duplicate),
                    Err(err) => {
                        error!(owner_id, subject = %subject, error = %err, "cannot save reminder");
                        report.skip(owner_id, &subject, SkipReason::StorageFailed(err.to_string()));
                    }
                }
            }

            info!(
                owner_id,
                scheduled = report.scheduled,
                skipped = report.skipped.len(),
                "ingested reminder candidates"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Like [`ingest`](Self::ingest) for unvalidated strings. Entries that do
    /// not parse are reported as skipped.
    pub async fn ingest_raw(&self, owner_id: &str, raw: Vec<RawCandidate>) -> Result<IngestReport> {
        let mut parse_skips = Vec::new();
        let mut candidates = Vec::with_capacity(raw.len());
        for item in raw {
            match item.parse(self.tz) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => parse_skips.push((item.subject, reason)),
            }
        }

        let mut report = self.ingest(owner_id, candidates).await?;
        for (subject, reason) in parse_skips {
            report.skip(owner_id, &subject, reason);
        }
        Ok(report)
    }

    /// Runs `extractor` over free text and ingests whatever it finds. An
    /// extractor failure counts as finding nothing.
    pub async fn ingest_text(
        &self,
        owner_id: &str,
        text: &str,
        extractor: &dyn CandidateExtractor,
    ) -> Result<IngestReport> {
        let raw = match extractor.extract(text, self.now()).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(owner_id, error = %err, "candidate extraction failed");
                Vec::new()
            }
        };
        self.ingest_raw(owner_id, raw).await
    }

    /// Stored reminders of `owner_id` still ahead of `now`, soonest first.
    pub async fn list_pending(&self, owner_id: &str, now: DateTime<Tz>) -> Vec<PendingReminder> {
        let mut pending: Vec<PendingReminder> = self
            .store
            .records(owner_id)
            .await
            .iter()
            .filter_map(|record| match Reminder::from_record(record, self.tz) {
                Ok(reminder) => Some(reminder),
                Err(reason) => {
                    debug!(owner_id, reason = reason.kind(), "ignoring unreadable record");
                    None
                }
            })
            .filter(|reminder| reminder.scheduled_at > now)
            .map(|reminder| PendingReminder {
                when: reminder.scheduled_at,
                subject: reminder.subject,
                recurrence: reminder.recurrence,
            })
            .collect();
        pending.sort_by(|a, b| a.when.cmp(&b.when).then_with(|| a.subject.cmp(&b.subject)));
        pending
    }

    /// Empties the owner's stored list and cancels their timers in the same
    /// store critical section, so no ingest or annual re-arm can slip a new
    /// timer in between.
    pub async fn clear(&self, owner_id: &str) -> Result<ClearReport> {
        let mut cancelled_timers = 0;
        let removed_records = self
            .store
            .clear_owner_then(owner_id, || {
                cancelled_timers = self.scheduler.cancel_all(owner_id);
            })
            .await?;
        info!(owner_id, cancelled_timers, removed_records, "cleared reminders");
        Ok(ClearReport {
            cancelled_timers,
            removed_records,
        })
    }

    /// Rebuilds timers from the store. Timers already armed are cancelled
    /// first, so calling this twice never doubles anything.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let span = info_span!("reminder.reconcile", tz = %self.tz);
        async move {
            let dropped = self.scheduler.shutdown();
            if dropped > 0 {
                debug!(dropped, "cancelled live timers before reconciling");
            }
            let options = ReconcileOptions {
                prune_expired: self.options.prune_expired,
            };
            reconcile(&self.store, self.tz, self.now(), options, |owner_id, reminder| {
                self.scheduler.arm(owner_id, reminder);
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// Updates the store after a timer fired. One-shot records are removed.
    /// Annual records move to their next occurrence and, when enabled, are
    /// armed again under the store lock, unless the owner cleared them in
    /// the meantime.
    pub async fn handle_fired(&self, fired: FiredReminder) -> Result<()> {
        let FiredReminder {
            timer_id,
            owner_id,
            reminder,
            delivered,
        } = fired;
        let span = info_span!(
            "reminder.fired",
            timer_id,
            owner_id = %owner_id,
            recurrence = reminder.recurrence.as_str(),
            delivered
        );
        async move {
            let record = reminder.to_record();
            match reminder.recurrence {
                Recurrence::None => {
                    self.store.remove_record(&owner_id, &record).await?;
                }
                Recurrence::Annual => {
                    let candidate = Candidate::new(
                        reminder.subject.clone(),
                        reminder.scheduled_at,
                        Recurrence::Annual,
                    );
                    let next = match resolve(candidate, self.now()) {
                        Ok(next) => next,
                        Err(reason) => {
                            warn!(reason = %reason, "cannot advance annual reminder");
                            return Ok(());
                        }
                    };
                    let next_record = next.to_record();
                    let rearm = self.options.rearm_annual;
                    let replaced = self
                        .store
                        .replace_record_then(&owner_id, &record, next_record, || {
                            if rearm {
                                self.scheduler.arm(&owner_id, next);
                            }
                        })
                        .await?;
                    if !replaced {
                        debug!(subject = %reminder.subject, "annual reminder was cleared, not re-arming");
                    }
                }
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Feeds every fired timer from `rx` into [`handle_fired`](Self::handle_fired).
    pub fn spawn_fired_listener(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<FiredReminder>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(fired) = rx.recv().await {
                let timer_id = fired.timer_id;
                if let Err(err) = self.handle_fired(fired).await {
                    warn!(timer_id, error = %err, "fired reminder follow-up failed");
                }
            }
        })
    }
}
