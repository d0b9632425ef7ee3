//! Startup reconciliation: rebuild in-memory timers from the durable store.

use std::collections::HashSet;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::reminders::{
    resolve, Candidate, Recurrence, Reminder, ReminderStore, StoreState, StoredReminder,
};

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Remove expired one-shot records instead of leaving them on disk.
    pub prune_expired: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            prune_expired: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub armed: usize,
    pub expired: usize,
    pub rolled_forward: usize,
    pub invalid: usize,
}

enum Fix {
    Prune(StoredReminder),
    Roll {
        old: StoredReminder,
        new: StoredReminder,
    },
}

/// Arms every future reminder in `store` through `arm` and skips the rest.
///
/// Expired one-shot reminders are never fired late. Expired annual
/// reminders are moved to their next occurrence, rewritten and armed.
/// Records that fail to parse stay on disk untouched.
///
/// Planning, arming and the rewrite all happen inside one store critical
/// section. If the rewrite cannot be saved the timers stay armed and the
/// failure is only logged.
pub async fn reconcile<F>(
    store: &ReminderStore,
    tz: Tz,
    now: DateTime<Tz>,
    options: ReconcileOptions,
    mut arm: F,
) -> Result<ReconcileReport>
where
    F: FnMut(&str, Reminder),
{
    let mut report = ReconcileReport::default();
    let saved = store
        .mutate(|state| {
            let planned = plan(state, tz, now, options);
            report = planned.report;
            for (owner_id, reminder) in planned.to_arm {
                arm(&owner_id, reminder);
                report.armed += 1;
            }
            apply_fixes(state, planned.fixes);
        })
        .await;
    if let Err(err) = saved {
        warn!(error = %err, "cannot persist reconciliation changes");
    }

    info!(
        armed = report.armed,
        expired = report.expired,
        rolled_forward = report.rolled_forward,
        invalid = report.invalid,
        "reconciled reminders"
    );
    Ok(report)
}

struct Plan {
    report: ReconcileReport,
    fixes: Vec<(String, Fix)>,
    to_arm: Vec<(String, Reminder)>,
}

fn plan(state: &StoreState, tz: Tz, now: DateTime<Tz>, options: ReconcileOptions) -> Plan {
    let mut report = ReconcileReport::default();
    let mut fixes: Vec<(String, Fix)> = Vec::new();
    let mut to_arm: Vec<(String, Reminder)> = Vec::new();
    let mut seen: HashSet<(String, StoredReminder)> = HashSet::new();

    for (owner_id, records) in state {
        for record in records {
            let reminder = match Reminder::from_record(record, tz) {
                Ok(reminder) => reminder,
                Err(reason) => {
                    warn!(
                        owner_id = %owner_id,
                        run_date = %record.run_date,
                        reason = reason.kind(),
                        "skipping unreadable stored reminder"
                    );
                    report.invalid += 1;
                    continue;
                }
            };

            if reminder.scheduled_at > now {
                if seen.insert((owner_id.clone(), record.clone())) {
                    to_arm.push((owner_id.clone(), reminder));
                }
                continue;
            }

            match reminder.recurrence {
                Recurrence::Annual => {
                    let candidate =
                        Candidate::new(reminder.subject.clone(), reminder.scheduled_at, Recurrence::Annual);
                    match resolve(candidate, now) {
                        Ok(next) => {
                            report.rolled_forward += 1;
                            let new = next.to_record();
                            fixes.push((
                                owner_id.clone(),
                                Fix::Roll {
                                    old: record.clone(),
                                    new: new.clone(),
                                },
                            ));
                            if seen.insert((owner_id.clone(), new)) {
                                to_arm.push((owner_id.clone(), next));
                            }
                        }
                        Err(reason) => {
                            warn!(owner_id = %owner_id, reason = %reason, "cannot roll annual reminder forward");
                            report.invalid += 1;
                        }
                    }
                }
                Recurrence::None => {
                    debug!(
                        owner_id = %owner_id,
                        subject = %reminder.subject,
                        run_date = %record.run_date,
                        "reminder expired while offline, not firing late"
                    );
                    report.expired += 1;
                    if options.prune_expired {
                        fixes.push((owner_id.clone(), Fix::Prune(record.clone())));
                    }
                }
            }
        }
    }

    Plan {
        report,
        fixes,
        to_arm,
    }
}

fn apply_fixes(state: &mut StoreState, fixes: Vec<(String, Fix)>) {
    for (owner_id, fix) in fixes {
        let Some(records) = state.get_mut(&owner_id) else {
            continue;
        };
        match fix {
            Fix::Prune(record) => {
                if let Some(index) = records.iter().position(|r| *r == record) {
                    records.remove(index);
                }
            }
            Fix::Roll { old, new } => {
                let Some(index) = records.iter().position(|r| *r == old) else {
                    continue;
                };
                if records.contains(&new) {
                    records.remove(index);
                } else {
                    records[index] = new;
                }
            }
        }
    }
}
