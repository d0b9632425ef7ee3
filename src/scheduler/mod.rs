use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::interfaces::clock::Clock;
use crate::interfaces::delivery::Deliverer;
use crate::reminders::{format_run_date, Reminder};
use crate::timer_fsm::{TimerEvent, TimerLifecycle, TimerState};

pub type TimerId = u64;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Upper bound for one delivery attempt.
    pub delivery_timeout: Duration,
    pub delivery_attempts: u32,
    /// Longest single sleep before a timer re-reads the clock.
    pub max_sleep: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(10),
            delivery_attempts: 1,
            max_sleep: Duration::from_secs(60),
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            delivery_timeout: config.delivery.timeout(),
            delivery_attempts: config.delivery.attempts(),
            max_sleep: config.scheduler.max_sleep(),
        }
    }
}

/// Published once per timer that reached its deadline.
#[derive(Debug, Clone)]
pub struct FiredReminder {
    pub timer_id: TimerId,
    pub owner_id: String,
    pub reminder: Reminder,
    pub delivered: bool,
}

#[derive(Debug, Clone)]
pub struct ArmedTimer {
    pub timer_id: TimerId,
    pub owner_id: String,
    pub reminder: Reminder,
    pub state: TimerState,
}

/// A timer stays in the map from `arm` until it is cancelled or its
/// delivery has finished. The lifecycle machine decides which of the two
/// wins; a fired entry can no longer be cancelled.
struct TimerEntry {
    owner_id: String,
    reminder: Reminder,
    lifecycle: TimerLifecycle,
    handle: Option<JoinHandle<()>>,
}

impl TimerEntry {
    fn is_pending(&self) -> bool {
        !self.lifecycle.state().is_terminal()
    }
}

struct Shared {
    timers: Mutex<HashMap<TimerId, TimerEntry>>,
    next_id: AtomicU64,
    deliverer: Arc<dyn Deliverer>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    fired_tx: mpsc::UnboundedSender<FiredReminder>,
}

/// Process-wide timer registry. Cloning yields another handle to the same
/// timers.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler and the receiving end of its fired-reminder feed.
    /// Dropping the receiver is fine; events are then discarded.
    pub fn new(
        deliverer: Arc<dyn Deliverer>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<FiredReminder>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            timers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            deliverer,
            clock,
            settings,
            fired_tx,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            fired_rx,
        )
    }

    /// Arms a timer that delivers `reminder.message()` to `owner_id` at
    /// `reminder.scheduled_at`. Must be called inside a tokio runtime.
    pub fn arm(&self, owner_id: &str, reminder: Reminder) -> TimerId {
        let timer_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let due = reminder.scheduled_at.with_timezone(&Utc);
        debug!(
            timer_id,
            owner_id,
            subject = %reminder.subject,
            scheduled_at = %format_run_date(&reminder.scheduled_at),
            "arming reminder timer"
        );

        self.shared.lock_timers().insert(
            timer_id,
            TimerEntry {
                owner_id: owner_id.to_string(),
                reminder,
                lifecycle: TimerLifecycle::new(),
                handle: None,
            },
        );

        let handle = tokio::spawn(run_timer(self.shared.clone(), timer_id, due));
        if let Some(entry) = self.shared.lock_timers().get_mut(&timer_id) {
            entry.handle = Some(handle);
        }
        timer_id
    }

    pub fn cancel(&self, timer_id: TimerId) -> bool {
        self.cancel_where(|id, _| id == timer_id) == 1
    }

    /// Cancels every pending timer of `owner_id`. Timers already delivering
    /// are left to finish. Calling it with nothing armed is a no-op
    /// returning zero.
    pub fn cancel_all(&self, owner_id: &str) -> usize {
        let cancelled = self.cancel_where(|_, entry| entry.owner_id == owner_id);
        if cancelled > 0 {
            info!(owner_id, cancelled, "cancelled reminder timers");
        }
        cancelled
    }

    /// Cancels every timer for every owner.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.cancel_where(|_, _| true);
        debug!(cancelled, "scheduler shut down");
        cancelled
    }

    /// Timers still waiting for their deadline.
    pub fn armed_count(&self) -> usize {
        self.shared
            .lock_timers()
            .values()
            .filter(|entry| entry.is_pending())
            .count()
    }

    pub fn armed_for(&self, owner_id: &str) -> usize {
        self.shared
            .lock_timers()
            .values()
            .filter(|entry| entry.owner_id == owner_id && entry.is_pending())
            .count()
    }

    /// Live timers ordered by due time, including ones whose delivery is in
    /// flight.
    pub fn snapshot(&self) -> Vec<ArmedTimer> {
        let mut armed: Vec<ArmedTimer> = self
            .shared
            .lock_timers()
            .iter()
            .map(|(timer_id, entry)| ArmedTimer {
                timer_id: *timer_id,
                owner_id: entry.owner_id.clone(),
                reminder: entry.reminder.clone(),
                state: entry.lifecycle.state(),
            })
            .collect();
        armed.sort_by(|a, b| {
            a.reminder
                .scheduled_at
                .cmp(&b.reminder.scheduled_at)
                .then(a.timer_id.cmp(&b.timer_id))
        });
        armed
    }

    pub fn now(&self, tz: Tz) -> DateTime<Tz> {
        self.shared.clock.now().with_timezone(&tz)
    }

    fn cancel_where<F>(&self, matches: F) -> usize
    where
        F: Fn(TimerId, &TimerEntry) -> bool,
    {
        let cancelled: Vec<TimerEntry> = {
            let mut timers = self.shared.lock_timers();
            let ids: Vec<TimerId> = timers
                .iter()
                .filter(|(id, entry)| matches(**id, *entry))
                .map(|(id, _)| *id)
                .collect();
            let mut cancelled = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(entry) = timers.get_mut(&id) else {
                    continue;
                };
                if entry.lifecycle.apply(TimerEvent::Cancel).is_none() {
                    debug!(
                        timer_id = id,
                        state = entry.lifecycle.state().as_str(),
                        "timer already fired, leaving delivery alone"
                    );
                    continue;
                }
                if let Some(entry) = timers.remove(&id) {
                    cancelled.push(entry);
                }
            }
            cancelled
        };

        let count = cancelled.len();
        for entry in cancelled {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
        count
    }
}

impl Shared {
    fn lock_timers(&self) -> MutexGuard<'_, HashMap<TimerId, TimerEntry>> {
        match self.timers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn deliver(&self, timer_id: TimerId, owner_id: &str, message: &str) -> bool {
        let attempts = self.settings.delivery_attempts.max(1);
        for attempt in 1..=attempts {
            let outcome = tokio::time::timeout(
                self.settings.delivery_timeout,
                self.deliverer.deliver(owner_id, message),
            )
            .await;
            match outcome {
                Ok(Ok(())) => {
                    info!(
                        timer_id,
                        owner_id,
                        attempt,
                        deliverer = self.deliverer.name(),
                        "reminder delivered"
                    );
                    return true;
                }
                Ok(Err(err)) => {
                    warn!(timer_id, owner_id, attempt, error = %err, "reminder delivery failed");
                }
                Err(_) => {
                    warn!(
                        timer_id,
                        owner_id,
                        attempt,
                        timeout_ms = self.settings.delivery_timeout.as_millis() as u64,
                        "reminder delivery timed out"
                    );
                }
            }
        }
        error!(timer_id, owner_id, attempts, "giving up on reminder delivery");
        false
    }
}

async fn run_timer(shared: Arc<Shared>, timer_id: TimerId, due: DateTime<Utc>) {
    loop {
        let remaining = (due - shared.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining.min(shared.settings.max_sleep)).await;
    }

    // Whoever moves the machine out of `Pending` first owns the outcome.
    let claimed = {
        let mut timers = shared.lock_timers();
        timers.get_mut(&timer_id).and_then(|entry| {
            entry.lifecycle.apply(TimerEvent::Fire)?;
            Some((entry.owner_id.clone(), entry.reminder.clone()))
        })
    };
    let Some((owner_id, reminder)) = claimed else {
        return;
    };

    let message = reminder.message();
    let delivered = shared.deliver(timer_id, &owner_id, &message).await;
    shared.lock_timers().remove(&timer_id);
    let _ = shared.fired_tx.send(FiredReminder {
        timer_id,
        owner_id,
        reminder,
        delivered,
    });
}
