#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::America::Sao_Paulo;
use chrono_tz::Tz;

use reminder_bot::error::Result;
use reminder_bot::interfaces::clock::Clock;
use reminder_bot::interfaces::delivery::Deliverer;
use reminder_bot::reminders::{parse_run_date, ReminderStore};
use reminder_bot::scheduler::{Scheduler, SchedulerSettings};
use reminder_bot::services::engine::{EngineOptions, ReminderEngine};

pub const TZ: Tz = Sao_Paulo;

pub fn at(raw: &str) -> DateTime<Tz> {
    parse_run_date(raw, TZ).expect("valid timestamp")
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(raw: &str) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(at(raw).with_timezone(&Utc)),
        })
    }

    pub fn advance(&self, delta: TimeDelta) {
        *self.now.lock().unwrap() += delta;
    }

    pub fn set(&self, raw: &str) {
        *self.now.lock().unwrap() = at(raw).with_timezone(&Utc);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingDeliverer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingDeliverer {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deliverer for RecordingDeliverer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, owner_id: &str, message: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((owner_id.to_string(), message.to_string()));
        Ok(())
    }
}

pub fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        delivery_timeout: Duration::from_millis(200),
        delivery_attempts: 1,
        max_sleep: Duration::from_millis(5),
    }
}

/// Engine over a store at `path`, with its fired listener already running.
pub fn engine_at(
    path: &Path,
    clock: Arc<ManualClock>,
    deliverer: Arc<RecordingDeliverer>,
) -> Arc<ReminderEngine> {
    let store = Arc::new(ReminderStore::new(path).expect("store"));
    let (scheduler, fired_rx) = Scheduler::new(deliverer, clock.clone(), fast_settings());
    let engine = Arc::new(ReminderEngine::new(
        store,
        scheduler,
        clock,
        TZ,
        EngineOptions::default(),
    ));
    engine.clone().spawn_fired_listener(fired_rx);
    engine
}

/// Polls `check` for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
