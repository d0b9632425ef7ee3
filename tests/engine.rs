mod common;

use std::sync::Arc;

use chrono::TimeDelta;
use tempfile::tempdir;

use common::{at, engine_at, eventually, ManualClock, RecordingDeliverer, TZ};
use reminder_bot::error::SkipReason;
use reminder_bot::interfaces::extraction::{LineExtractor, RawCandidate};
use reminder_bot::reminders::{format_run_date, ReminderStore, StoreState, StoredReminder};
use reminder_bot::scheduler::FiredReminder;
use reminder_bot::{Candidate, Recurrence, Reminder};

fn stored(subject: &str, run_date: &str, recurrence: &str) -> StoredReminder {
    StoredReminder {
        subject: subject.to_string(),
        run_date: run_date.to_string(),
        recurrence: recurrence.to_string(),
    }
}

#[tokio::test]
async fn future_one_shot_is_persisted_and_armed() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-02-01 00:00:00");
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock,
        Arc::new(RecordingDeliverer::default()),
    );

    let report = engine
        .ingest(
            "42",
            vec![Candidate::new(
                "Dentist",
                at("2025-03-01 08:00:00"),
                Recurrence::None,
            )],
        )
        .await
        .unwrap();

    assert_eq!(report.scheduled, 1);
    assert!(!report.nothing_understood());
    assert_eq!(
        engine.store().records("42").await,
        vec![stored("Dentist", "2025-03-01 08:00:00", "none")]
    );
    let armed = engine.scheduler().snapshot();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].owner_id, "42");
    assert_eq!(
        format_run_date(&armed[0].reminder.scheduled_at),
        "2025-03-01 08:00:00"
    );
}

#[tokio::test]
async fn past_annual_candidate_is_stored_at_next_occurrence() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-01-01 00:00:00");
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock,
        Arc::new(RecordingDeliverer::default()),
    );

    let report = engine
        .ingest(
            "42",
            vec![Candidate::new(
                "Maria",
                at("2024-06-01 09:00:00"),
                Recurrence::Annual,
            )],
        )
        .await
        .unwrap();

    assert_eq!(report.scheduled, 1);
    assert_eq!(
        engine.store().records("42").await,
        vec![stored("Maria", "2025-06-01 09:00:00", "annual")]
    );
}

#[tokio::test]
async fn past_one_shot_schedules_nothing_and_persists_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reminders.json");
    let clock = ManualClock::at("2025-01-01 00:00:00");
    let engine = engine_at(&path, clock, Arc::new(RecordingDeliverer::default()));

    let report = engine
        .ingest(
            "42",
            vec![Candidate::new(
                "Past event",
                at("2020-01-01 08:00:00"),
                Recurrence::None,
            )],
        )
        .await
        .unwrap();

    assert_eq!(report.scheduled, 0);
    assert!(report.nothing_understood());
    assert!(matches!(report.skipped[0].reason, SkipReason::PastDue(_)));
    assert!(engine.store().load().await.is_empty());
    assert_eq!(engine.scheduler().armed_count(), 0);

    let empty = engine.ingest("42", Vec::new()).await.unwrap();
    assert!(empty.nothing_understood());
}

#[tokio::test]
async fn restart_arms_only_future_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reminders.json");
    let mut state = StoreState::new();
    state.insert(
        "a".to_string(),
        vec![
            stored("Old", "2024-11-01 10:00:00", "none"),
            stored("Soon", "2025-01-10 10:00:00", "none"),
            stored("Later", "2025-05-10 10:00:00", "none"),
        ],
    );
    state.insert(
        "b".to_string(),
        vec![
            stored("Older", "2023-01-01 10:00:00", "none"),
            stored("Next", "2025-02-10 10:00:00", "none"),
        ],
    );
    ReminderStore::new(&path).unwrap().save(&state).await.unwrap();

    let clock = ManualClock::at("2025-01-01 00:00:00");
    let deliverer = Arc::new(RecordingDeliverer::default());
    let engine = engine_at(&path, clock.clone(), deliverer.clone());
    let report = engine.reconcile().await.unwrap();

    assert_eq!(report.armed, 3);
    assert_eq!(report.expired, 2);
    assert_eq!(engine.scheduler().armed_for("a"), 2);
    assert_eq!(engine.scheduler().armed_for("b"), 1);

    let again = engine.reconcile().await.unwrap();
    assert_eq!(again.armed, 3);
    assert_eq!(engine.scheduler().armed_count(), 3);

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(deliverer.sent().is_empty());
}

#[tokio::test]
async fn timers_survive_a_restart_through_the_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reminders.json");
    let clock = ManualClock::at("2025-02-01 00:00:00");

    let first = engine_at(&path, clock.clone(), Arc::new(RecordingDeliverer::default()));
    first
        .ingest_raw(
            "42",
            vec![
                RawCandidate::new("Dentist", "2025-03-01 08:00:00", "none"),
                RawCandidate::new("Maria", "2024-06-01 09:00:00", "anual"),
            ],
        )
        .await
        .unwrap();
    first.scheduler().shutdown();

    let deliverer = Arc::new(RecordingDeliverer::default());
    let second = engine_at(&path, clock.clone(), deliverer.clone());
    assert_eq!(second.reconcile().await.unwrap().armed, 2);

    clock.set("2025-03-01 08:00:01");
    assert!(eventually(|| async { deliverer.sent().len() == 1 }).await);
    assert_eq!(
        deliverer.sent(),
        vec![("42".to_string(), "Dentist".to_string())]
    );
}

#[tokio::test]
async fn clear_cancels_timers_and_empties_the_owner_list() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-02-01 00:00:00");
    let deliverer = Arc::new(RecordingDeliverer::default());
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock.clone(),
        deliverer.clone(),
    );

    for (owner, subject, when) in [
        ("42", "Dentist", "2025-02-02 08:00:00"),
        ("42", "Gym", "2025-02-03 08:00:00"),
        ("7", "Call mom", "2025-02-02 09:00:00"),
    ] {
        engine
            .ingest(owner, vec![Candidate::new(subject, at(when), Recurrence::None)])
            .await
            .unwrap();
    }

    let report = engine.clear("42").await.unwrap();
    assert_eq!(report.cancelled_timers, 2);
    assert_eq!(report.removed_records, 2);
    assert!(engine.list_pending("42", engine.now()).await.is_empty());

    let again = engine.clear("42").await.unwrap();
    assert_eq!(again.cancelled_timers, 0);
    assert_eq!(again.removed_records, 0);

    clock.advance(TimeDelta::days(5));
    assert!(eventually(|| async { !deliverer.sent().is_empty() }).await);
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(
        deliverer.sent(),
        vec![("7".to_string(), "Call mom".to_string())]
    );
}

#[tokio::test]
async fn list_pending_is_sorted_by_due_time() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-02-01 00:00:00");
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock,
        Arc::new(RecordingDeliverer::default()),
    );

    let report = engine
        .ingest_text(
            "42",
            "Third | 2025-04-01 08:00:00 | none\n\
             First | 2025-02-10 08:00:00\n\
             Second | 2024-03-01 08:00:00 | annual\n",
            &LineExtractor,
        )
        .await
        .unwrap();
    assert_eq!(report.scheduled, 3);

    let subjects: Vec<String> = engine
        .list_pending("42", engine.now())
        .await
        .into_iter()
        .map(|pending| pending.subject)
        .collect();
    assert_eq!(subjects, vec!["First", "Second", "Third"]);

    let later = at("2025-03-15 00:00:00");
    let remaining: Vec<String> = engine
        .list_pending("42", later)
        .await
        .into_iter()
        .map(|pending| pending.subject)
        .collect();
    assert_eq!(remaining, vec!["Third"]);
}

#[tokio::test]
async fn fired_one_shot_is_delivered_once_and_removed() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-02-01 00:00:00");
    let deliverer = Arc::new(RecordingDeliverer::default());
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock.clone(),
        deliverer.clone(),
    );
    engine
        .ingest(
            "42",
            vec![Candidate::new(
                "Dentist",
                at("2025-02-01 08:00:00"),
                Recurrence::None,
            )],
        )
        .await
        .unwrap();

    clock.advance(TimeDelta::hours(9));
    let store_engine = engine.clone();
    assert!(eventually(|| {
        let engine = store_engine.clone();
        async move { engine.store().records("42").await.is_empty() }
    })
    .await);

    assert_eq!(
        deliverer.sent(),
        vec![("42".to_string(), "Dentist".to_string())]
    );
    assert_eq!(engine.scheduler().armed_count(), 0);
}

#[tokio::test]
async fn fired_annual_reminder_moves_to_next_year_and_rearms() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-05-31 00:00:00");
    let deliverer = Arc::new(RecordingDeliverer::default());
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock.clone(),
        deliverer.clone(),
    );
    engine
        .ingest(
            "42",
            vec![Candidate::new(
                "Maria",
                at("2024-06-01 09:00:00"),
                Recurrence::Annual,
            )],
        )
        .await
        .unwrap();

    clock.set("2025-06-01 09:00:01");
    let store_engine = engine.clone();
    assert!(eventually(|| {
        let engine = store_engine.clone();
        async move {
            engine.store().records("42").await
                == vec![stored("Maria", "2026-06-01 09:00:00", "annual")]
        }
    })
    .await);

    assert_eq!(
        deliverer.sent(),
        vec![("42".to_string(), "Anniversary of Maria 🎂".to_string())]
    );
    assert!(eventually(|| async { engine.scheduler().armed_for("42") == 1 }).await);
    let armed = engine.scheduler().snapshot();
    assert_eq!(
        format_run_date(&armed[0].reminder.scheduled_at),
        "2026-06-01 09:00:00"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingestion_for_many_owners_keeps_every_record() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-02-01 00:00:00");
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock,
        Arc::new(RecordingDeliverer::default()),
    );

    let mut handles = Vec::new();
    for owner in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .ingest(
                    &format!("owner-{owner}"),
                    vec![Candidate::new(
                        format!("Task {owner}"),
                        at("2025-06-01 08:00:00"),
                        Recurrence::None,
                    )],
                )
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().scheduled, 1);
    }

    let state = engine.store().load().await;
    assert_eq!(state.len(), 16);
    assert_eq!(engine.scheduler().armed_count(), 16);
    assert_eq!(TZ, engine.timezone());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clear_racing_annual_rearm_never_leaves_a_live_timer() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-06-01 09:00:01");
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock,
        Arc::new(RecordingDeliverer::default()),
    );
    let maria = Reminder {
        subject: "Maria".to_string(),
        scheduled_at: at("2025-06-01 09:00:00"),
        recurrence: Recurrence::Annual,
    };

    for round in 0..100 {
        let mut state = StoreState::new();
        state.insert("42".to_string(), vec![maria.to_record()]);
        engine.store().save(&state).await.unwrap();

        let fired = FiredReminder {
            timer_id: round,
            owner_id: "42".to_string(),
            reminder: maria.clone(),
            delivered: true,
        };
        let clearing = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.clear("42").await })
        };
        let rearming = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.handle_fired(fired).await })
        };
        clearing.await.unwrap().unwrap();
        rearming.await.unwrap().unwrap();

        assert!(
            engine.store().records("42").await.is_empty(),
            "round {round} kept a record"
        );
        assert_eq!(
            engine.scheduler().armed_for("42"),
            0,
            "round {round} left a timer armed"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clear_racing_ingest_keeps_records_and_timers_in_step() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at("2025-02-01 00:00:00");
    let engine = engine_at(
        &dir.path().join("reminders.json"),
        clock,
        Arc::new(RecordingDeliverer::default()),
    );

    for round in 0..100 {
        let ingesting = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .ingest(
                        "42",
                        vec![Candidate::new(
                            "Dentist",
                            at("2025-03-01 08:00:00"),
                            Recurrence::None,
                        )],
                    )
                    .await
            })
        };
        let clearing = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.clear("42").await })
        };
        assert_eq!(ingesting.await.unwrap().unwrap().scheduled, 1);
        clearing.await.unwrap().unwrap();

        let records = engine.store().records("42").await.len();
        assert_eq!(
            records,
            engine.scheduler().armed_for("42"),
            "round {round} disagrees between store and timers"
        );

        engine.clear("42").await.unwrap();
        assert_eq!(engine.scheduler().armed_count(), 0);
    }
}

#[tokio::test]
async fn storage_failure_is_reported_per_candidate() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reminders.json");
    let clock = ManualClock::at("2025-02-01 00:00:00");
    let engine = engine_at(&path, clock, Arc::new(RecordingDeliverer::default()));
    // Saves write a sibling temp file first; a directory in its place makes
    // every save fail.
    std::fs::create_dir(dir.path().join("reminders.json.tmp")).unwrap();

    let report = engine
        .ingest(
            "42",
            vec![
                Candidate::new("Dentist", at("2025-03-01 08:00:00"), Recurrence::None),
                Candidate::new("Past", at("2020-01-01 08:00:00"), Recurrence::None),
                Candidate::new("Gym", at("2025-03-02 07:00:00"), Recurrence::None),
            ],
        )
        .await
        .expect("storage failures do not abort the batch");

    assert_eq!(report.scheduled, 0);
    let kinds: Vec<(&str, &str)> = report
        .skipped
        .iter()
        .map(|skip| (skip.subject.as_str(), skip.reason.kind()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("Dentist", "storage_failed"),
            ("Past", "past_due"),
            ("Gym", "storage_failed"),
        ]
    );
    assert_eq!(engine.scheduler().armed_count(), 0);
    assert!(!path.exists());
}
