pub mod config;
pub mod daemon;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod providers;
pub mod reconcile;
pub mod reminders;
pub mod runtime_paths;
pub mod scheduler;
pub mod services;
pub mod timer_fsm;

pub type Result<T> = std::result::Result<T, error::ReminderBotError>;

pub use reminders::{Candidate, Recurrence, Reminder};
pub use scheduler::Scheduler;
pub use services::engine::ReminderEngine;
