use rust_fsm::*;

state_machine! {
    timer_flow(Pending)

    Pending(Fire) => Fired,
    Pending(Cancel) => Cancelled
}

/// Lifecycle of one armed timer. `Fired` and `Cancelled` are terminal; a
/// reminder only becomes pending again through a fresh `arm`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    Pending,
    Fired,
    Cancelled,
}

impl TimerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TimerState::Fired | TimerState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimerState::Pending => "pending",
            TimerState::Fired => "fired",
            TimerState::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    Fire,
    Cancel,
}

/// The state machine owned by a single timer entry.
pub struct TimerLifecycle {
    machine: timer_flow::StateMachine,
}

impl Default for TimerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerLifecycle {
    pub fn new() -> Self {
        Self {
            machine: timer_flow::StateMachine::new(),
        }
    }

    pub fn state(&self) -> TimerState {
        match self.machine.state() {
            timer_flow::State::Pending => TimerState::Pending,
            timer_flow::State::Fired => TimerState::Fired,
            timer_flow::State::Cancelled => TimerState::Cancelled,
        }
    }

    /// Feeds `event` into the machine. Returns the new state, or `None` and
    /// leaves the machine untouched when the event is not allowed.
    pub fn apply(&mut self, event: TimerEvent) -> Option<TimerState> {
        let input = match event {
            TimerEvent::Fire => timer_flow::Input::Fire,
            TimerEvent::Cancel => timer_flow::Input::Cancel,
        };
        self.machine.consume(&input).ok()?;
        Some(self.state())
    }
}
