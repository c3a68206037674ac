// Cooperative timer wheel for the single-threaded engine loop

use std::time::Instant;

use crate::Key;

/// What a timer firing means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Tap/hold decision deadline for one dual-role key.
    Multipurpose(Key),
    /// Earliest suspended-modifier commit deadline.
    SuspendExpiry,
    /// Inactivity window of the active nested keymap.
    SubmapExpiry,
}

/// Timers owned by the event loop.
///
/// Deadlines are absolute; the loop sleeps until `next_deadline()` (or the
/// next input event, whichever comes first) and then drains `pop_due`.
/// The population is tiny (one per held dual-role key plus two singletons)
/// so a plain vector beats a heap here.
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: Vec<(Instant, TimerKind)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer, replacing any existing timer of the same kind.
    pub fn arm(&mut self, kind: TimerKind, at: Instant) {
        self.cancel(kind);
        self.timers.push((at, kind));
    }

    /// Disarm the timer of a kind, if armed.
    pub fn cancel(&mut self, kind: TimerKind) {
        self.timers.retain(|(_, k)| *k != kind);
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.timers.iter().any(|(_, k)| *k == kind)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|(at, _)| *at).min()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = Vec::new();
        self.timers.retain(|(at, kind)| {
            if *at <= now {
                due.push((*at, *kind));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    /// Disarm everything (emergency eject, shutdown).
    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
