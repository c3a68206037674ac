// Multipurpose (tap vs. hold) key resolution

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::Key;

/// Resolution state of one dual-role key.
///
/// `Idle` is represented by absence from the table. `DecidedTap` is
/// terminal (the tap pair is emitted at decision time and the entry
/// removed), so only the two live states are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MpState {
    /// Pressed, timer armed; tap vs. hold not yet known.
    Undecided { tap: Key, hold: Key, deadline: Instant },
    /// Acting as its modifier role; the hold press has been emitted.
    DecidedMod { hold: Key },
}

/// Outcome of releasing a dual-role key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpRelease {
    /// Released while undecided: emit the tap key as a press+release pair.
    Tap(Key),
    /// Released after deciding for the modifier role: release the hold key.
    ModRelease(Key),
}

/// Table of concurrently active dual-role keys.
///
/// Several keys may be undecided at once; a foreign key press flips all of
/// them to their modifier role in press order. A sibling's own modifier
/// decision does not count as "another key pressed" — only a real output
/// key-down (including a sibling's tap emission) does.
#[derive(Debug, Default)]
pub struct MultipurposeStates {
    states: HashMap<u16, MpState>,
    order: Vec<Key>,
}

impl MultipurposeStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, key: Key) -> bool {
        self.states.contains_key(&key.code())
    }

    pub fn any_undecided(&self) -> bool {
        self.states
            .values()
            .any(|s| matches!(s, MpState::Undecided { .. }))
    }

    /// Enter `Undecided` for a pressed trigger key.
    pub fn start(&mut self, key: Key, tap: Key, hold: Key, now: Instant, timeout: Duration) {
        self.states.insert(
            key.code(),
            MpState::Undecided {
                tap,
                hold,
                deadline: now + timeout,
            },
        );
        self.order.push(key);
    }

    /// Another physical key was pressed: flip every undecided key to its
    /// modifier role. Returns `(trigger, hold)` pairs in press order; the
    /// hold presses must be emitted before the new key is processed.
    pub fn decide_all_as_mod(&mut self) -> Vec<(Key, Key)> {
        let mut decided = Vec::new();
        for key in self.order.clone() {
            if let Some(state) = self.states.get_mut(&key.code()) {
                if let MpState::Undecided { hold, .. } = *state {
                    *state = MpState::DecidedMod { hold };
                    decided.push((key, hold));
                }
            }
        }
        decided
    }

    /// The per-key timer fired. At or past the deadline with the key still
    /// held, the key decides for its modifier role; returns the hold key to
    /// press.
    pub fn on_timeout(&mut self, key: Key, now: Instant) -> Option<Key> {
        let state = self.states.get_mut(&key.code())?;
        if let MpState::Undecided { hold, deadline, .. } = *state {
            if now >= deadline {
                *state = MpState::DecidedMod { hold };
                return Some(hold);
            }
        }
        None
    }

    /// The trigger key was released. Undecided before the deadline is a
    /// tap; at or past the deadline the key has (perhaps unreported) become
    /// a modifier and its release is a hold release.
    pub fn on_release(&mut self, key: Key, now: Instant) -> Option<MpRelease> {
        let state = self.states.remove(&key.code())?;
        self.order.retain(|k| *k != key);
        match state {
            MpState::Undecided { tap, hold, deadline } => {
                if now < deadline {
                    Some(MpRelease::Tap(tap))
                } else {
                    Some(MpRelease::ModRelease(hold))
                }
            }
            MpState::DecidedMod { hold } => Some(MpRelease::ModRelease(hold)),
        }
    }

    /// Whether the release in `on_release` will need a hold press emitted
    /// first (timer elapsed but never fired through the loop).
    pub fn is_undecided(&self, key: Key) -> bool {
        matches!(
            self.states.get(&key.code()),
            Some(MpState::Undecided { .. })
        )
    }

    /// Hold key of a key already decided as modifier.
    pub fn decided_hold(&self, key: Key) -> Option<Key> {
        match self.states.get(&key.code()) {
            Some(MpState::DecidedMod { hold }) => Some(*hold),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.order.clear();
    }
}
