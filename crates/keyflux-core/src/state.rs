// Per-key input-side state tracking

use smallvec::SmallVec;
use std::collections::HashMap;
use std::time::Instant;

use crate::{Key, Modifier};

/// State of one physically held key.
#[derive(Debug, Clone)]
pub struct Keystate {
    /// The real key reported by the input device.
    pub inkey: Key,
    /// Identity after modmap substitution (equals `inkey` if unmapped).
    pub key: Key,
    /// Press timestamp, from the input event.
    pub time: Instant,
    /// Monotonic press sequence number; commits happen in this order.
    pub seq: u64,
    /// Withheld in the suspend buffer, not yet on the output.
    pub suspended: bool,
    /// Deadline after which a suspended press commits on its own.
    pub suspend_deadline: Option<Instant>,
    /// Consumed by a remapped combo; its release must be silent.
    pub spent: bool,
    /// Whether this key's press has been sent to the output device.
    pub exerted_on_output: bool,
}

impl Keystate {
    pub fn new(inkey: Key, key: Key, time: Instant, seq: u64) -> Self {
        Self {
            inkey,
            key,
            time,
            seq,
            suspended: false,
            suspend_deadline: None,
            spent: false,
            exerted_on_output: false,
        }
    }

    pub fn is_modifier(&self) -> bool {
        Modifier::is_key_modifier(self.key)
    }
}

/// What happens to the next input key-down: armed by the `EscapeNext` and
/// `IgnoreNext` commands, consumed by exactly one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NextKeyMode {
    #[default]
    Normal,
    Escape,
    Ignore,
}

/// Store of all currently held input keys, keyed by physical keycode.
#[derive(Debug, Default)]
pub struct KeyStateStore {
    states: HashMap<u16, Keystate>,
    next_seq: u64,
}

impl KeyStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn none_pressed(&self) -> bool {
        self.states.is_empty()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, inkey: Key) -> Option<&Keystate> {
        self.states.get(&inkey.code())
    }

    pub fn get_mut(&mut self, inkey: Key) -> Option<&mut Keystate> {
        self.states.get_mut(&inkey.code())
    }

    /// Record a press, replacing any stale state for the same key.
    pub fn press(&mut self, inkey: Key, key: Key, time: Instant) -> &mut Keystate {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.states
            .insert(inkey.code(), Keystate::new(inkey, key, time, seq));
        self.states
            .get_mut(&inkey.code())
            .expect("state just inserted")
    }

    /// Remove and return the state for a released key.
    pub fn release(&mut self, inkey: Key) -> Option<Keystate> {
        self.states.remove(&inkey.code())
    }

    /// All held states in press order.
    pub fn pressed_in_order(&self) -> Vec<&Keystate> {
        let mut states: Vec<&Keystate> = self.states.values().collect();
        states.sort_by_key(|ks| ks.seq);
        states
    }

    /// Keys of held modifiers, in press order.
    pub fn pressed_modifier_keys(&self) -> SmallVec<[Key; 4]> {
        self.pressed_in_order()
            .into_iter()
            .filter(|ks| ks.is_modifier())
            .map(|ks| ks.key)
            .collect()
    }

    /// Sided modifier roles of held modifiers, in press order.
    pub fn pressed_modifiers(&self) -> Vec<Modifier> {
        self.pressed_in_order()
            .into_iter()
            .filter(|ks| ks.is_modifier())
            .filter_map(|ks| Modifier::from_key(ks.key))
            .collect()
    }

    /// Input keycodes of suspended states, in press order.
    pub fn suspended_keys(&self) -> Vec<Key> {
        self.pressed_in_order()
            .into_iter()
            .filter(|ks| ks.suspended)
            .map(|ks| ks.inkey)
            .collect()
    }

    pub fn any_suspended(&self) -> bool {
        self.states.values().any(|ks| ks.suspended)
    }

    /// Earliest pending suspend deadline, for the timer wheel.
    pub fn next_suspend_deadline(&self) -> Option<Instant> {
        self.states
            .values()
            .filter(|ks| ks.suspended)
            .filter_map(|ks| ks.suspend_deadline)
            .min()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Keystate> {
        self.states.values_mut()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
