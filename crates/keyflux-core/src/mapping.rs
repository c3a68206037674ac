// Rule set: modmaps, multipurpose modmaps, keymaps and their commands

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::predicate::Predicate;
use crate::{Combo, Key, Modifier};

/// Simple key-identity substitution, optionally guarded by a predicate.
#[derive(Debug, Clone, Default)]
pub struct Modmap {
    name: String,
    map: HashMap<Key, Key>,
    predicate: Option<Predicate>,
}

impl Modmap {
    pub fn new(name: impl Into<String>, map: HashMap<Key, Key>) -> Self {
        Self {
            name: name.into(),
            map,
            predicate: None,
        }
    }

    pub fn guarded(name: impl Into<String>, map: HashMap<Key, Key>, predicate: Predicate) -> Self {
        Self {
            name: name.into(),
            map,
            predicate: Some(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, key: Key) -> bool {
        self.map.contains_key(&key)
    }

    pub fn get(&self, key: Key) -> Option<Key> {
        self.map.get(&key).copied()
    }

    pub fn matches(&self, ctx: &Context) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.matches(ctx))
    }
}

/// Dual-role (tap/hold) key table.
#[derive(Debug, Clone, Default)]
pub struct MultiModmap {
    name: String,
    map: HashMap<Key, (Key, Key)>,
    predicate: Option<Predicate>,
}

impl MultiModmap {
    pub fn new(name: impl Into<String>, map: HashMap<Key, (Key, Key)>) -> Self {
        Self {
            name: name.into(),
            map,
            predicate: None,
        }
    }

    pub fn guarded(
        name: impl Into<String>,
        map: HashMap<Key, (Key, Key)>,
        predicate: Predicate,
    ) -> Self {
        Self {
            name: name.into(),
            map,
            predicate: Some(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, key: Key) -> bool {
        self.map.contains_key(&key)
    }

    /// `(tap_key, hold_key)` pair for a trigger.
    pub fn get(&self, key: Key) -> Option<(Key, Key)> {
        self.map.get(&key).copied()
    }

    pub fn matches(&self, ctx: &Context) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.matches(ctx))
    }
}

/// Combo-to-command table, optionally guarded by a predicate.
#[derive(Debug, Clone, Default)]
pub struct Keymap {
    name: String,
    map: HashMap<Combo, Command>,
    predicate: Option<Predicate>,
}

impl Keymap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            map: HashMap::new(),
            predicate: None,
        }
    }

    pub fn with_mappings(name: impl Into<String>, map: HashMap<Combo, Command>) -> Self {
        Self {
            name: name.into(),
            map,
            predicate: None,
        }
    }

    pub fn guarded(
        name: impl Into<String>,
        map: HashMap<Combo, Command>,
        predicate: Predicate,
    ) -> Self {
        Self {
            name: name.into(),
            map,
            predicate: Some(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&mut self, combo: Combo, command: Command) {
        self.map.insert(combo, command);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn matches(&self, ctx: &Context) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.matches(ctx))
    }

    /// Look up a combo for the given held sided modifiers.
    ///
    /// Candidates are tried from most to least specific: the all-sided form
    /// first, then every substitution of sided modifiers by their unsided
    /// parents, so an exact-side entry shadows its unsided equivalent.
    pub fn lookup(&self, held: &[Modifier], key: Key) -> Option<&Command> {
        let n = held.len();
        debug_assert!(n < 16, "implausible modifier count");

        let mut masks: Vec<u32> = (0..(1u32 << n)).collect();
        masks.sort_by_key(|m| m.count_ones());

        for mask in masks {
            let mut mods: Vec<Modifier> = Vec::with_capacity(n);
            let mut viable = true;
            for (i, held_mod) in held.iter().enumerate() {
                let candidate = if mask & (1 << i) != 0 {
                    match held_mod.unsided() {
                        Some(unsided) => unsided,
                        None => {
                            viable = false;
                            break;
                        }
                    }
                } else {
                    held_mod.clone()
                };
                // Both sides of one modifier may be held; collapsing them to
                // the same unsided role must not produce a duplicate.
                if !mods.contains(&candidate) {
                    mods.push(candidate);
                }
            }
            if !viable {
                continue;
            }
            if let Some(command) = self.map.get(&Combo::new(mods, key)) {
                return Some(command);
            }
        }
        None
    }
}

/// Error surfaced by a `Custom` hook. Isolated at the execution boundary:
/// logged and treated as a no-op, never touching engine state.
#[derive(Debug, Clone, thiserror::Error)]
#[error("custom hook failed: {0}")]
pub struct CustomHookError(pub String);

/// Host-provided hook for `Command::Custom`. Runs against the context
/// snapshot of the triggering press; may return a follow-up command.
pub type CustomHook =
    Arc<dyn Fn(&Context) -> Result<Option<Command>, CustomHookError> + Send + Sync>;

/// What a matched combo does.
#[derive(Clone)]
pub enum Command {
    /// Press required modifiers, tap the key, restore modifier state.
    Combo(Combo),
    /// Tap a bare key (shorthand for a modifier-less combo).
    Key(Key),
    /// Run children in order, recomputing modifier bracketing between them.
    Sequence(Vec<Command>),
    /// Push a nested keymap awaiting the next combo; `immediately` runs on
    /// entry for instant feedback.
    Submap {
        keymap: Keymap,
        immediately: Option<Box<Command>>,
    },
    /// The next input key is emitted verbatim, bypassing all rules.
    EscapeNext,
    /// The next input key is dropped entirely.
    IgnoreNext,
    /// Emit the combo but keep its output modifiers held until the input
    /// trigger key is released (OS-level app switchers).
    Bind(Combo),
    /// Invoke a host hook; an `Ok(Some(command))` result is executed.
    Custom(CustomHook),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Combo(c) => f.debug_tuple("Combo").field(c).finish(),
            Command::Key(k) => f.debug_tuple("Key").field(k).finish(),
            Command::Sequence(s) => f.debug_tuple("Sequence").field(s).finish(),
            Command::Submap { keymap, .. } => {
                f.debug_struct("Submap").field("keymap", &keymap.name()).finish()
            }
            Command::EscapeNext => f.write_str("EscapeNext"),
            Command::IgnoreNext => f.write_str("IgnoreNext"),
            Command::Bind(c) => f.debug_tuple("Bind").field(c).finish(),
            Command::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Engine timeouts. Defaults: one second each, no submap inactivity
/// window (a submap then persists until the next key press).
#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    pub multipurpose: Duration,
    pub suspend: Duration,
    pub submap: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            multipurpose: Duration::from_secs(1),
            suspend: Duration::from_secs(1),
            submap: None,
        }
    }
}

/// Output pacing for applications that drop too-fast synthetic events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThrottleDelays {
    pub key_pre_delay_ms: u64,
    pub key_post_delay_ms: u64,
}

/// The pre-built rule set the engine consumes.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub modmaps: Vec<Modmap>,
    pub multi_modmaps: Vec<MultiModmap>,
    pub keymaps: Vec<Keymap>,
    pub timeouts: Timeouts,
    pub delays: ThrottleDelays,
    pub emergency_eject_key: Key,
    pub diagnostics_key: Key,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            modmaps: Vec::new(),
            multi_modmaps: Vec::new(),
            keymaps: Vec::new(),
            timeouts: Timeouts::default(),
            delays: ThrottleDelays::default(),
            emergency_eject_key: Key::parse("F16").expect("F16 in key table"),
            diagnostics_key: Key::parse("F15").expect("F15 in key table"),
        }
    }
}

impl RuleSet {
    /// Apply the modmap substitution: the first matching rule containing
    /// the key wins; with no match the key passes through.
    pub fn modmap_key(&self, key: Key, ctx: &Context) -> Key {
        for modmap in &self.modmaps {
            if modmap.contains(key) && modmap.matches(ctx) {
                return modmap.get(key).unwrap_or(key);
            }
        }
        key
    }

    /// Dual-role pairing for a key, from the first matching rule.
    pub fn multipurpose_for(&self, key: Key, ctx: &Context) -> Option<(Key, Key)> {
        for modmap in &self.multi_modmaps {
            if modmap.contains(key) && modmap.matches(ctx) {
                return modmap.get(key);
            }
        }
        None
    }

    /// Look up a combo across the composed keymap stack: matching keymaps
    /// in order, earlier entries shadowing later ones.
    pub fn lookup_combo(&self, held: &[Modifier], key: Key, ctx: &Context) -> Option<&Command> {
        for keymap in &self.keymaps {
            if !keymap.matches(ctx) {
                continue;
            }
            if let Some(command) = keymap.lookup(held, key) {
                return Some(command);
            }
        }
        None
    }
}
