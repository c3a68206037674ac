// Modifier arithmetic for combo emission

use std::collections::HashSet;

use crate::{Key, Modifier};

/// The modifier moves surrounding one combo emission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComboBracket {
    /// Held output modifiers to lift first (reverse press order).
    pub release: Vec<Key>,
    /// Missing combo modifiers to press before the key.
    pub press: Vec<Key>,
    /// Lifted modifiers to re-exert afterwards (original press order).
    pub restore: Vec<Key>,
}

impl ComboBracket {
    pub fn is_identity(&self) -> bool {
        self.release.is_empty() && self.press.is_empty()
    }
}

/// Split the combo's modifier requirements against what is already down on
/// the output.
///
/// A required modifier is *covered* when the held set intersects its key
/// set (so a held `LEFT_CTRL` covers both `LCtrl` and unsided `Ctrl`);
/// uncovered modifiers are synthesized via their output key. Held keys
/// outside the union of covering keys are foreign to the combo: they are
/// lifted for its duration and re-exerted afterwards.
pub fn plan_combo(required: &[Modifier], held: &[Key]) -> ComboBracket {
    let held_set: HashSet<Key> = held.iter().copied().collect();

    let mut covering: HashSet<Key> = HashSet::new();
    let mut press = Vec::new();
    for modifier in required {
        let holders: Vec<Key> = modifier
            .keys()
            .iter()
            .copied()
            .filter(|k| held_set.contains(k))
            .collect();
        if holders.is_empty() {
            press.push(modifier.output_key());
        } else {
            covering.extend(holders);
        }
    }

    // `held` is in press order; foreign keys come back in that order and
    // are lifted in the opposite one.
    let restore: Vec<Key> = held
        .iter()
        .copied()
        .filter(|k| !covering.contains(k))
        .collect();
    let release: Vec<Key> = restore.iter().rev().copied().collect();

    ComboBracket {
        release,
        press,
        restore,
    }
}
