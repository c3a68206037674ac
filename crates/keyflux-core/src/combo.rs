// Combo model and combo string parser

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::modifier::Modifier;
use crate::Key;

/// A key combination: a set of modifier roles plus a base key.
///
/// Sided modifiers (`LCtrl`) constrain the match to that side; unsided ones
/// accept either. Equality and hashing are order-independent over the
/// modifier set so `Ctrl-Shift-A` and `Shift-Ctrl-A` are the same combo.
#[derive(Debug, Clone)]
pub struct Combo {
    modifiers: Vec<Modifier>,
    key: Key,
}

impl Combo {
    pub fn new(modifiers: impl IntoIterator<Item = Modifier>, key: Key) -> Self {
        Self {
            modifiers: modifiers.into_iter().collect(),
            key,
        }
    }

    /// A bare key with no modifiers.
    pub fn bare(key: Key) -> Self {
        Self {
            modifiers: Vec::new(),
            key,
        }
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// Parse a combo string of the form `(<Mod>-)*<Key>`.
    ///
    /// Modifier tokens accept the registered aliases (`Ctrl`/`C`,
    /// `Super`/`Win`/`Cmd`, ...) with optional `L`/`R` side prefixes; the
    /// trailing token resolves case-insensitively against the key table.
    pub fn parse(exp: &str) -> Result<Combo, ComboParseError> {
        let trimmed = exp.trim();
        if trimmed.is_empty() {
            return Err(ComboParseError::Empty);
        }
        if trimmed.ends_with('-') {
            return Err(ComboParseError::MissingKey(trimmed.to_string()));
        }

        let parts: Vec<&str> = trimmed.split('-').collect();
        let key_token = parts.last().copied().unwrap_or_default();
        let key = Key::parse(key_token)
            .ok_or_else(|| ComboParseError::UnknownKey(key_token.to_string()))?;

        let mut modifiers = Vec::new();
        let mut seen = HashSet::new();
        for token in &parts[..parts.len() - 1] {
            let modifier = Modifier::from_alias(token)
                .ok_or_else(|| ComboParseError::UnknownModifier(token.to_string()))?;
            if !seen.insert(modifier.clone()) {
                return Err(ComboParseError::DuplicateModifier(token.to_string()));
            }
            modifiers.push(modifier);
        }

        Ok(Combo { modifiers, key })
    }
}

impl PartialEq for Combo {
    fn eq(&self, other: &Self) -> bool {
        if self.key != other.key {
            return false;
        }
        let mine: HashSet<&Modifier> = self.modifiers.iter().collect();
        let theirs: HashSet<&Modifier> = other.modifiers.iter().collect();
        mine == theirs
    }
}

impl Eq for Combo {}

impl Hash for Combo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Order-independent: combine sorted per-modifier hashes.
        let mut modifier_hashes: Vec<u64> = self
            .modifiers
            .iter()
            .map(|m| {
                let mut h = DefaultHasher::new();
                m.hash(&mut h);
                h.finish()
            })
            .collect();
        modifier_hashes.sort_unstable();
        modifier_hashes.dedup();
        for h in modifier_hashes {
            h.hash(state);
        }
        self.key.hash(state);
    }
}

impl fmt::Display for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}-", modifier)?;
        }
        write!(f, "{}", self.key)
    }
}

/// Why a combo string failed to parse. Reported as `ConfigError` at load
/// time; the engine never starts with an unparsable rule set.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComboParseError {
    #[error("combo string is empty")]
    Empty,
    #[error("combo '{0}' is missing its base key")]
    MissingKey(String),
    #[error("unknown key name '{0}'")]
    UnknownKey(String),
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
    #[error("duplicate modifier '{0}'")]
    DuplicateModifier(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_key() {
        let combo = Combo::parse("a").unwrap();
        assert!(combo.modifiers().is_empty());
        assert_eq!(combo.key(), Key::from(30));
    }

    #[test]
    fn parse_single_modifier() {
        let combo = Combo::parse("Ctrl-a").unwrap();
        assert_eq!(combo.modifiers().len(), 1);
        assert_eq!(combo.modifiers()[0].name(), "CONTROL");
        assert_eq!(combo.key(), Key::from(30));
    }

    #[test]
    fn parse_sided_aliases() {
        assert_eq!(Combo::parse("LC-a").unwrap().modifiers()[0].name(), "L_CONTROL");
        assert_eq!(Combo::parse("RCtrl-a").unwrap().modifiers()[0].name(), "R_CONTROL");
        assert_eq!(Combo::parse("LSuper-TAB").unwrap().modifiers()[0].name(), "L_META");
    }

    #[test]
    fn parse_multiple_modifiers() {
        let combo = Combo::parse("Ctrl-Shift-Alt-F1").unwrap();
        assert_eq!(combo.modifiers().len(), 3);
        assert_eq!(combo.key(), Key::from(59));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Combo::parse(""), Err(ComboParseError::Empty));
        assert_eq!(Combo::parse("   "), Err(ComboParseError::Empty));
        assert!(matches!(Combo::parse("Ctrl-"), Err(ComboParseError::MissingKey(_))));
        assert!(matches!(
            Combo::parse("Ctrl-Bogus"),
            Err(ComboParseError::UnknownKey(_))
        ));
        assert!(matches!(
            Combo::parse("Bogus-a"),
            Err(ComboParseError::UnknownModifier(_))
        ));
    }

    #[test]
    fn parse_rejects_duplicate_modifier() {
        assert!(matches!(
            Combo::parse("Ctrl-Ctrl-a"),
            Err(ComboParseError::DuplicateModifier(_))
        ));
        // Same modifier through a different alias is still a duplicate.
        assert!(matches!(
            Combo::parse("Ctrl-C-a"),
            Err(ComboParseError::DuplicateModifier(_))
        ));
    }

    #[test]
    fn equality_is_order_independent() {
        let a = Combo::parse("Ctrl-Shift-a").unwrap();
        let b = Combo::parse("Shift-Ctrl-a").unwrap();
        assert_eq!(a, b);

        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn sided_and_unsided_are_distinct() {
        let sided = Combo::parse("LCtrl-a").unwrap();
        let unsided = Combo::parse("Ctrl-a").unwrap();
        assert_ne!(sided, unsided);
    }

    #[test]
    fn display_round_trips() {
        for s in ["Ctrl-a", "LCtrl-Shift-TAB", "Cmd-SPACE", "F5"] {
            let combo = Combo::parse(s).unwrap();
            let reparsed = Combo::parse(&combo.to_string()).unwrap();
            assert_eq!(combo, reparsed, "round-trip of '{}' via '{}'", s, combo);
        }
    }
}
