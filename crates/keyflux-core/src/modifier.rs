// Modifier roles and the global modifier registry

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

use crate::Key;

static MODIFIER_REGISTRY: LazyLock<RwLock<ModifierRegistry>> =
    LazyLock::new(|| RwLock::new(ModifierRegistry::with_defaults()));
static NEXT_MODIFIER_ID: AtomicU32 = AtomicU32::new(100);

/// A logical modifier role such as Control, Shift or a user-defined Hyper.
///
/// Built-in modifiers exist in sided (`L_CONTROL`) and unsided (`CONTROL`)
/// forms; an unsided modifier covers both physical keys. Identity is the
/// registry id, so cloned handles compare equal.
#[derive(Debug, Clone)]
pub struct Modifier {
    id: u32,
    name: String,
    aliases: Vec<String>,
    keys: Vec<Key>,
}

struct ModifierRegistry {
    by_name: HashMap<String, Modifier>,
    by_alias: HashMap<String, Modifier>,
    // Sided modifiers win here: defaults register unsided first, sided
    // after, so the map resolves a physical key to its sided role.
    by_key: HashMap<Key, Modifier>,
}

impl ModifierRegistry {
    fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
            by_alias: HashMap::new(),
            by_key: HashMap::new(),
        }
    }

    fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.add_builtin("CONTROL", &["Ctrl", "C"], &[29, 97]);
        reg.add_builtin("L_CONTROL", &["LCtrl", "LC"], &[29]);
        reg.add_builtin("R_CONTROL", &["RCtrl", "RC"], &[97]);
        reg.add_builtin("ALT", &["Alt", "A", "Opt", "Option"], &[56, 100]);
        reg.add_builtin("L_ALT", &["LAlt", "LA", "LOpt", "LOption"], &[56]);
        reg.add_builtin("R_ALT", &["RAlt", "RA", "ROpt", "ROption"], &[100]);
        reg.add_builtin("SHIFT", &["Shift"], &[42, 54]);
        reg.add_builtin("L_SHIFT", &["LShift"], &[42]);
        reg.add_builtin("R_SHIFT", &["RShift"], &[54]);
        reg.add_builtin("META", &["Super", "Win", "Command", "Cmd", "Meta"], &[125, 126]);
        reg.add_builtin(
            "L_META",
            &["LSuper", "LWin", "LCommand", "LCmd", "LMeta"],
            &[125],
        );
        reg.add_builtin(
            "R_META",
            &["RSuper", "RWin", "RCommand", "RCmd", "RMeta"],
            &[126],
        );
        reg.add_builtin("FN", &["Fn"], &[0x1d0]);
        reg
    }

    fn add_builtin(&mut self, name: &str, aliases: &[&str], codes: &[u16]) {
        let modifier = Modifier {
            id: NEXT_MODIFIER_ID.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            keys: codes.iter().map(|c| Key::from(*c)).collect(),
        };
        self.index(modifier);
    }

    fn index(&mut self, modifier: Modifier) {
        for alias in &modifier.aliases {
            self.by_alias.insert(alias.clone(), modifier.clone());
        }
        for &key in &modifier.keys {
            self.by_key.insert(key, modifier.clone());
        }
        self.by_name.insert(modifier.name.clone(), modifier);
    }

    fn add(&mut self, modifier: Modifier) -> Result<(), ModifierError> {
        if self.by_name.contains_key(&modifier.name) {
            return Err(ModifierError::NameExists(modifier.name.clone()));
        }
        for alias in &modifier.aliases {
            if self.by_alias.contains_key(alias) {
                return Err(ModifierError::AliasExists(alias.clone()));
            }
        }
        for &key in &modifier.keys {
            if let Some(existing) = self.by_key.get(&key) {
                return Err(ModifierError::KeyAlreadyAssigned(key, existing.name.clone()));
            }
        }
        self.index(modifier);
        Ok(())
    }
}

impl Modifier {
    /// Register a user-defined modifier (the `add_modifier` surface).
    ///
    /// Fails when the name, an alias, or one of the keys is already taken
    /// by another modifier.
    pub fn register(name: &str, aliases: Vec<String>, keys: Vec<Key>) -> Result<(), ModifierError> {
        if keys.is_empty() {
            return Err(ModifierError::NoKeys(name.to_string()));
        }
        let modifier = Modifier {
            id: NEXT_MODIFIER_ID.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            aliases,
            keys,
        };
        MODIFIER_REGISTRY.write().add(modifier)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First alias, used as the printable form.
    pub fn primary_alias(&self) -> &str {
        self.aliases.first().map(|s| s.as_str()).unwrap_or(&self.name)
    }

    /// A sided (or single-key custom) modifier maps to exactly one key.
    pub fn is_sided(&self) -> bool {
        self.keys.len() == 1
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// The key pressed on output when this modifier must be synthesized.
    /// For unsided modifiers this is the left-hand variant.
    pub fn output_key(&self) -> Key {
        self.keys[0]
    }

    /// Left-hand sided variant of an unsided modifier.
    pub fn to_left(&self) -> Option<Modifier> {
        if self.name.starts_with("L_") {
            return Some(self.clone());
        }
        MODIFIER_REGISTRY
            .read()
            .by_name
            .get(&format!("L_{}", self.name))
            .cloned()
    }

    /// Right-hand sided variant of an unsided modifier.
    pub fn to_right(&self) -> Option<Modifier> {
        if self.name.starts_with("R_") {
            return Some(self.clone());
        }
        MODIFIER_REGISTRY
            .read()
            .by_name
            .get(&format!("R_{}", self.name))
            .cloned()
    }

    /// The unsided parent of a sided modifier (`L_CONTROL` -> `CONTROL`).
    /// Returns None for modifiers with no unsided form (custom, FN).
    pub fn unsided(&self) -> Option<Modifier> {
        let base = self
            .name
            .strip_prefix("L_")
            .or_else(|| self.name.strip_prefix("R_"))?;
        MODIFIER_REGISTRY.read().by_name.get(base).cloned()
    }

    /// Resolve a physical key to its modifier role, preferring the sided
    /// form for the built-ins.
    pub fn from_key(key: Key) -> Option<Modifier> {
        MODIFIER_REGISTRY.read().by_key.get(&key).cloned()
    }

    pub fn from_name(name: &str) -> Option<Modifier> {
        MODIFIER_REGISTRY.read().by_name.get(name).cloned()
    }

    /// Resolve an alias or a name.
    pub fn from_alias(alias: &str) -> Option<Modifier> {
        let reg = MODIFIER_REGISTRY.read();
        reg.by_name
            .get(alias)
            .or_else(|| reg.by_alias.get(alias))
            .cloned()
    }

    /// Whether a key carries a modifier role. Const fast path for the
    /// built-in codes, registry fallback for user-defined modifiers.
    pub fn is_key_modifier(key: Key) -> bool {
        if is_builtin_modifier_code(key.code()) {
            return true;
        }
        MODIFIER_REGISTRY.read().by_key.contains_key(&key)
    }
}

impl PartialEq for Modifier {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Modifier {}

impl std::hash::Hash for Modifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary_alias())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModifierError {
    #[error("modifier '{0}' already exists")]
    NameExists(String),
    #[error("modifier alias '{0}' already exists")]
    AliasExists(String),
    #[error("key {0:?} already assigned to modifier '{1}'")]
    KeyAlreadyAssigned(Key, String),
    #[error("modifier '{0}' has no keys")]
    NoKeys(String),
}

const BUILTIN_MODIFIER_CODES: &[u16] = &[
    29, 97, // L_CONTROL, R_CONTROL
    56, 100, // L_ALT, R_ALT
    42, 54, // L_SHIFT, R_SHIFT
    125, 126, // L_META, R_META
    0x1d0, // FN
];

#[inline]
pub const fn is_builtin_modifier_code(code: u16) -> bool {
    let mut i = 0;
    while i < BUILTIN_MODIFIER_CODES.len() {
        if BUILTIN_MODIFIER_CODES[i] == code {
            return true;
        }
        i += 1;
    }
    false
}
