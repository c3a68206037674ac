// TOML configuration -> RuleSet

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::combo::ComboParseError;
use crate::mapping::{
    Command, Keymap, Modmap, MultiModmap, RuleSet, ThrottleDelays, Timeouts,
};
use crate::modifier::ModifierError;
use crate::predicate::{Predicate, PredicateParseError};
use crate::{Combo, Key, Modifier};

/// Configuration load failure. The engine refuses to start on any of
/// these; the CLI maps them to exit code 2.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(String),
    #[error("invalid combo: {0}")]
    InvalidCombo(#[from] ComboParseError),
    #[error("unknown key name '{0}'")]
    InvalidKey(String),
    #[error("invalid condition: {0}")]
    InvalidCondition(#[from] PredicateParseError),
    #[error("invalid modifier: {0}")]
    InvalidModifier(#[from] ModifierError),
    #[error("throttle delay {0}ms out of range (0-150)")]
    DelayOutOfRange(u64),
    #[error("timeout {0}s out of range")]
    TimeoutOutOfRange(f64),
}

/// Root TOML table.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    general: Option<GeneralSection>,
    #[serde(default)]
    timeouts: Option<TimeoutsSection>,
    #[serde(default)]
    delays: Option<DelaysSection>,
    #[serde(default)]
    devices: Option<DevicesSection>,
    #[serde(default)]
    modifiers: Vec<ModifierSection>,
    #[serde(default)]
    modmap: Option<ModmapSection>,
    #[serde(default)]
    multipurpose: Vec<MultipurposeSection>,
    #[serde(default)]
    keymap: Vec<KeymapSection>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct GeneralSection {
    emergency_eject_key: Option<String>,
    diagnostics_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TimeoutsSection {
    /// Seconds until a held dual-role key decides for its modifier role.
    multipurpose: Option<f64>,
    /// Seconds a withheld modifier press waits before committing.
    suspend: Option<f64>,
    /// Optional inactivity window of a nested keymap, in seconds.
    submap: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DelaysSection {
    key_pre_delay_ms: Option<u64>,
    key_post_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DevicesSection {
    #[serde(default)]
    only: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModifierSection {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModmapSection {
    #[serde(default)]
    default: HashMap<String, String>,
    #[serde(default)]
    conditionals: Vec<ConditionalModmapSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionalModmapSection {
    condition: String,
    mappings: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct MultipurposeSection {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    /// trigger -> [tap_key, hold_key]
    mappings: HashMap<String, (String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeymapSection {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    mappings: HashMap<String, MappingValue>,
}

/// Right-hand side of a keymap entry: a combo string (or `@` marker), a
/// sequence, or a nested submap table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MappingValue {
    Single(String),
    Sequence(Vec<MappingValue>),
    Submap(HashMap<String, MappingValue>),
}

/// Marker for a submap entry executed immediately on submap entry.
const IMMEDIATELY_KEY: &str = "@immediately";

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Config, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::TomlParse(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Explicit device selection from `[devices].only`, if any.
    pub fn device_filter(&self) -> Vec<String> {
        self.devices
            .as_ref()
            .map(|d| d.only.clone())
            .unwrap_or_default()
    }

    /// Build the rule set. Registers user-defined modifiers as a side
    /// effect, so combo strings in the same config can reference them.
    pub fn to_rule_set(&self) -> Result<RuleSet, ConfigError> {
        for section in &self.modifiers {
            let keys = section
                .keys
                .iter()
                .map(|name| parse_key(name))
                .collect::<Result<Vec<Key>, ConfigError>>()?;
            Modifier::register(&section.name, section.aliases.clone(), keys)?;
        }

        let mut rules = RuleSet::default();

        if let Some(general) = &self.general {
            if let Some(name) = &general.emergency_eject_key {
                rules.emergency_eject_key = parse_key(name)?;
            }
            if let Some(name) = &general.diagnostics_key {
                rules.diagnostics_key = parse_key(name)?;
            }
        }

        if let Some(timeouts) = &self.timeouts {
            rules.timeouts = Timeouts {
                multipurpose: timeouts
                    .multipurpose
                    .map(parse_seconds)
                    .transpose()?
                    .unwrap_or(Timeouts::default().multipurpose),
                suspend: timeouts
                    .suspend
                    .map(parse_seconds)
                    .transpose()?
                    .unwrap_or(Timeouts::default().suspend),
                submap: timeouts.submap.map(parse_seconds).transpose()?,
            };
        }

        if let Some(delays) = &self.delays {
            rules.delays = ThrottleDelays {
                key_pre_delay_ms: parse_delay(delays.key_pre_delay_ms.unwrap_or(0))?,
                key_post_delay_ms: parse_delay(delays.key_post_delay_ms.unwrap_or(0))?,
            };
        }

        if let Some(modmap) = &self.modmap {
            // Conditionals go first so window-specific rules can shadow the
            // default map (first matching rule containing the key wins).
            for (i, conditional) in modmap.conditionals.iter().enumerate() {
                let predicate = Predicate::parse(&conditional.condition)?;
                rules.modmaps.push(Modmap::guarded(
                    format!("conditional-{i}"),
                    parse_key_map(&conditional.mappings)?,
                    predicate,
                ));
            }
            if !modmap.default.is_empty() {
                rules
                    .modmaps
                    .push(Modmap::new("default", parse_key_map(&modmap.default)?));
            }
        }

        for (i, section) in self.multipurpose.iter().enumerate() {
            let mut map = HashMap::new();
            for (trigger, (tap, hold)) in &section.mappings {
                map.insert(parse_key(trigger)?, (parse_key(tap)?, parse_key(hold)?));
            }
            let name = section
                .name
                .clone()
                .unwrap_or_else(|| format!("multipurpose-{i}"));
            let modmap = match &section.condition {
                Some(condition) => {
                    MultiModmap::guarded(name, map, Predicate::parse(condition)?)
                }
                None => MultiModmap::new(name, map),
            };
            rules.multi_modmaps.push(modmap);
        }

        for (i, section) in self.keymap.iter().enumerate() {
            let name = section
                .name
                .clone()
                .unwrap_or_else(|| format!("keymap-{i}"));
            let map = parse_keymap_entries(&section.mappings)?;
            let keymap = match &section.condition {
                Some(condition) => Keymap::guarded(name, map, Predicate::parse(condition)?),
                None => Keymap::with_mappings(name, map),
            };
            rules.keymaps.push(keymap);
        }

        Ok(rules)
    }
}

fn parse_key(name: &str) -> Result<Key, ConfigError> {
    Key::parse(name).ok_or_else(|| ConfigError::InvalidKey(name.to_string()))
}

fn parse_seconds(secs: f64) -> Result<Duration, ConfigError> {
    if secs.is_nan() || secs <= 0.0 || secs > 3600.0 {
        return Err(ConfigError::TimeoutOutOfRange(secs));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_delay(ms: u64) -> Result<u64, ConfigError> {
    if ms > 150 {
        return Err(ConfigError::DelayOutOfRange(ms));
    }
    Ok(ms)
}

fn parse_key_map(entries: &HashMap<String, String>) -> Result<HashMap<Key, Key>, ConfigError> {
    let mut map = HashMap::new();
    for (from, to) in entries {
        map.insert(parse_key(from)?, parse_key(to)?);
    }
    Ok(map)
}

fn parse_keymap_entries(
    entries: &HashMap<String, MappingValue>,
) -> Result<HashMap<Combo, Command>, ConfigError> {
    let mut map = HashMap::new();
    for (combo_str, value) in entries {
        if combo_str == IMMEDIATELY_KEY {
            continue;
        }
        map.insert(Combo::parse(combo_str)?, parse_command(value)?);
    }
    Ok(map)
}

fn parse_command(value: &MappingValue) -> Result<Command, ConfigError> {
    match value {
        MappingValue::Single(s) => parse_command_str(s),
        MappingValue::Sequence(items) => {
            let commands = items
                .iter()
                .map(parse_command)
                .collect::<Result<Vec<Command>, ConfigError>>()?;
            Ok(Command::Sequence(commands))
        }
        MappingValue::Submap(entries) => {
            let immediately = entries
                .get(IMMEDIATELY_KEY)
                .map(|v| parse_command(v).map(Box::new))
                .transpose()?;
            let keymap = Keymap::with_mappings("submap", parse_keymap_entries(entries)?);
            Ok(Command::Submap { keymap, immediately })
        }
    }
}

fn parse_command_str(s: &str) -> Result<Command, ConfigError> {
    match s {
        "@escape_next" => Ok(Command::EscapeNext),
        "@ignore_next" => Ok(Command::IgnoreNext),
        _ => {
            if let Some(combo_str) = s.strip_prefix("@bind:") {
                return Ok(Command::Bind(Combo::parse(combo_str)?));
            }
            Ok(Command::Combo(Combo::parse(s)?))
        }
    }
}
