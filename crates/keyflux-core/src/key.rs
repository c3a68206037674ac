// Key codes from Linux input-event-codes.h

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// A single keyboard key code.
///
/// Newtype wrapper around the numeric codes from `input-event-codes.h`.
/// Values are stable across runs and identical to what evdev reports, so a
/// `Key` can cross the input/output boundary without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Key(pub u16);

impl Key {
    /// Raw numeric code value.
    pub fn code(self) -> u16 {
        self.0
    }

    /// Canonical display name, or "UNKNOWN" for unnamed codes.
    pub fn name(self) -> &'static str {
        name_table()
            .get(&self.0)
            .copied()
            .unwrap_or("UNKNOWN")
    }

    /// Resolve a key by name, case-insensitively. Accepts canonical names
    /// and the aliases in the table (`ESC`/`ESCAPE`, bare digits, ...).
    pub fn parse(name: &str) -> Option<Key> {
        let upper = name.to_uppercase();
        parse_table().get(upper.as_str()).copied().map(Key)
    }
}

impl From<u16> for Key {
    fn from(code: u16) -> Self {
        Key(code)
    }
}

impl From<Key> for u16 {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One row per key code: (code, canonical name, extra parse aliases).
///
/// The canonical name is what `Display` prints; parsing accepts canonical
/// names and aliases alike. Codes follow input-event-codes.h.
const KEY_TABLE: &[(u16, &str, &[&str])] = &[
    (0, "RESERVED", &[]),
    (1, "ESC", &["ESCAPE"]),
    (2, "KEY_1", &["1"]),
    (3, "KEY_2", &["2"]),
    (4, "KEY_3", &["3"]),
    (5, "KEY_4", &["4"]),
    (6, "KEY_5", &["5"]),
    (7, "KEY_6", &["6"]),
    (8, "KEY_7", &["7"]),
    (9, "KEY_8", &["8"]),
    (10, "KEY_9", &["9"]),
    (11, "KEY_0", &["0"]),
    (12, "MINUS", &[]),
    (13, "EQUAL", &[]),
    (14, "BACKSPACE", &[]),
    (15, "TAB", &[]),
    (16, "Q", &[]),
    (17, "W", &[]),
    (18, "E", &[]),
    (19, "R", &[]),
    (20, "T", &[]),
    (21, "Y", &[]),
    (22, "U", &[]),
    (23, "I", &[]),
    (24, "O", &[]),
    (25, "P", &[]),
    (26, "LEFT_BRACE", &["LBRACE"]),
    (27, "RIGHT_BRACE", &["RBRACE"]),
    (28, "ENTER", &["RETURN"]),
    (29, "LEFT_CTRL", &["LEFTCTRL"]),
    (30, "A", &[]),
    (31, "S", &[]),
    (32, "D", &[]),
    (33, "F", &[]),
    (34, "G", &[]),
    (35, "H", &[]),
    (36, "J", &[]),
    (37, "K", &[]),
    (38, "L", &[]),
    (39, "SEMICOLON", &[]),
    (40, "APOSTROPHE", &[]),
    (41, "GRAVE", &[]),
    (42, "LEFT_SHIFT", &["LEFTSHIFT"]),
    (43, "BACKSLASH", &[]),
    (44, "Z", &[]),
    (45, "X", &[]),
    (46, "C", &[]),
    (47, "V", &[]),
    (48, "B", &[]),
    (49, "N", &[]),
    (50, "M", &[]),
    (51, "COMMA", &[]),
    (52, "DOT", &[]),
    (53, "SLASH", &[]),
    (54, "RIGHT_SHIFT", &["RIGHTSHIFT"]),
    (55, "KPASTERISK", &[]),
    (56, "LEFT_ALT", &["LEFTALT"]),
    (57, "SPACE", &[]),
    (58, "CAPSLOCK", &["CAPS_LOCK"]),
    (59, "F1", &[]),
    (60, "F2", &[]),
    (61, "F3", &[]),
    (62, "F4", &[]),
    (63, "F5", &[]),
    (64, "F6", &[]),
    (65, "F7", &[]),
    (66, "F8", &[]),
    (67, "F9", &[]),
    (68, "F10", &[]),
    (69, "NUMLOCK", &["NUM_LOCK"]),
    (70, "SCROLLLOCK", &["SCROLL_LOCK"]),
    (71, "KP7", &[]),
    (72, "KP8", &[]),
    (73, "KP9", &[]),
    (74, "KPMINUS", &[]),
    (75, "KP4", &[]),
    (76, "KP5", &[]),
    (77, "KP6", &[]),
    (78, "KPPLUS", &[]),
    (79, "KP1", &[]),
    (80, "KP2", &[]),
    (81, "KP3", &[]),
    (82, "KP0", &[]),
    (83, "KPDOT", &[]),
    (86, "KEY_102ND", &["102ND"]),
    (87, "F11", &[]),
    (88, "F12", &[]),
    (96, "KPENTER", &[]),
    (97, "RIGHT_CTRL", &["RIGHTCTRL"]),
    (98, "KPSLASH", &[]),
    (99, "SYSRQ", &["PRINT", "PRTSCR"]),
    (100, "RIGHT_ALT", &["RIGHTALT"]),
    (102, "HOME", &[]),
    (103, "UP", &[]),
    (104, "PAGE_UP", &["PAGEUP"]),
    (105, "LEFT", &[]),
    (106, "RIGHT", &[]),
    (107, "END", &[]),
    (108, "DOWN", &[]),
    (109, "PAGE_DOWN", &["PAGEDOWN"]),
    (110, "INSERT", &[]),
    (111, "DELETE", &[]),
    (113, "MUTE", &[]),
    (114, "VOLUMEDOWN", &[]),
    (115, "VOLUMEUP", &[]),
    (116, "POWER", &[]),
    (117, "KPEQUAL", &[]),
    (119, "PAUSE", &[]),
    (121, "KPCOMMA", &[]),
    (125, "LEFT_META", &["LEFTMETA"]),
    (126, "RIGHT_META", &["RIGHTMETA"]),
    (127, "COMPOSE", &["MENU_COMPOSE"]),
    (139, "MENU", &[]),
    (142, "SLEEP", &[]),
    (143, "WAKEUP", &[]),
    (163, "NEXTSONG", &[]),
    (164, "PLAYPAUSE", &[]),
    (165, "PREVIOUSSONG", &[]),
    (166, "STOPCD", &[]),
    (183, "F13", &[]),
    (184, "F14", &[]),
    (185, "F15", &[]),
    (186, "F16", &[]),
    (187, "F17", &[]),
    (188, "F18", &[]),
    (189, "F19", &[]),
    (190, "F20", &[]),
    (191, "F21", &[]),
    (192, "F22", &[]),
    (193, "F23", &[]),
    (194, "F24", &[]),
    (224, "BRIGHTNESSDOWN", &[]),
    (225, "BRIGHTNESSUP", &[]),
    (0x1d0, "FN", &[]),
];

fn name_table() -> &'static HashMap<u16, &'static str> {
    static NAMES: OnceLock<HashMap<u16, &'static str>> = OnceLock::new();
    NAMES.get_or_init(|| {
        KEY_TABLE
            .iter()
            .map(|(code, name, _)| (*code, *name))
            .collect()
    })
}

fn parse_table() -> &'static HashMap<&'static str, u16> {
    static PARSE: OnceLock<HashMap<&'static str, u16>> = OnceLock::new();
    PARSE.get_or_init(|| {
        let mut map = HashMap::new();
        for (code, name, aliases) in KEY_TABLE {
            map.insert(*name, *code);
            for alias in *aliases {
                map.insert(*alias, *code);
            }
        }
        map
    })
}
