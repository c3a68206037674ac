// keyflux core: the event transformation engine
//
// Grabs raw key events from kernel input devices, rewrites them through a
// rule set (modmaps, multipurpose tap/hold keys, combo keymaps with nested
// submaps, window-context predicates) and re-emits the stream through a
// synthetic uinput keyboard.

pub mod combo;
pub mod config;
pub mod context;
pub mod event;
pub mod input;
pub mod key;
pub mod mapping;
pub mod modifier;
pub mod multipurpose;
pub mod output;
pub mod predicate;
pub mod scheduler;
pub mod state;
pub mod transform;

pub use combo::{Combo, ComboParseError};
pub use config::{Config, ConfigError};
pub use context::{Context, ContextError, ContextProvider, NullProvider, ProviderKind, StaticProvider};
pub use event::{KeyAction, KeyEvent};
pub use input::{DeviceError, DeviceInfo, Source};
pub use key::Key;
pub use mapping::{
    Command, CustomHook, CustomHookError, Keymap, Modmap, MultiModmap, RuleSet, ThrottleDelays,
    Timeouts,
};
pub use modifier::{Modifier, ModifierError};
pub use output::{Output, OutputError, RecordingSink, Sink, SinkEvent, UinputSink};
pub use predicate::{Predicate, PredicateParseError};
pub use transform::{Engine, Flow};
