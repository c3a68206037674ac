// Window/device context snapshots and the provider interface

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Immutable snapshot of the focus/input environment at the moment of a key
/// press. Predicates evaluate against this; empty strings simply fail to
/// match, so a failed provider degrades the engine to pass-through rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub wm_class: String,
    pub wm_name: String,
    pub device_name: String,
    pub capslock_on: bool,
    pub numlock_on: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("not connected to the window system")]
    NotConnected,
    #[error("context query failed: {0}")]
    QueryFailed(String),
}

/// Capability to produce a `Context` on demand.
///
/// Implementations must be non-blocking or bounded; the engine calls
/// `snapshot` from its event loop. A failing provider is recovered locally
/// with an empty context.
pub trait ContextProvider: Send {
    fn snapshot(&self) -> Result<Context, ContextError>;
}

/// Window-context backend identifiers selectable at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    X11,
    Hyprland,
    Sway,
    Wlroots,
    Kde,
    Cosmic,
    Gnome,
    Cinnamon,
}

impl ProviderKind {
    /// Resolve the backend from `{session_type, wl_desktop_env}`.
    ///
    /// `x11` sessions ignore the desktop environment; Wayland sessions pick
    /// the compositor-specific client.
    pub fn select(session_type: &str, wl_desktop_env: &str) -> Option<ProviderKind> {
        match session_type {
            "x11" => Some(ProviderKind::X11),
            "wayland" => match wl_desktop_env {
                "hyprland" => Some(ProviderKind::Hyprland),
                "sway" => Some(ProviderKind::Sway),
                "wlroots" => Some(ProviderKind::Wlroots),
                "kde" | "plasma" => Some(ProviderKind::Kde),
                "cosmic" => Some(ProviderKind::Cosmic),
                "gnome" => Some(ProviderKind::Gnome),
                "cinnamon" => Some(ProviderKind::Cinnamon),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::X11 => "x11",
            ProviderKind::Hyprland => "hyprland",
            ProviderKind::Sway => "sway",
            ProviderKind::Wlroots => "wlroots",
            ProviderKind::Kde => "kde",
            ProviderKind::Cosmic => "cosmic",
            ProviderKind::Gnome => "gnome",
            ProviderKind::Cinnamon => "cinnamon",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider that always reports an empty context. Used when no window
/// system is reachable; rules with window predicates simply never match.
#[derive(Debug, Default)]
pub struct NullProvider;

impl ContextProvider for NullProvider {
    fn snapshot(&self) -> Result<Context, ContextError> {
        Ok(Context::default())
    }
}

/// Provider backed by a shared, settable context. The compositor clients
/// feed their focus-change events into one of these from a background
/// thread; tests drive it directly.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    current: Arc<Mutex<Context>>,
}

impl StaticProvider {
    pub fn new(context: Context) -> Self {
        Self {
            current: Arc::new(Mutex::new(context)),
        }
    }

    pub fn set(&self, context: Context) {
        *self.current.lock() = context;
    }

    pub fn set_window(&self, wm_class: &str, wm_name: &str) {
        let mut ctx = self.current.lock();
        ctx.wm_class = wm_class.to_string();
        ctx.wm_name = wm_name.to_string();
    }
}

impl ContextProvider for StaticProvider {
    fn snapshot(&self) -> Result<Context, ContextError> {
        Ok(self.current.lock().clone())
    }
}

/// Per-press cache over a provider.
///
/// The context is read lazily on the first lookup after a press and reused
/// for the rest of that press's combo resolution. Provider failure is
/// absorbed here: the cached snapshot falls back to `Context::default()`.
pub struct ContextCache {
    provider: Box<dyn ContextProvider>,
    cached: Option<Context>,
}

impl ContextCache {
    pub fn new(provider: Box<dyn ContextProvider>) -> Self {
        Self {
            provider,
            cached: None,
        }
    }

    /// Drop the cached snapshot; the next `get` queries the provider again.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Snapshot for the current press, querying the provider at most once.
    pub fn get(&mut self) -> &Context {
        if self.cached.is_none() {
            let snapshot = match self.provider.snapshot() {
                Ok(ctx) => ctx,
                Err(e) => {
                    tracing::warn!("context provider failed, using empty context: {e}");
                    Context::default()
                }
            };
            self.cached = Some(snapshot);
        }
        self.cached.as_ref().expect("cached snapshot just filled")
    }

    /// Patch fields the engine knows better than the provider: the source
    /// device of the event being processed and the tracked lock states.
    pub fn refresh(&mut self, device_name: &str, capslock_on: bool, numlock_on: bool) {
        self.invalidate();
        let ctx = self.get();
        let mut ctx = ctx.clone();
        ctx.device_name = device_name.to_string();
        ctx.capslock_on = capslock_on;
        ctx.numlock_on = numlock_on;
        self.cached = Some(ctx);
    }
}

impl fmt::Debug for ContextCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCache")
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}
