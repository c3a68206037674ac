// Output side: Sink abstraction and the output sequencer

pub mod bracket;
pub mod uinput;

use std::time::Duration;

use crate::mapping::ThrottleDelays;
use crate::{Combo, Key, KeyAction, Modifier};

pub use bracket::{plan_combo, ComboBracket};
pub use uinput::UinputSink;

/// Failure to emit a synthetic event. Fatal: the engine shuts down in an
/// orderly fashion, releasing every held output key on the way out.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("failed to create virtual device: {0}")]
    DeviceCreation(String),
    #[error("failed to write synthetic event: {0}")]
    WriteError(String),
}

/// Consumer of synthetic key events: one virtual keyboard.
///
/// `sync` terminates an atomic event group; the sequencer calls it after
/// every logical action boundary.
pub trait Sink {
    fn press(&mut self, key: Key) -> Result<(), OutputError>;
    fn release(&mut self, key: Key) -> Result<(), OutputError>;
    fn sync(&mut self) -> Result<(), OutputError>;
}

/// The output sequencer.
///
/// Renders combos and bare key actions into the Sink while mirroring what
/// is currently pressed on the synthetic device, so combo emission can
/// bracket modifiers (lift, press, tap, restore) against live state.
#[derive(Debug)]
pub struct Output<S: Sink> {
    sink: S,
    pressed_keys: Vec<Key>,
    pressed_mod_keys: Vec<Key>,
    /// Modifiers lifted inside a suspend-lift bracket, to re-exert when the
    /// outermost bracket closes.
    lifted: Vec<Key>,
    lift_depth: u32,
    delays: ThrottleDelays,
}

impl<S: Sink> Output<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            pressed_keys: Vec::new(),
            pressed_mod_keys: Vec::new(),
            lifted: Vec::new(),
            lift_depth: 0,
            delays: ThrottleDelays::default(),
        }
    }

    pub fn with_delays(sink: S, delays: ThrottleDelays) -> Self {
        let mut output = Self::new(sink);
        output.delays = delays;
        output
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn is_mod_pressed(&self, key: Key) -> bool {
        self.pressed_mod_keys.contains(&key)
    }

    pub fn is_pressed(&self, key: Key) -> bool {
        self.pressed_keys.contains(&key) || self.pressed_mod_keys.contains(&key)
    }

    pub fn pressed_mod_keys(&self) -> &[Key] {
        &self.pressed_mod_keys
    }

    /// Anything still exerted on the synthetic device?
    pub fn is_quiescent(&self) -> bool {
        self.pressed_keys.is_empty() && self.pressed_mod_keys.is_empty()
    }

    /// Emit one key action and a sync marker, updating the mirrors.
    pub fn send_key_action(&mut self, key: Key, action: KeyAction) -> Result<(), OutputError> {
        match action {
            KeyAction::Press => self.sink.press(key)?,
            KeyAction::Release => self.sink.release(key)?,
            KeyAction::Repeat => {
                // Auto-repeat is the kernel's job on the virtual device.
                return Ok(());
            }
        }
        self.sink.sync()?;

        let mirror = if Modifier::is_key_modifier(key) {
            &mut self.pressed_mod_keys
        } else {
            &mut self.pressed_keys
        };
        match action {
            KeyAction::Press => {
                if !mirror.contains(&key) {
                    mirror.push(key);
                }
            }
            KeyAction::Release => mirror.retain(|k| *k != key),
            KeyAction::Repeat => {}
        }
        Ok(())
    }

    /// Press+release pair.
    pub fn tap_key(&mut self, key: Key) -> Result<(), OutputError> {
        self.send_key_action(key, KeyAction::Press)?;
        self.send_key_action(key, KeyAction::Release)?;
        Ok(())
    }

    /// Tap the base key of a combo, throttled by the configured delays.
    fn tap_throttled(&mut self, key: Key) -> Result<(), OutputError> {
        sleep_ms(self.delays.key_pre_delay_ms);
        self.tap_key(key)?;
        sleep_ms(self.delays.key_post_delay_ms);
        Ok(())
    }

    /// Move the output's modifier state: lift `up`, then exert `down`.
    fn shift_modifiers(&mut self, up: &[Key], down: &[Key]) -> Result<(), OutputError> {
        for &key in up {
            self.send_key_action(key, KeyAction::Release)?;
        }
        for &key in down {
            self.send_key_action(key, KeyAction::Press)?;
        }
        Ok(())
    }

    /// Bring lifted modifiers back. Inside a suspend-lift bracket they are
    /// parked instead and return when the outermost bracket closes.
    fn return_lifted(&mut self, lifted: Vec<Key>) -> Result<(), OutputError> {
        if self.lift_depth > 0 {
            self.lifted.extend(lifted);
            Ok(())
        } else {
            self.shift_modifiers(&[], &lifted)
        }
    }

    /// Emit a combo with full modifier bracketing: shift the output into
    /// the combo's modifier state, tap the key, then shift back out.
    ///
    /// Modifiers lifted on the way in are restored on the way out, unless a
    /// suspend-lift bracket is open, in which case they stay up until the
    /// bracket closes (so the next command in a sequence sees clean state
    /// without flapping the user's physically held modifiers).
    pub fn send_combo(&mut self, combo: &Combo) -> Result<(), OutputError> {
        let plan = plan_combo(combo.modifiers(), &self.pressed_mod_keys);

        self.shift_modifiers(&plan.release, &plan.press)?;
        self.tap_throttled(combo.key())?;

        let synthetic: Vec<Key> = plan.press.into_iter().rev().collect();
        self.shift_modifiers(&synthetic, &[])?;
        self.return_lifted(plan.restore)
    }

    /// Emit a combo for `Bind`: nothing held is lifted, only the missing
    /// target modifiers are added, and they stay down afterwards. Returns
    /// those newly pressed keys; the caller retains them until the bind
    /// trigger is released.
    pub fn send_combo_bound(&mut self, combo: &Combo) -> Result<Vec<Key>, OutputError> {
        let missing: Vec<Key> = combo
            .modifiers()
            .iter()
            .filter(|m| !m.keys().iter().any(|k| self.is_mod_pressed(*k)))
            .map(|m| m.output_key())
            .collect();

        self.shift_modifiers(&[], &missing)?;
        self.tap_throttled(combo.key())?;
        Ok(missing)
    }

    /// Open a suspend-lift bracket. Re-entrant; see `end_lift`.
    pub fn begin_lift(&mut self) {
        self.lift_depth += 1;
    }

    /// Close a suspend-lift bracket; at depth zero, re-exert every modifier
    /// parked while it was open.
    pub fn end_lift(&mut self) -> Result<(), OutputError> {
        debug_assert!(self.lift_depth > 0, "unbalanced lift bracket");
        self.lift_depth = self.lift_depth.saturating_sub(1);
        if self.lift_depth > 0 {
            return Ok(());
        }
        let parked = std::mem::take(&mut self.lifted);
        self.shift_modifiers(&[], &parked)
    }

    /// Release every key held on the synthetic device: regular keys first,
    /// then modifiers, each group unwinding in reverse press order.
    /// Shutdown and emergency-eject both end here; afterwards "every press
    /// has a matching release".
    pub fn release_all(&mut self) -> Result<(), OutputError> {
        let unwind: Vec<Key> = self
            .pressed_keys
            .iter()
            .rev()
            .chain(self.pressed_mod_keys.iter().rev())
            .copied()
            .collect();
        for key in unwind {
            self.send_key_action(key, KeyAction::Release)?;
        }
        self.lifted.clear();
        Ok(())
    }
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Sink that records the emitted stream; the test double for the engine.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
}

/// One entry in a `RecordingSink` journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    Press(Key),
    Release(Key),
    Sync,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The journal without sync markers, for assertions about key order.
    pub fn key_events(&self) -> Vec<SinkEvent> {
        self.events
            .iter()
            .filter(|e| !matches!(e, SinkEvent::Sync))
            .copied()
            .collect()
    }
}

impl Sink for RecordingSink {
    fn press(&mut self, key: Key) -> Result<(), OutputError> {
        self.events.push(SinkEvent::Press(key));
        Ok(())
    }

    fn release(&mut self, key: Key) -> Result<(), OutputError> {
        self.events.push(SinkEvent::Release(key));
        Ok(())
    }

    fn sync(&mut self) -> Result<(), OutputError> {
        self.events.push(SinkEvent::Sync);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SinkEvent::{Press, Release};

    fn lctrl() -> Key {
        Key::from(29)
    }

    fn lalt() -> Key {
        Key::from(56)
    }

    fn a() -> Key {
        Key::from(30)
    }

    #[test]
    fn key_action_updates_mirrors_and_syncs() {
        let mut output = Output::new(RecordingSink::new());
        output.send_key_action(lctrl(), KeyAction::Press).unwrap();
        assert!(output.is_mod_pressed(lctrl()));
        assert!(!output.is_quiescent());

        output.send_key_action(lctrl(), KeyAction::Release).unwrap();
        assert!(output.is_quiescent());

        assert_eq!(
            output.sink().events,
            vec![
                Press(lctrl()),
                SinkEvent::Sync,
                Release(lctrl()),
                SinkEvent::Sync
            ]
        );
    }

    #[test]
    fn send_combo_presses_missing_modifiers() {
        let mut output = Output::new(RecordingSink::new());
        let combo = Combo::parse("Ctrl-a").unwrap();
        output.send_combo(&combo).unwrap();

        assert_eq!(
            output.sink().key_events(),
            vec![Press(lctrl()), Press(a()), Release(a()), Release(lctrl())]
        );
        assert!(output.is_quiescent());
    }

    #[test]
    fn send_combo_lifts_and_restores_foreign_modifiers() {
        let mut output = Output::new(RecordingSink::new());
        output.send_key_action(lalt(), KeyAction::Press).unwrap();
        output.sink_mut().events.clear();

        let combo = Combo::parse("Ctrl-a").unwrap();
        output.send_combo(&combo).unwrap();

        assert_eq!(
            output.sink().key_events(),
            vec![
                Release(lalt()),
                Press(lctrl()),
                Press(a()),
                Release(a()),
                Release(lctrl()),
                Press(lalt()),
            ]
        );
        assert!(output.is_mod_pressed(lalt()));
    }

    #[test]
    fn lift_bracket_defers_restores() {
        let mut output = Output::new(RecordingSink::new());
        output.send_key_action(lalt(), KeyAction::Press).unwrap();

        output.begin_lift();
        output.send_combo(&Combo::parse("Ctrl-a").unwrap()).unwrap();
        // Alt was lifted but is not yet restored.
        assert!(!output.is_mod_pressed(lalt()));
        output.end_lift().unwrap();
        assert!(output.is_mod_pressed(lalt()));
    }

    #[test]
    fn bound_combo_keeps_new_modifiers_held() {
        let mut output = Output::new(RecordingSink::new());
        let combo = Combo::parse("Alt-TAB").unwrap();
        let held = output.send_combo_bound(&combo).unwrap();

        assert_eq!(held, vec![lalt()]);
        assert!(output.is_mod_pressed(lalt()));
        assert_eq!(
            output.sink().key_events(),
            vec![Press(lalt()), Press(Key::from(15)), Release(Key::from(15))]
        );
    }

    #[test]
    fn release_all_reverses_press_order() {
        let mut output = Output::new(RecordingSink::new());
        output.send_key_action(lctrl(), KeyAction::Press).unwrap();
        output.send_key_action(lalt(), KeyAction::Press).unwrap();
        output.send_key_action(a(), KeyAction::Press).unwrap();
        output.sink_mut().events.clear();

        output.release_all().unwrap();
        assert_eq!(
            output.sink().key_events(),
            vec![Release(a()), Release(lalt()), Release(lctrl())]
        );
        assert!(output.is_quiescent());
    }

    #[test]
    fn repeat_actions_are_not_emitted() {
        let mut output = Output::new(RecordingSink::new());
        output.send_key_action(a(), KeyAction::Repeat).unwrap();
        assert!(output.sink().events.is_empty());
    }
}
