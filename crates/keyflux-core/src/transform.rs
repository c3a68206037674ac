// The event transformation engine
//
// Pipeline per input event:
//   modmap -> multipurpose resolution -> suspend buffer -> combo resolver
//   -> command execution -> output sequencer
//
// All state mutation happens on the caller's single-threaded loop; timers
// re-enter through `on_timer` with an explicit `now`, so behavior is a pure
// function of the event/timer timeline.

use std::collections::HashMap;
use std::time::Instant;

use crate::context::{ContextCache, ContextProvider};
use crate::mapping::{Command, Keymap, RuleSet};
use crate::multipurpose::{MpRelease, MultipurposeStates};
use crate::output::{Output, OutputError, Sink};
use crate::scheduler::{Scheduler, TimerKind};
use crate::state::{KeyStateStore, NextKeyMode};
use crate::{Key, KeyAction, KeyEvent, Modifier};

/// What the loop should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Emergency eject: all output released, timers disarmed; terminate.
    Eject,
}

const CAPSLOCK_CODE: u16 = 58;
const NUMLOCK_CODE: u16 = 69;

/// The engine. Owns all mutable state and drives the output sequencer.
pub struct Engine<S: Sink> {
    rules: RuleSet,
    output: Output<S>,
    states: KeyStateStore,
    mp: MultipurposeStates,
    scheduler: Scheduler,
    context: ContextCache,
    active_submap: Option<Keymap>,
    next_key_mode: NextKeyMode,
    /// Active Bind mappings: input trigger key -> output modifier keys held
    /// until the trigger is released.
    binds: HashMap<Key, Vec<Key>>,
    capslock_on: bool,
    numlock_on: bool,
}

impl<S: Sink> Engine<S> {
    pub fn new(rules: RuleSet, provider: Box<dyn ContextProvider>, sink: S) -> Self {
        let delays = rules.delays;
        Self {
            rules,
            output: Output::with_delays(sink, delays),
            states: KeyStateStore::new(),
            mp: MultipurposeStates::new(),
            scheduler: Scheduler::new(),
            context: ContextCache::new(provider),
            active_submap: None,
            next_key_mode: NextKeyMode::Normal,
            binds: HashMap::new(),
            capslock_on: false,
            numlock_on: false,
        }
    }

    pub fn output(&self) -> &Output<S> {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut Output<S> {
        &mut self.output
    }

    /// Earliest pending timer deadline; the loop sleeps until then.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Orderly shutdown: every output press gets its matching release.
    pub fn shutdown(&mut self) -> Result<(), OutputError> {
        self.scheduler.clear();
        self.output.release_all()
    }

    /// Process one input event. Repeats never arrive (the Source filters
    /// them); one slipping through is dropped here.
    pub fn on_event(&mut self, ev: &KeyEvent) -> Result<Flow, OutputError> {
        if ev.action.is_repeat() {
            return Ok(Flow::Continue);
        }

        if ev.action.just_pressed() {
            if ev.key == self.rules.emergency_eject_key {
                tracing::warn!("emergency eject pressed, releasing all output keys");
                self.scheduler.clear();
                self.output.release_all()?;
                return Ok(Flow::Eject);
            }
            if ev.key == self.rules.diagnostics_key {
                self.dump_diagnostics();
                return Ok(Flow::Continue);
            }

            match ev.key.code() {
                CAPSLOCK_CODE => self.capslock_on = !self.capslock_on,
                NUMLOCK_CODE => self.numlock_on = !self.numlock_on,
                _ => {}
            }
            self.context
                .refresh(&ev.device_name, self.capslock_on, self.numlock_on);
        }

        match ev.action {
            KeyAction::Press => self.on_press(ev),
            KeyAction::Release => self.on_release(ev),
            KeyAction::Repeat => Ok(Flow::Continue),
        }
    }

    /// A timer deadline elapsed; resolve everything due at `now`.
    pub fn on_timer(&mut self, now: Instant) -> Result<(), OutputError> {
        for kind in self.scheduler.pop_due(now) {
            match kind {
                TimerKind::Multipurpose(trigger) => {
                    if let Some(hold) = self.mp.on_timeout(trigger, now) {
                        if let Some(ks) = self.states.get_mut(trigger) {
                            ks.key = hold;
                            ks.exerted_on_output = true;
                        }
                        self.output.send_key_action(hold, KeyAction::Press)?;
                    }
                }
                TimerKind::SuspendExpiry => self.commit_due_suspends(now)?,
                TimerKind::SubmapExpiry => {
                    self.active_submap = None;
                }
            }
        }
        Ok(())
    }

    fn on_press(&mut self, ev: &KeyEvent) -> Result<Flow, OutputError> {
        // Any other physical key press flips undecided dual-role keys to
        // their modifier role, and the hold presses go out first.
        if self.mp.any_undecided() && !self.mp.is_active(ev.key) {
            self.flip_undecided_to_mod()?;
        }

        match self.next_key_mode {
            NextKeyMode::Escape => {
                self.next_key_mode = NextKeyMode::Normal;
                let ks = self.states.press(ev.key, ev.key, ev.time);
                ks.exerted_on_output = true;
                self.output.send_key_action(ev.key, KeyAction::Press)?;
                return Ok(Flow::Continue);
            }
            NextKeyMode::Ignore => {
                self.next_key_mode = NextKeyMode::Normal;
                // Track the press so the matching release is swallowed too.
                self.states.press(ev.key, ev.key, ev.time);
                return Ok(Flow::Continue);
            }
            NextKeyMode::Normal => {}
        }

        let ctx = self.context.get().clone();
        let key = self.rules.modmap_key(ev.key, &ctx);

        // Dual-role keys are withheld until tap vs. hold is known.
        if !self.mp.is_active(ev.key) {
            if let Some((tap, hold)) = self.rules.multipurpose_for(key, &ctx) {
                let timeout = self.rules.timeouts.multipurpose;
                self.mp.start(ev.key, tap, hold, ev.time, timeout);
                self.scheduler
                    .arm(TimerKind::Multipurpose(ev.key), ev.time + timeout);
                self.states.press(ev.key, key, ev.time);
                return Ok(Flow::Continue);
            }
        }

        if Modifier::is_key_modifier(key) {
            self.on_mod_press(ev.key, key, ev.time)?;
        } else {
            self.on_key_press(ev.key, key, ev.time)?;
        }
        Ok(Flow::Continue)
    }

    fn on_release(&mut self, ev: &KeyEvent) -> Result<Flow, OutputError> {
        if self.mp.is_active(ev.key) {
            match self.mp.on_release(ev.key, ev.time) {
                Some(MpRelease::Tap(tap)) => {
                    self.scheduler.cancel(TimerKind::Multipurpose(ev.key));
                    self.states.release(ev.key);
                    // Suspended modifiers commit before the tap pair so it
                    // lands under the right mask.
                    self.resume_keys()?;
                    self.output.tap_key(tap)?;
                    return Ok(Flow::Continue);
                }
                Some(MpRelease::ModRelease(hold)) => {
                    self.scheduler.cancel(TimerKind::Multipurpose(ev.key));
                    // Deadline passed without the timer firing through the
                    // loop: the hold press is still owed.
                    let exerted = self
                        .states
                        .get(ev.key)
                        .map(|ks| ks.exerted_on_output)
                        .unwrap_or(false);
                    if !exerted {
                        if let Some(ks) = self.states.get_mut(ev.key) {
                            ks.key = hold;
                            ks.exerted_on_output = true;
                        }
                        self.output.send_key_action(hold, KeyAction::Press)?;
                    }
                    self.on_mod_release(ev.key)?;
                    return Ok(Flow::Continue);
                }
                None => {}
            }
        }

        let is_modifier = self
            .states
            .get(ev.key)
            .map(|ks| ks.is_modifier())
            .unwrap_or(false);
        if is_modifier {
            self.on_mod_release(ev.key)?;
        } else {
            self.on_key_release(ev.key)?;
        }
        Ok(Flow::Continue)
    }

    // ─── modifier path ──────────────────────────────────────────────────

    /// A modifier key-down is never emitted directly: it enters the suspend
    /// buffer and commits later (timeout, bare release, or an unmapped
    /// combo), or is discarded when a remapped combo consumes it.
    fn on_mod_press(&mut self, inkey: Key, key: Key, time: Instant) -> Result<(), OutputError> {
        let deadline = time + self.rules.timeouts.suspend;
        let ks = self.states.press(inkey, key, time);
        ks.suspended = true;
        ks.suspend_deadline = Some(deadline);
        self.rearm_suspend_timer();
        Ok(())
    }

    fn on_mod_release(&mut self, inkey: Key) -> Result<(), OutputError> {
        let (key, spent, exerted) = match self.states.get(inkey) {
            Some(ks) => (ks.key, ks.spent, ks.exerted_on_output),
            None => (inkey, false, false),
        };

        if let Some(bound) = self.binds.remove(&inkey) {
            // Bound output modifiers are held until this trigger release.
            for k in bound.iter().rev() {
                self.output.send_key_action(*k, KeyAction::Release)?;
            }
            if exerted {
                self.output.send_key_action(key, KeyAction::Release)?;
            }
        } else if spent {
            // Consumed by a remapped combo; its press was never emitted, so
            // the release is silent (unless it was re-exerted since).
            if exerted {
                self.output.send_key_action(key, KeyAction::Release)?;
            }
        } else {
            // A bare modifier release resumes the buffer: the withheld
            // press commits now, immediately followed by this release.
            self.resume_keys()?;
            if self.output.is_mod_pressed(key) {
                self.output.send_key_action(key, KeyAction::Release)?;
            }
        }

        self.states.release(inkey);
        self.rearm_suspend_timer();
        Ok(())
    }

    /// Commit every suspended press, in input order. Spent flags clear:
    /// a key held long enough to resume no longer counts as consumed.
    fn resume_keys(&mut self) -> Result<(), OutputError> {
        for inkey in self.states.suspended_keys() {
            let to_press = {
                let ks = match self.states.get_mut(inkey) {
                    Some(ks) => ks,
                    None => continue,
                };
                ks.suspended = false;
                ks.suspend_deadline = None;
                ks.spent = false;
                if ks.exerted_on_output {
                    None
                } else {
                    ks.exerted_on_output = true;
                    Some(ks.key)
                }
            };
            if let Some(key) = to_press {
                self.output.send_key_action(key, KeyAction::Press)?;
            }
        }
        self.scheduler.cancel(TimerKind::SuspendExpiry);
        Ok(())
    }

    /// Suspend timeout: commit the presses whose deadline has elapsed, in
    /// input order, and keep the timer armed for the rest.
    fn commit_due_suspends(&mut self, now: Instant) -> Result<(), OutputError> {
        let due: Vec<Key> = self
            .states
            .pressed_in_order()
            .into_iter()
            .filter(|ks| {
                ks.suspended && ks.suspend_deadline.map(|d| d <= now).unwrap_or(false)
            })
            .map(|ks| ks.inkey)
            .collect();

        for inkey in due {
            let to_press = {
                let ks = match self.states.get_mut(inkey) {
                    Some(ks) => ks,
                    None => continue,
                };
                ks.suspended = false;
                ks.suspend_deadline = None;
                ks.spent = false;
                if ks.exerted_on_output {
                    None
                } else {
                    ks.exerted_on_output = true;
                    Some(ks.key)
                }
            };
            if let Some(key) = to_press {
                self.output.send_key_action(key, KeyAction::Press)?;
            }
        }
        self.rearm_suspend_timer();
        Ok(())
    }

    fn rearm_suspend_timer(&mut self) {
        match self.states.next_suspend_deadline() {
            Some(deadline) => self.scheduler.arm(TimerKind::SuspendExpiry, deadline),
            None => self.scheduler.cancel(TimerKind::SuspendExpiry),
        }
    }

    // ─── multipurpose path ──────────────────────────────────────────────

    fn flip_undecided_to_mod(&mut self) -> Result<(), OutputError> {
        for (trigger, hold) in self.mp.decide_all_as_mod() {
            self.scheduler.cancel(TimerKind::Multipurpose(trigger));
            if let Some(ks) = self.states.get_mut(trigger) {
                ks.key = hold;
                ks.exerted_on_output = true;
            }
            self.output.send_key_action(hold, KeyAction::Press)?;
        }
        Ok(())
    }

    // ─── combo resolution ───────────────────────────────────────────────

    fn on_key_press(&mut self, inkey: Key, key: Key, time: Instant) -> Result<(), OutputError> {
        self.states.press(inkey, key, time);
        let held_mods = self.states.pressed_modifiers();
        let ctx = self.context.get().clone();

        // The submap is consulted first and cleared by this lookup either
        // way; only a fresh Submap command re-enters one.
        let submap = self.active_submap.take();
        self.scheduler.cancel(TimerKind::SubmapExpiry);

        let command: Option<Command> = match &submap {
            Some(sm) => sm
                .lookup(&held_mods, key)
                .cloned()
                .or_else(|| self.rules.lookup_combo(&held_mods, key, &ctx).cloned()),
            None => self.rules.lookup_combo(&held_mods, key, &ctx).cloned(),
        };

        match command {
            Some(command) => {
                // The input modifiers this combo rode on are consumed by
                // the remap: withheld presses are discarded together.
                for ks in self.states.iter_mut() {
                    if ks.is_modifier() && !ks.exerted_on_output {
                        ks.spent = true;
                    }
                }

                let bind_trigger = self.bind_trigger_for(inkey);
                self.output.begin_lift();
                let result = self.execute_command(&command, bind_trigger, time);
                self.output.end_lift()?;
                result?;

                // Still-held suspended modifiers stay withheld for a fresh
                // window: they may ride the next combo or commit later.
                let deadline = time + self.rules.timeouts.suspend;
                for ks in self.states.iter_mut() {
                    if ks.suspended {
                        ks.suspend_deadline = Some(deadline);
                    }
                }
                self.rearm_suspend_timer();
            }
            None => {
                // Unmapped: commit everything withheld, then the key goes
                // out verbatim.
                self.resume_keys()?;
                self.output.send_key_action(key, KeyAction::Press)?;
                if let Some(ks) = self.states.get_mut(inkey) {
                    ks.exerted_on_output = true;
                }
            }
        }
        Ok(())
    }

    fn on_key_release(&mut self, inkey: Key) -> Result<(), OutputError> {
        if let Some(ks) = self.states.release(inkey) {
            if self.output.is_pressed(ks.key) {
                self.output.send_key_action(ks.key, KeyAction::Release)?;
            }
        }
        // A bare-key bind holds its modifiers until this release.
        if let Some(bound) = self.binds.remove(&inkey) {
            for k in bound.iter().rev() {
                self.output.send_key_action(*k, KeyAction::Release)?;
            }
        }
        Ok(())
    }

    /// The input key whose release ends a Bind engaged by this press: the
    /// earliest held modifier, or the pressed key itself for bare combos.
    fn bind_trigger_for(&self, pressed: Key) -> Key {
        self.states
            .pressed_in_order()
            .into_iter()
            .find(|ks| ks.is_modifier())
            .map(|ks| ks.inkey)
            .unwrap_or(pressed)
    }

    // ─── command execution ──────────────────────────────────────────────

    fn execute_command(
        &mut self,
        command: &Command,
        bind_trigger: Key,
        now: Instant,
    ) -> Result<(), OutputError> {
        match command {
            Command::Combo(combo) => self.output.send_combo(combo),
            Command::Key(key) => self.output.send_combo(&crate::Combo::bare(*key)),
            Command::Sequence(commands) => {
                for child in commands {
                    self.execute_command(child, bind_trigger, now)?;
                }
                Ok(())
            }
            Command::Submap { keymap, immediately } => {
                if let Some(first) = immediately {
                    self.execute_command(first, bind_trigger, now)?;
                }
                self.active_submap = Some(keymap.clone());
                if let Some(window) = self.rules.timeouts.submap {
                    self.scheduler.arm(TimerKind::SubmapExpiry, now + window);
                }
                Ok(())
            }
            Command::EscapeNext => {
                self.next_key_mode = NextKeyMode::Escape;
                Ok(())
            }
            Command::IgnoreNext => {
                self.next_key_mode = NextKeyMode::Ignore;
                Ok(())
            }
            Command::Bind(combo) => {
                if !self.binds.is_empty() {
                    tracing::debug!("refusing to engage a second bind over an active one");
                    return self.output.send_combo(combo);
                }
                // The trigger may already be exerted; if the bound output
                // replaces it, lift it so its later release stays silent.
                let lift = self.states.get_mut(bind_trigger).and_then(|ks| {
                    let replaced = !combo.modifiers().iter().any(|m| m.keys().contains(&ks.key));
                    if ks.exerted_on_output && replaced {
                        ks.exerted_on_output = false;
                        Some(ks.key)
                    } else {
                        None
                    }
                });
                if let Some(key) = lift {
                    self.output.send_key_action(key, KeyAction::Release)?;
                }

                let held = self.output.send_combo_bound(combo)?;
                self.binds.insert(bind_trigger, held);
                Ok(())
            }
            Command::Custom(hook) => {
                let ctx = self.context.get().clone();
                match hook(&ctx) {
                    Ok(Some(next)) => self.execute_command(&next, bind_trigger, now),
                    Ok(None) => Ok(()),
                    Err(e) => {
                        // Isolated: a failing hook is a logged no-op.
                        tracing::warn!("custom hook error: {e}");
                        Ok(())
                    }
                }
            }
        }
    }

    fn dump_diagnostics(&mut self) {
        let held_input: Vec<String> = self
            .states
            .pressed_in_order()
            .iter()
            .map(|ks| {
                format!(
                    "{}{}{}{}",
                    ks.key,
                    if ks.suspended { " suspended" } else { "" },
                    if ks.spent { " spent" } else { "" },
                    if ks.exerted_on_output { " exerted" } else { "" },
                )
            })
            .collect();
        tracing::info!(
            held_input = ?held_input,
            held_output_mods = ?self.output.pressed_mod_keys(),
            submap = self.active_submap.as_ref().map(|k| k.name()),
            binds = self.binds.len(),
            next_key_mode = ?self.next_key_mode,
            capslock = self.capslock_on,
            numlock = self.numlock_on,
            "diagnostics dump"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticProvider;
    use crate::mapping::{Keymap, Modmap, MultiModmap, Timeouts};
    use crate::output::{RecordingSink, SinkEvent};
    use crate::Combo;
    use std::collections::HashMap as Map;
    use std::time::Duration;
    use SinkEvent::{Press, Release};

    fn engine(rules: RuleSet) -> Engine<RecordingSink> {
        Engine::new(rules, Box::new(StaticProvider::default()), RecordingSink::new())
    }

    fn press(engine: &mut Engine<RecordingSink>, key: Key, t: Instant) {
        let ev = KeyEvent::new(key, KeyAction::Press, t, "test kbd");
        engine.on_event(&ev).unwrap();
    }

    fn release(engine: &mut Engine<RecordingSink>, key: Key, t: Instant) {
        let ev = KeyEvent::new(key, KeyAction::Release, t, "test kbd");
        engine.on_event(&ev).unwrap();
    }

    fn journal(engine: &Engine<RecordingSink>) -> Vec<SinkEvent> {
        engine.output().sink().key_events()
    }

    const A: Key = Key(30);
    const S: Key = Key(31);
    const J: Key = Key(36);
    const LCTRL: Key = Key(29);
    const LALT: Key = Key(56);
    const LMETA: Key = Key(125);
    const ENTER: Key = Key(28);
    const RCTRL: Key = Key(97);

    #[test]
    fn repeat_events_are_dropped() {
        let mut e = engine(RuleSet::default());
        let t = Instant::now();
        let ev = KeyEvent::new(A, KeyAction::Repeat, t, "test kbd");
        e.on_event(&ev).unwrap();
        assert!(journal(&e).is_empty());
    }

    #[test]
    fn suspended_modifier_commits_on_timeout() {
        let mut e = engine(RuleSet::default());
        let t0 = Instant::now();
        press(&mut e, LALT, t0);
        assert!(journal(&e).is_empty());

        let deadline = e.next_deadline().unwrap();
        assert_eq!(deadline, t0 + Duration::from_secs(1));
        e.on_timer(deadline).unwrap();
        assert_eq!(journal(&e), vec![Press(LALT)]);

        // A subsequent unmapped key uses it normally.
        press(&mut e, A, deadline + Duration::from_millis(10));
        assert_eq!(journal(&e), vec![Press(LALT), Press(A)]);

        release(&mut e, A, deadline + Duration::from_millis(20));
        release(&mut e, LALT, deadline + Duration::from_millis(30));
        assert_eq!(
            journal(&e),
            vec![Press(LALT), Press(A), Release(A), Release(LALT)]
        );
        assert!(e.output().is_quiescent());
    }

    #[test]
    fn remapped_combo_discards_suspended_modifiers_together() {
        let mut keymap = Keymap::new("test");
        keymap.insert(
            Combo::parse("Ctrl-Alt-a").unwrap(),
            Command::Combo(Combo::parse("F5").unwrap()),
        );
        let rules = RuleSet {
            keymaps: vec![keymap],
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        press(&mut e, LCTRL, t0);
        press(&mut e, LALT, t0 + Duration::from_millis(10));
        press(&mut e, A, t0 + Duration::from_millis(20));

        // Neither modifier was ever emitted; only the remap output appears.
        assert_eq!(journal(&e), vec![Press(Key(63)), Release(Key(63))]);

        release(&mut e, A, t0 + Duration::from_millis(30));
        release(&mut e, LALT, t0 + Duration::from_millis(40));
        release(&mut e, LCTRL, t0 + Duration::from_millis(50));
        assert_eq!(journal(&e), vec![Press(Key(63)), Release(Key(63))]);
        assert!(e.output().is_quiescent());
    }

    #[test]
    fn spent_modifier_resumes_for_second_combo() {
        let mut keymap = Keymap::new("test");
        keymap.insert(
            Combo::parse("Ctrl-a").unwrap(),
            Command::Combo(Combo::parse("F5").unwrap()),
        );
        let rules = RuleSet {
            keymaps: vec![keymap],
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        press(&mut e, LCTRL, t0);
        press(&mut e, A, t0 + Duration::from_millis(10));
        release(&mut e, A, t0 + Duration::from_millis(20));
        // Ctrl is still held and still withheld; a second mapped combo
        // rides it again.
        press(&mut e, A, t0 + Duration::from_millis(30));
        release(&mut e, A, t0 + Duration::from_millis(40));
        release(&mut e, LCTRL, t0 + Duration::from_millis(50));

        assert_eq!(
            journal(&e),
            vec![Press(Key(63)), Release(Key(63)), Press(Key(63)), Release(Key(63))]
        );
        assert!(e.output().is_quiescent());
    }

    #[test]
    fn escape_next_bypasses_rules_for_one_key() {
        let mut keymap = Keymap::new("test");
        keymap.insert(Combo::parse("F9").unwrap(), Command::EscapeNext);
        keymap.insert(
            Combo::parse("a").unwrap(),
            Command::Combo(Combo::parse("s").unwrap()),
        );
        let rules = RuleSet {
            keymaps: vec![keymap],
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        // Without escape, A is remapped to S.
        press(&mut e, A, t0);
        release(&mut e, A, t0 + Duration::from_millis(5));
        assert_eq!(journal(&e), vec![Press(S), Release(S)]);

        // F9 arms escape; the next A goes out verbatim.
        press(&mut e, Key(67), t0 + Duration::from_millis(10));
        release(&mut e, Key(67), t0 + Duration::from_millis(15));
        press(&mut e, A, t0 + Duration::from_millis(20));
        release(&mut e, A, t0 + Duration::from_millis(25));
        assert_eq!(
            journal(&e),
            vec![Press(S), Release(S), Press(A), Release(A)]
        );
    }

    #[test]
    fn ignore_next_drops_press_and_release() {
        let mut keymap = Keymap::new("test");
        keymap.insert(Combo::parse("F9").unwrap(), Command::IgnoreNext);
        let rules = RuleSet {
            keymaps: vec![keymap],
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        press(&mut e, Key(67), t0);
        release(&mut e, Key(67), t0 + Duration::from_millis(5));
        press(&mut e, A, t0 + Duration::from_millis(10));
        release(&mut e, A, t0 + Duration::from_millis(15));
        assert!(journal(&e).is_empty());

        // Only one key is swallowed.
        press(&mut e, A, t0 + Duration::from_millis(20));
        release(&mut e, A, t0 + Duration::from_millis(25));
        assert_eq!(journal(&e), vec![Press(A), Release(A)]);
    }

    #[test]
    fn bind_holds_output_modifiers_until_trigger_release() {
        let mut keymap = Keymap::new("test");
        keymap.insert(
            Combo::parse("Cmd-TAB").unwrap(),
            Command::Bind(Combo::parse("Alt-TAB").unwrap()),
        );
        let rules = RuleSet {
            keymaps: vec![keymap],
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        const TAB: Key = Key(15);
        press(&mut e, LMETA, t0);
        press(&mut e, TAB, t0 + Duration::from_millis(10));
        release(&mut e, TAB, t0 + Duration::from_millis(20));
        // Alt is still held: the app switcher stays open.
        assert_eq!(
            journal(&e),
            vec![Press(LALT), Press(TAB), Release(TAB)]
        );
        assert!(e.output().is_mod_pressed(LALT));

        // Tab again while Meta is held cycles, reusing the held Alt.
        press(&mut e, TAB, t0 + Duration::from_millis(30));
        release(&mut e, TAB, t0 + Duration::from_millis(40));
        assert_eq!(
            journal(&e),
            vec![
                Press(LALT),
                Press(TAB),
                Release(TAB),
                Press(TAB),
                Release(TAB)
            ]
        );

        // Releasing the Meta trigger releases the bound Alt.
        release(&mut e, LMETA, t0 + Duration::from_millis(50));
        assert!(e.output().is_quiescent());
        assert_eq!(journal(&e).last(), Some(&Release(LALT)));
    }

    #[test]
    fn multipurpose_hold_participates_in_combo_matching() {
        let mut mp_map = Map::new();
        mp_map.insert(ENTER, (ENTER, RCTRL));
        let mut keymap = Keymap::new("test");
        keymap.insert(
            Combo::parse("RCtrl-j").unwrap(),
            Command::Combo(Combo::parse("F5").unwrap()),
        );
        let rules = RuleSet {
            multi_modmaps: vec![MultiModmap::new("mp", mp_map)],
            keymaps: vec![keymap],
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        press(&mut e, ENTER, t0);
        press(&mut e, J, t0 + Duration::from_millis(50));
        // The hold modifier decided and was emitted, then the combo
        // bracketed around it.
        assert_eq!(
            journal(&e),
            vec![
                Press(RCTRL),
                Release(RCTRL),
                Press(Key(63)),
                Release(Key(63)),
                Press(RCTRL),
            ]
        );
        release(&mut e, J, t0 + Duration::from_millis(60));
        release(&mut e, ENTER, t0 + Duration::from_millis(70));
        assert!(e.output().is_quiescent());
    }

    #[test]
    fn sibling_mod_decision_does_not_decide_other_multipurpose_key() {
        // Two dual-role keys held concurrently: the first deciding for its
        // modifier role (by timeout) must not flip the second.
        let mut mp_map = Map::new();
        mp_map.insert(Key(58), (Key(1), LCTRL)); // CAPSLOCK: tap ESC, hold LCtrl
        mp_map.insert(ENTER, (ENTER, RCTRL));
        let rules = RuleSet {
            multi_modmaps: vec![MultiModmap::new("mp", mp_map)],
            timeouts: Timeouts {
                multipurpose: Duration::from_millis(200),
                ..Timeouts::default()
            },
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        press(&mut e, Key(58), t0);
        press(&mut e, ENTER, t0 + Duration::from_millis(50));
        // CAPSLOCK flipped to LCtrl by the Enter press; Enter itself is
        // still undecided.
        assert_eq!(journal(&e), vec![Press(LCTRL)]);

        // CAPSLOCK's timer firing changes nothing for Enter.
        e.on_timer(t0 + Duration::from_millis(200)).unwrap();
        assert_eq!(journal(&e), vec![Press(LCTRL)]);

        // Enter released before its own deadline: tap pair.
        release(&mut e, ENTER, t0 + Duration::from_millis(220));
        assert_eq!(
            journal(&e),
            vec![Press(LCTRL), Press(ENTER), Release(ENTER)]
        );

        release(&mut e, Key(58), t0 + Duration::from_millis(240));
        assert!(e.output().is_quiescent());
    }

    #[test]
    fn modmapped_modifier_reaches_quiescence() {
        let mut modmap = Map::new();
        modmap.insert(Key(58), LCTRL); // CAPSLOCK -> LEFT_CTRL
        let rules = RuleSet {
            modmaps: vec![Modmap::new("default", modmap)],
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        press(&mut e, Key(58), t0);
        press(&mut e, Key(46), t0 + Duration::from_millis(10)); // C
        release(&mut e, Key(46), t0 + Duration::from_millis(20));
        release(&mut e, Key(58), t0 + Duration::from_millis(30));

        assert_eq!(
            journal(&e),
            vec![Press(LCTRL), Press(Key(46)), Release(Key(46)), Release(LCTRL)]
        );
        assert!(e.output().is_quiescent());
    }

    #[test]
    fn custom_hook_result_is_executed_and_errors_are_isolated() {
        use crate::mapping::CustomHookError;
        use std::sync::Arc;

        let mut keymap = Keymap::new("test");
        keymap.insert(
            Combo::parse("F5").unwrap(),
            Command::Custom(Arc::new(|ctx| {
                if ctx.wm_class == "boom" {
                    Err(CustomHookError("deliberate".into()))
                } else {
                    Ok(Some(Command::Combo(Combo::parse("a").unwrap())))
                }
            })),
        );
        let rules = RuleSet {
            keymaps: vec![keymap],
            ..RuleSet::default()
        };

        let provider = StaticProvider::default();
        let handle = provider.clone();
        let mut e = Engine::new(rules, Box::new(provider), RecordingSink::new());

        let t0 = Instant::now();
        press(&mut e, Key(63), t0);
        release(&mut e, Key(63), t0 + Duration::from_millis(5));
        assert_eq!(journal(&e), vec![Press(A), Release(A)]);

        // A failing hook leaves state untouched and emits nothing.
        handle.set_window("boom", "");
        press(&mut e, Key(63), t0 + Duration::from_millis(10));
        release(&mut e, Key(63), t0 + Duration::from_millis(15));
        assert_eq!(journal(&e), vec![Press(A), Release(A)]);
        assert!(e.output().is_quiescent());
    }

    #[test]
    fn submap_expires_after_inactivity_window() {
        let mut inner = Keymap::new("inner");
        inner.insert(
            Combo::parse("a").unwrap(),
            Command::Combo(Combo::parse("F5").unwrap()),
        );
        let mut outer = Keymap::new("outer");
        outer.insert(
            Combo::parse("Ctrl-x").unwrap(),
            Command::Submap {
                keymap: inner,
                immediately: None,
            },
        );
        let rules = RuleSet {
            keymaps: vec![outer],
            timeouts: Timeouts {
                submap: Some(Duration::from_millis(500)),
                ..Timeouts::default()
            },
            ..RuleSet::default()
        };

        let mut e = engine(rules);
        let t0 = Instant::now();
        press(&mut e, LCTRL, t0);
        press(&mut e, Key(45), t0 + Duration::from_millis(10)); // X
        release(&mut e, Key(45), t0 + Duration::from_millis(20));
        release(&mut e, LCTRL, t0 + Duration::from_millis(30));

        // Window elapses; the submap is gone and A passes through.
        e.on_timer(t0 + Duration::from_millis(600)).unwrap();
        press(&mut e, A, t0 + Duration::from_millis(700));
        release(&mut e, A, t0 + Duration::from_millis(710));
        assert_eq!(journal(&e), vec![Press(A), Release(A)]);
    }
}
