// Engine invariants over scripted input sequences

use std::collections::HashMap;
use std::time::{Duration, Instant};

use keyflux_core::{
    Combo, Command, Engine, Key, KeyAction, KeyEvent, Keymap, MultiModmap, RecordingSink, RuleSet,
    SinkEvent, StaticProvider, Timeouts,
};

const A: Key = Key(30);
const S: Key = Key(31);
const ENTER: Key = Key(28);
const LCTRL: Key = Key(29);
const RCTRL: Key = Key(97);
const LALT: Key = Key(56);
const LMETA: Key = Key(125);

fn engine(rules: RuleSet) -> Engine<RecordingSink> {
    Engine::new(
        rules,
        Box::new(StaticProvider::default()),
        RecordingSink::new(),
    )
}

fn feed(engine: &mut Engine<RecordingSink>, base: Instant, script: &[(Key, KeyAction, u64)]) {
    for (key, action, ms) in script {
        let ev = KeyEvent::new(*key, *action, base + Duration::from_millis(*ms), "prop kbd");
        engine.on_event(&ev).unwrap();
        // Run any timer that became due alongside the event, as the real
        // loop would.
        engine
            .on_timer(base + Duration::from_millis(*ms))
            .unwrap();
    }
}

/// For every output key, releases never outrun presses at any prefix of
/// the journal, and they balance exactly at quiescence.
fn assert_balanced(journal: &[SinkEvent]) {
    let mut depth: HashMap<Key, i64> = HashMap::new();
    for event in journal {
        match event {
            SinkEvent::Press(k) => *depth.entry(*k).or_default() += 1,
            SinkEvent::Release(k) => {
                let d = depth.entry(*k).or_default();
                *d -= 1;
                assert!(*d >= 0, "release of {k:?} without a matching press");
            }
            SinkEvent::Sync => {}
        }
    }
    for (key, d) in depth {
        assert_eq!(d, 0, "key {key:?} left pressed at quiescence");
    }
}

#[test]
fn press_release_balance_across_mixed_rules() {
    let mut modmap = HashMap::new();
    modmap.insert(Key(58), LCTRL); // CAPSLOCK -> LEFT_CTRL
    let mut mp = HashMap::new();
    mp.insert(ENTER, (ENTER, RCTRL));
    let mut keymap = Keymap::new("mixed");
    keymap.insert(
        Combo::parse("Cmd-s").unwrap(),
        Command::Combo(Combo::parse("Ctrl-s").unwrap()),
    );
    keymap.insert(
        Combo::parse("RCtrl-a").unwrap(),
        Command::Combo(Combo::parse("Alt-F4").unwrap()),
    );

    let rules = RuleSet {
        modmaps: vec![keyflux_core::Modmap::new("default", modmap)],
        multi_modmaps: vec![MultiModmap::new("mp", mp)],
        keymaps: vec![keymap],
        ..RuleSet::default()
    };

    use KeyAction::{Press, Release};
    let mut e = engine(rules);
    let base = Instant::now();
    feed(
        &mut e,
        base,
        &[
            // modmapped ctrl combo, unmapped
            (Key(58), Press, 0),
            (A, Press, 20),
            (A, Release, 40),
            (Key(58), Release, 60),
            // remapped Cmd-s
            (LMETA, Press, 100),
            (S, Press, 120),
            (S, Release, 140),
            (LMETA, Release, 160),
            // multipurpose hold riding a keymap entry
            (ENTER, Press, 200),
            (A, Press, 230),
            (A, Release, 250),
            (ENTER, Release, 270),
            // bare mod tap
            (LALT, Press, 300),
            (LALT, Release, 350),
            // suspended mod committed by timeout, then unmapped key
            (LALT, Press, 400),
            (A, Press, 1500),
            (A, Release, 1520),
            (LALT, Release, 1540),
        ],
    );

    assert!(e.output().is_quiescent());
    assert_balanced(&e.output().sink().events);
}

#[test]
fn suspended_modifier_sees_exactly_one_commit_or_discard() {
    // Commit path: timeout then an unmapped key.
    let mut e = engine(RuleSet::default());
    let base = Instant::now();
    let ev = KeyEvent::new(LALT, KeyAction::Press, base, "kbd");
    e.on_event(&ev).unwrap();

    let deadline = e.next_deadline().expect("suspend timer armed");
    e.on_timer(deadline).unwrap();
    let presses = e
        .output()
        .sink()
        .key_events()
        .iter()
        .filter(|ev| **ev == SinkEvent::Press(LALT))
        .count();
    assert_eq!(presses, 1, "committed exactly once");

    // Firing the timer again must not double-commit.
    e.on_timer(deadline + Duration::from_secs(1)).unwrap();
    let presses = e
        .output()
        .sink()
        .key_events()
        .iter()
        .filter(|ev| **ev == SinkEvent::Press(LALT))
        .count();
    assert_eq!(presses, 1);
}

#[test]
fn discard_path_never_emits_the_modifier() {
    let mut keymap = Keymap::new("remap");
    keymap.insert(
        Combo::parse("Alt-a").unwrap(),
        Command::Combo(Combo::parse("F5").unwrap()),
    );
    let rules = RuleSet {
        keymaps: vec![keymap],
        ..RuleSet::default()
    };

    use KeyAction::{Press, Release};
    let mut e = engine(rules);
    let base = Instant::now();
    feed(
        &mut e,
        base,
        &[
            (LALT, Press, 0),
            (A, Press, 20),
            (A, Release, 40),
            (LALT, Release, 60),
        ],
    );

    let journal = e.output().sink().key_events();
    assert!(
        !journal.contains(&SinkEvent::Press(LALT)),
        "discarded modifier must never reach the output: {journal:?}"
    );
    assert_balanced(&e.output().sink().events);
}

#[test]
fn multipurpose_boundary_at_exact_timeout() {
    let mut mp = HashMap::new();
    mp.insert(ENTER, (ENTER, RCTRL));
    let rules = RuleSet {
        multi_modmaps: vec![MultiModmap::new("mp", mp)],
        timeouts: Timeouts {
            multipurpose: Duration::from_millis(200),
            ..Timeouts::default()
        },
        ..RuleSet::default()
    };

    // Held to exactly the timeout: modifier role.
    let mut e = engine(rules.clone());
    let base = Instant::now();
    let ev = KeyEvent::new(ENTER, KeyAction::Press, base, "kbd");
    e.on_event(&ev).unwrap();
    e.on_timer(base + Duration::from_millis(200)).unwrap();
    assert_eq!(e.output().sink().key_events(), vec![SinkEvent::Press(RCTRL)]);

    // Released a hair earlier with no intervening key: tap.
    let mut e = engine(rules);
    let ev = KeyEvent::new(ENTER, KeyAction::Press, base, "kbd");
    e.on_event(&ev).unwrap();
    let ev = KeyEvent::new(
        ENTER,
        KeyAction::Release,
        base + Duration::from_millis(199),
        "kbd",
    );
    e.on_event(&ev).unwrap();
    assert_eq!(
        e.output().sink().key_events(),
        vec![SinkEvent::Press(ENTER), SinkEvent::Release(ENTER)]
    );
}

#[test]
fn release_after_missed_timer_still_acts_as_hold() {
    // The loop lagged: the release arrives after the deadline although the
    // timer never fired. The key still behaves as its modifier role, and
    // the output stays balanced.
    let mut mp = HashMap::new();
    mp.insert(ENTER, (ENTER, RCTRL));
    let rules = RuleSet {
        multi_modmaps: vec![MultiModmap::new("mp", mp)],
        timeouts: Timeouts {
            multipurpose: Duration::from_millis(200),
            ..Timeouts::default()
        },
        ..RuleSet::default()
    };

    let mut e = engine(rules);
    let base = Instant::now();
    let ev = KeyEvent::new(ENTER, KeyAction::Press, base, "kbd");
    e.on_event(&ev).unwrap();
    let ev = KeyEvent::new(
        ENTER,
        KeyAction::Release,
        base + Duration::from_millis(500),
        "kbd",
    );
    e.on_event(&ev).unwrap();

    assert_eq!(
        e.output().sink().key_events(),
        vec![SinkEvent::Press(RCTRL), SinkEvent::Release(RCTRL)]
    );
    assert!(e.output().is_quiescent());
}

#[test]
fn shutdown_releases_held_output() {
    let mut e = engine(RuleSet::default());
    let base = Instant::now();
    use KeyAction::Press;
    feed(&mut e, base, &[(LCTRL, Press, 0), (A, Press, 1500)]);
    assert!(!e.output().is_quiescent());

    e.shutdown().unwrap();
    assert!(e.output().is_quiescent());
    assert_balanced(&e.output().sink().events);
    assert_eq!(e.next_deadline(), None, "timers disarmed on shutdown");
}

#[test]
fn combo_display_round_trips_through_parser() {
    for s in [
        "Ctrl-Shift-a",
        "LCtrl-TAB",
        "Cmd-Alt-SPACE",
        "RShift-F12",
        "ENTER",
    ] {
        let combo = Combo::parse(s).unwrap();
        assert_eq!(combo, Combo::parse(&combo.to_string()).unwrap());
    }
}
