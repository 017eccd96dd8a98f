use std::{collections::HashMap, error::Error};

use crate::{
    config::{
        layout::{KeyBinding, KeyLayout, KeyRect, Keymap, KeymapLayer},
        Action, ConfigError, EngineConfig, MouseButton,
    },
    drivers::trackpad::{Contact, ContactFlags, Frame},
    input::{
        dispatch::event::{ControlChange, DispatchAction, DropReason},
        engine::{Engine, EngineOutput, IntentMode},
        Side,
    },
};

// Target space matches the surface size in tenths of a millimetre
fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.decoder.target_max_x = 1600;
    config.decoder.target_max_y = 1149;
    config
}

fn layout() -> KeyLayout {
    KeyLayout {
        left: vec![
            KeyRect::new("a", 20.0, 20.0, 20.0, 20.0),
            KeyRect::new("b", 40.0, 20.0, 20.0, 20.0),
        ],
        right: vec![KeyRect::new("j", 20.0, 20.0, 20.0, 20.0)],
    }
}

fn engine(config: EngineConfig) -> Result<Engine, ConfigError> {
    Engine::new(config, layout(), Keymap::default())
}

fn touch(id: u8, x_mm: f64, y_mm: f64) -> Contact {
    Contact {
        id,
        x: (x_mm * 10.0).round() as u16,
        y: (y_mm * 10.0).round() as u16,
        flags: ContactFlags::default().with_touching(),
        pressure: Some(50),
        phase: None,
    }
}

fn frame(at_us: u64, contacts: &[Contact]) -> Frame {
    let mut frame = Frame::new(5, at_us);
    for contact in contacts {
        frame.push(*contact);
    }
    frame.set_contact_count(contacts.len() as u8);
    frame
}

/// Hold the given contacts still, one frame every 10ms, then lift them all
fn hold(engine: &mut Engine, side: Side, from_us: u64, until_us: u64, contacts: &[Contact]) -> EngineOutput {
    let mut out = EngineOutput::default();
    let mut at = from_us;
    while at <= until_us {
        out.extend(engine.apply(side, &frame(at, contacts)));
        at += 10_000;
    }
    out.extend(engine.apply(side, &frame(at, &[])));
    out
}

fn modes(out: &EngineOutput) -> Vec<(IntentMode, IntentMode)> {
    out.transitions.iter().map(|t| (t.from, t.to)).collect()
}

fn keys(out: &EngineOutput) -> Vec<(String, Vec<String>)> {
    out.dispatches
        .iter()
        .filter_map(|event| match &event.action {
            DispatchAction::Key { key, modifiers } => Some((key.clone(), modifiers.clone())),
            _ => None,
        })
        .collect()
}

fn drops(out: &EngineOutput) -> Vec<DropReason> {
    out.drops.iter().map(|drop| drop.reason).collect()
}

#[test]
fn test_stationary_contact_commits_typing() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let a = touch(1, 30.0, 30.0);

    let out = hold(&mut engine, Side::Left, 0, 20_000, &[a]);
    assert_eq!(
        modes(&out),
        vec![
            (IntentMode::Idle, IntentMode::KeyCandidate),
            (IntentMode::KeyCandidate, IntentMode::TypingCommitted),
        ]
    );
    assert_eq!(out.transitions[1].at_us, 20_000);
    assert_eq!(keys(&out), vec![("a".to_string(), vec![])]);
    assert_eq!(out.dispatches[0].label, "key:a");

    // Typing stays committed through the grace period
    assert_eq!(engine.mode(Side::Left), IntentMode::TypingCommitted);
    assert!(engine.tick(200_000).is_empty());
    let out = engine.tick(331_000);
    assert_eq!(
        modes(&out),
        vec![(IntentMode::TypingCommitted, IntentMode::Idle)]
    );
    Ok(())
}

#[test]
fn test_quick_tap_types_key() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let out = hold(&mut engine, Side::Left, 0, 0, &[touch(1, 50.0, 30.0)]);
    assert_eq!(keys(&out), vec![("b".to_string(), vec![])]);
    assert_eq!(engine.mode(Side::Left), IntentMode::TypingCommitted);
    Ok(())
}

#[test]
fn test_pressure_below_force_min_is_dropped() -> Result<(), Box<dyn Error>> {
    let mut config = config();
    config.force_min = 80;
    let mut engine = engine(config)?;

    let out = hold(&mut engine, Side::Left, 0, 20_000, &[touch(1, 30.0, 30.0)]);
    assert!(out.dispatches.is_empty());
    assert_eq!(drops(&out), vec![DropReason::ForceGated]);
    Ok(())
}

#[test]
fn test_zero_force_max_blocks_every_key() -> Result<(), Box<dyn Error>> {
    let mut config = config();
    config.force_max = 0;
    let mut engine = engine(config)?;

    let mut out = hold(&mut engine, Side::Left, 0, 0, &[touch(1, 30.0, 30.0)]);
    out.extend(hold(&mut engine, Side::Left, 50_000, 100_000, &[touch(2, 50.0, 30.0)]));
    assert!(keys(&out).is_empty());
    assert_eq!(drops(&out), vec![DropReason::ForceGated, DropReason::ForceGated]);
    Ok(())
}

#[test]
fn test_two_finger_tap_clicks_once() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let contacts = [touch(1, 30.0, 30.0), touch(2, 50.0, 30.0)];

    let mut out = engine.apply(Side::Left, &frame(0, &contacts));
    out.extend(engine.apply(Side::Left, &frame(10_000, &contacts)));
    out.extend(engine.apply(Side::Left, &frame(60_000, &[])));

    assert_eq!(
        modes(&out),
        vec![
            (IntentMode::Idle, IntentMode::GestureCandidate),
            (IntentMode::GestureCandidate, IntentMode::Idle),
        ]
    );
    assert_eq!(out.dispatches.len(), 1);
    assert_eq!(
        out.dispatches[0].action,
        DispatchAction::MouseButton(MouseButton::Left)
    );
    assert_eq!(out.dispatches[0].label, "two_finger_tap");
    Ok(())
}

#[test]
fn test_three_finger_tap_right_clicks() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let fingers = [touch(1, 30.0, 70.0), touch(2, 50.0, 70.0), touch(3, 70.0, 70.0)];

    let out = hold(&mut engine, Side::Left, 0, 10_000, &fingers);
    assert_eq!(
        modes(&out),
        vec![
            (IntentMode::Idle, IntentMode::GestureCandidate),
            (IntentMode::GestureCandidate, IntentMode::Idle),
        ]
    );
    assert_eq!(out.dispatches.len(), 1);
    assert_eq!(
        out.dispatches[0].action,
        DispatchAction::MouseButton(MouseButton::Right)
    );
    assert_eq!(out.dispatches[0].label, "three_finger_tap");
    Ok(())
}

/// Two fingers land at 0ms, the third at `third_us`, all lift 20ms later
fn staggered_three_finger_tap(third_us: u64) -> Result<EngineOutput, Box<dyn Error>> {
    let mut engine = engine(config())?;
    let [a, b, c] = [touch(1, 30.0, 70.0), touch(2, 50.0, 70.0), touch(3, 70.0, 70.0)];

    let mut out = EngineOutput::default();
    let mut at = 0;
    while at < third_us {
        out.extend(engine.apply(Side::Left, &frame(at, &[a, b])));
        at += 10_000;
    }
    out.extend(hold(&mut engine, Side::Left, third_us, third_us + 10_000, &[a, b, c]));
    Ok(out)
}

#[test]
fn test_three_finger_tap_stagger_tolerance() -> Result<(), Box<dyn Error>> {
    // 45ms is inside the 50ms stagger tolerance
    let out = staggered_three_finger_tap(45_000)?;
    let labels: Vec<&str> = out.dispatches.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["three_finger_tap"]);

    let out = staggered_three_finger_tap(60_000)?;
    assert!(out.dispatches.is_empty());
    Ok(())
}

#[test]
fn test_slow_three_finger_tap_is_ignored() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let fingers = [touch(1, 30.0, 70.0), touch(2, 50.0, 70.0), touch(3, 70.0, 70.0)];

    // Lifting after 210ms exceeds the 200ms tap cadence
    let out = hold(&mut engine, Side::Left, 0, 200_000, &fingers);
    assert!(out.dispatches.is_empty());
    assert_eq!(engine.mode(Side::Left), IntentMode::Idle);
    Ok(())
}

#[test]
fn test_staggered_second_contact_is_not_a_gesture() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let a = touch(1, 30.0, 30.0);
    let b = touch(2, 50.0, 30.0);

    engine.apply(Side::Left, &frame(0, &[a]));
    engine.apply(Side::Left, &frame(10_000, &[a]));
    engine.apply(Side::Left, &frame(20_000, &[a]));
    let out = engine.apply(Side::Left, &frame(30_000, &[a, b]));
    assert!(out.transitions.is_empty());
    assert_eq!(engine.mode(Side::Left), IntentMode::TypingCommitted);
    Ok(())
}

#[test]
fn test_rollover_typing_is_not_a_gesture() -> Result<(), Box<dyn Error>> {
    let layout = KeyLayout {
        left: vec![
            KeyRect::new("a", 20.0, 20.0, 20.0, 20.0),
            KeyRect::new("b", 40.0, 20.0, 20.0, 20.0),
            KeyRect::new("c", 60.0, 20.0, 20.0, 20.0),
        ],
        right: vec![],
    };
    let mut engine = Engine::new(config(), layout, Keymap::default())?;
    let a = touch(1, 30.0, 30.0);
    let b = touch(2, 50.0, 30.0);
    let c = touch(3, 70.0, 30.0);

    // Each finger lands 40ms after the previous one, then all lift together
    let mut out = EngineOutput::default();
    for at in (0..=30_000).step_by(10_000) {
        out.extend(engine.apply(Side::Left, &frame(at, &[a])));
    }
    for at in (40_000..=70_000).step_by(10_000) {
        out.extend(engine.apply(Side::Left, &frame(at, &[a, b])));
    }
    for at in (80_000..=90_000).step_by(10_000) {
        out.extend(engine.apply(Side::Left, &frame(at, &[a, b, c])));
    }
    out.extend(engine.apply(Side::Left, &frame(100_000, &[])));

    assert_eq!(
        modes(&out),
        vec![
            (IntentMode::Idle, IntentMode::KeyCandidate),
            (IntentMode::KeyCandidate, IntentMode::TypingCommitted),
        ]
    );
    assert_eq!(
        keys(&out),
        vec![
            ("a".to_string(), vec![]),
            ("b".to_string(), vec![]),
            ("c".to_string(), vec![]),
        ]
    );
    assert!(out.drops.is_empty());
    Ok(())
}

#[test]
fn test_committed_typing_survives_a_gesture() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let a = touch(1, 30.0, 30.0);
    let pair = [touch(2, 70.0, 70.0), touch(3, 90.0, 70.0)];

    let mut out = EngineOutput::default();
    for at in (0..=30_000).step_by(10_000) {
        out.extend(engine.apply(Side::Left, &frame(at, &[a])));
    }
    // Two more fingers land together while "a" is still typing
    for at in (40_000..=60_000).step_by(10_000) {
        out.extend(engine.apply(Side::Left, &frame(at, &[a, pair[0], pair[1]])));
    }
    assert_eq!(engine.mode(Side::Left), IntentMode::GestureCandidate);
    out.extend(engine.apply(Side::Left, &frame(70_000, &[])));

    // The typing contact still types and no tap fires for the episode
    assert_eq!(keys(&out), vec![("a".to_string(), vec![])]);
    assert_eq!(out.dispatches.len(), 1);
    Ok(())
}

#[test]
fn test_moving_contact_becomes_pointer() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;

    let mut out = engine.apply(Side::Left, &frame(0, &[touch(1, 30.0, 30.0)]));
    out.extend(engine.apply(Side::Left, &frame(10_000, &[touch(1, 32.5, 30.0)])));
    assert_eq!(engine.mode(Side::Left), IntentMode::KeyCandidate);
    out.extend(engine.apply(Side::Left, &frame(20_000, &[touch(1, 35.0, 30.0)])));
    assert_eq!(engine.mode(Side::Left), IntentMode::MouseActive);
    out.extend(engine.apply(Side::Left, &frame(30_000, &[])));

    assert!(!out
        .transitions
        .iter()
        .any(|t| t.to == IntentMode::TypingCommitted));
    assert!(out.dispatches.is_empty());
    assert_eq!(engine.mode(Side::Left), IntentMode::Idle);
    Ok(())
}

#[test]
fn test_fast_contact_becomes_pointer_after_window() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    engine.apply(Side::Left, &frame(0, &[touch(1, 30.0, 30.0)]));
    engine.apply(Side::Left, &frame(10_000, &[touch(1, 31.0, 30.0)]));
    engine.apply(Side::Left, &frame(20_000, &[touch(1, 31.0, 30.0)]));
    assert_eq!(engine.mode(Side::Left), IntentMode::MouseActive);
    Ok(())
}

#[test]
fn test_off_key_contact_is_pointer_unless_keyboard_mode() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let out = engine.apply(Side::Left, &frame(0, &[touch(1, 80.0, 80.0)]));
    assert_eq!(
        modes(&out),
        vec![(IntentMode::Idle, IntentMode::MouseCandidate)]
    );

    let mut config = config();
    config.keyboard_mode = true;
    let mut engine = self::engine(config)?;
    let out = hold(&mut engine, Side::Left, 0, 40_000, &[touch(1, 80.0, 80.0)]);
    assert!(out.is_empty());
    assert_eq!(engine.mode(Side::Left), IntentMode::Idle);
    Ok(())
}

#[test]
fn test_expired_contacts_return_to_idle() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    engine.apply(Side::Left, &frame(0, &[touch(1, 80.0, 80.0)]));
    engine.apply(Side::Left, &frame(10_000, &[touch(1, 80.0, 80.0)]));
    assert_eq!(engine.active_contacts(Side::Left), 1);

    // No lift is ever reported
    let out = engine.tick(23_000);
    assert_eq!(engine.active_contacts(Side::Left), 0);
    assert_eq!(engine.mode(Side::Left), IntentMode::Idle);
    assert_eq!(out.transitions.last().map(|t| t.to), Some(IntentMode::Idle));
    Ok(())
}

#[test]
fn test_release_snaps_to_nearby_key() -> Result<(), Box<dyn Error>> {
    let layout = KeyLayout {
        left: vec![KeyRect::new("a", 20.0, 20.0, 20.0, 20.0)],
        right: vec![],
    };

    let run = |config: EngineConfig| -> Result<EngineOutput, Box<dyn Error>> {
        let mut engine = Engine::new(config, layout.clone(), Keymap::default())?;
        let mut out = hold(&mut engine, Side::Left, 0, 20_000, &[touch(1, 39.5, 30.0)]);
        out.extend(engine.apply(Side::Left, &frame(40_000, &[touch(2, 39.5, 30.0)])));
        out.extend(engine.apply(Side::Left, &frame(50_000, &[touch(2, 41.0, 30.0)])));
        out.extend(engine.apply(Side::Left, &frame(60_000, &[])));
        Ok(out)
    };

    let out = run(config())?;
    assert_eq!(keys(&out), vec![("a".to_string(), vec![])]);
    assert_eq!(drops(&out), vec![DropReason::OffKeyNoSnap]);

    let mut config = config();
    config.snap_radius_percent = 60.0;
    let out = run(config)?;
    assert_eq!(
        keys(&out),
        vec![("a".to_string(), vec![]), ("a".to_string(), vec![])]
    );
    Ok(())
}

#[test]
fn test_drag_cancels_typing_contact() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let mut out = EngineOutput::default();
    for (at, x) in [(0, 21.0), (10_000, 21.0), (20_000, 21.0), (30_000, 25.0), (40_000, 28.0)] {
        out.extend(engine.apply(Side::Left, &frame(at, &[touch(1, x, 30.0)])));
    }
    assert_eq!(engine.mode(Side::Left), IntentMode::TypingCommitted);
    out.extend(engine.apply(Side::Left, &frame(50_000, &[])));

    assert!(out.dispatches.is_empty());
    assert_eq!(drops(&out), vec![DropReason::DragCancel]);
    Ok(())
}

#[test]
fn test_hold_binding() -> Result<(), Box<dyn Error>> {
    let keymap = Keymap {
        layers: vec![KeymapLayer {
            name: "base".to_string(),
            bindings: HashMap::from([(
                "a".to_string(),
                KeyBinding {
                    tap: Action::key("a"),
                    hold: Some(Action::key("escape")),
                },
            )]),
        }],
    };
    let mut engine = Engine::new(config(), layout(), keymap)?;

    let out = hold(&mut engine, Side::Left, 0, 100_000, &[touch(1, 30.0, 30.0)]);
    assert_eq!(keys(&out), vec![("a".to_string(), vec![])]);

    let out = hold(&mut engine, Side::Left, 200_000, 420_000, &[touch(2, 30.0, 30.0)]);
    assert_eq!(keys(&out), vec![("escape".to_string(), vec![])]);
    assert_eq!(out.dispatches[0].label, "hold:a");
    Ok(())
}

#[test]
fn test_four_finger_hold_shifts_keys() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let fingers = [
        touch(1, 20.0, 70.0),
        touch(2, 35.0, 70.0),
        touch(3, 50.0, 70.0),
        touch(4, 65.0, 70.0),
    ];

    let mut out = EngineOutput::default();
    for at in (0..=220_000).step_by(10_000) {
        out.extend(engine.apply(Side::Left, &frame(at, &fingers)));
    }
    assert_eq!(out.dispatches.len(), 1);
    assert_eq!(
        out.dispatches[0].action,
        DispatchAction::Control(ControlChange::ChordalShift(true))
    );
    assert_eq!(out.dispatches[0].label, "four_finger_hold");
    assert!(engine.snapshot().chordal_shift_active);

    let out = hold(&mut engine, Side::Right, 230_000, 230_000, &[touch(1, 30.0, 30.0)]);
    assert_eq!(keys(&out), vec![("j".to_string(), vec!["shift".to_string()])]);

    let out = engine.apply(Side::Left, &frame(250_000, &[]));
    assert_eq!(
        out.dispatches
            .iter()
            .map(|event| event.action.clone())
            .collect::<Vec<_>>(),
        vec![DispatchAction::Control(ControlChange::ChordalShift(false))]
    );
    assert!(!engine.snapshot().chordal_shift_active);
    assert_eq!(engine.mode(Side::Left), IntentMode::Idle);
    Ok(())
}

#[test]
fn test_chordal_shift_disabled() -> Result<(), Box<dyn Error>> {
    let mut config = config();
    config.chordal_shift = false;
    let mut engine = engine(config)?;
    let fingers = [
        touch(1, 20.0, 70.0),
        touch(2, 35.0, 70.0),
        touch(3, 50.0, 70.0),
        touch(4, 65.0, 70.0),
    ];
    let out = hold(&mut engine, Side::Left, 0, 300_000, &fingers);
    assert!(out.dispatches.is_empty());
    assert!(!engine.snapshot().chordal_shift_active);
    Ok(())
}

#[test]
fn test_five_finger_swipe_toggles_typing() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let mut out = EngineOutput::default();
    for step in 0..6u64 {
        let dx = step as f64 * 5.0;
        let fingers: Vec<Contact> = (0..5u8)
            .map(|id| touch(id, 20.0 + id as f64 * 10.0 + dx, 80.0))
            .collect();
        out.extend(engine.apply(Side::Left, &frame(step * 10_000, &fingers)));
    }
    out.extend(engine.apply(Side::Left, &frame(60_000, &[])));

    assert_eq!(out.dispatches.len(), 1);
    assert_eq!(out.dispatches[0].label, "five_finger_swipe_right");
    assert_eq!(
        out.dispatches[0].action,
        DispatchAction::Control(ControlChange::TypingEnabled(false))
    );
    assert!(!engine.snapshot().typing_enabled);

    // Contacts over keys now only point
    let out = engine.apply(Side::Left, &frame(100_000, &[touch(1, 30.0, 30.0)]));
    assert_eq!(
        modes(&out),
        vec![(IntentMode::Idle, IntentMode::MouseCandidate)]
    );
    Ok(())
}

#[test]
fn test_corner_tap() -> Result<(), Box<dyn Error>> {
    let mut config = config();
    config.gestures.corner_top_left = Action::key("escape");
    let mut engine = engine(config)?;

    let out = hold(&mut engine, Side::Left, 0, 40_000, &[touch(1, 5.0, 5.0)]);
    assert_eq!(keys(&out), vec![("escape".to_string(), vec![])]);
    assert_eq!(out.dispatches[0].label, "corner_top_left");

    // Too long to be a tap
    let out = hold(&mut engine, Side::Left, 100_000, 400_000, &[touch(1, 5.0, 5.0)]);
    assert!(out.dispatches.is_empty());
    Ok(())
}

fn layered_keymap(b: Action) -> Keymap {
    Keymap {
        layers: vec![
            KeymapLayer {
                name: "base".to_string(),
                bindings: HashMap::from([("b".to_string(), KeyBinding { tap: b, hold: None })]),
            },
            KeymapLayer {
                name: "nav".to_string(),
                bindings: HashMap::from([(
                    "a".to_string(),
                    KeyBinding {
                        tap: Action::key("left"),
                        hold: None,
                    },
                )]),
            },
        ],
    }
}

#[test]
fn test_layer_toggle() -> Result<(), Box<dyn Error>> {
    let keymap = layered_keymap(Action::LayerToggle { layer: 1 });
    let mut engine = Engine::new(config(), layout(), keymap)?;

    let out = hold(&mut engine, Side::Left, 0, 0, &[touch(1, 50.0, 30.0)]);
    assert_eq!(
        out.dispatches[0].action,
        DispatchAction::Control(ControlChange::Layer(1))
    );
    assert_eq!(engine.snapshot().active_layer, 1);

    let out = hold(&mut engine, Side::Left, 20_000, 20_000, &[touch(1, 30.0, 30.0)]);
    assert_eq!(keys(&out), vec![("left".to_string(), vec![])]);

    let out = hold(&mut engine, Side::Left, 40_000, 40_000, &[touch(1, 50.0, 30.0)]);
    assert_eq!(
        out.dispatches[0].action,
        DispatchAction::Control(ControlChange::Layer(0))
    );
    Ok(())
}

#[test]
fn test_momentary_layer() -> Result<(), Box<dyn Error>> {
    let keymap = layered_keymap(Action::MomentaryLayer { layer: 1 });
    let mut engine = Engine::new(config(), layout(), keymap)?;
    let b = touch(1, 50.0, 30.0);
    let a = touch(2, 30.0, 30.0);
    let mut lifted = a;
    lifted.flags = ContactFlags(0);

    let mut out = EngineOutput::default();
    for at in [0, 10_000, 20_000] {
        out.extend(engine.apply(Side::Left, &frame(at, &[b])));
    }
    assert!(engine.snapshot().momentary_layer_active);
    assert_eq!(out.dispatches[0].label, "momentary_layer:1");

    out.extend(engine.apply(Side::Left, &frame(30_000, &[b, a])));
    out.extend(engine.apply(Side::Left, &frame(40_000, &[b, lifted])));
    out.extend(engine.apply(Side::Left, &frame(50_000, &[])));

    assert_eq!(keys(&out), vec![("left".to_string(), vec![])]);
    let last = out.dispatches.last().map(|event| event.action.clone());
    assert_eq!(last, Some(DispatchAction::Control(ControlChange::Layer(0))));
    assert!(!engine.snapshot().momentary_layer_active);
    Ok(())
}

#[test]
fn test_invalid_contact_reported() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let mut far = touch(1, 0.0, 0.0);
    far.x = 2000;
    let out = engine.apply(Side::Right, &frame(0, &[far]));
    assert_eq!(drops(&out), vec![DropReason::InvalidContact]);
    assert_eq!(out.drops[0].side, Side::Right);
    assert_eq!(engine.active_contacts(Side::Right), 0);
    Ok(())
}

#[test]
fn test_sides_are_independent() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    engine.apply(Side::Left, &frame(0, &[touch(1, 30.0, 30.0)]));
    engine.apply(Side::Right, &frame(5_000, &[touch(1, 80.0, 80.0)]));

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.left.mode, IntentMode::KeyCandidate);
    assert_eq!(snapshot.right.mode, IntentMode::MouseCandidate);
    assert_eq!(snapshot.side(Side::Left).active_contacts, 1);
    assert_eq!(snapshot.timestamp_us, 5_000);
    Ok(())
}

#[test]
fn test_clock_is_monotonic() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    engine.apply(Side::Left, &frame(50_000, &[touch(1, 80.0, 80.0)]));
    let out = engine.apply(Side::Right, &frame(10_000, &[touch(1, 80.0, 80.0)]));
    assert_eq!(out.transitions[0].at_us, 50_000);
    Ok(())
}

#[test]
fn test_reset_keeps_toggles() -> Result<(), Box<dyn Error>> {
    let mut config = config();
    config.keyboard_mode = true;
    let mut engine = engine(config)?;
    engine.apply(Side::Left, &frame(0, &[touch(1, 30.0, 30.0)]));

    engine.reset_state();
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.left.mode, IntentMode::Idle);
    assert_eq!(snapshot.left.active_contacts, 0);
    assert!(snapshot.keyboard_mode);
    Ok(())
}

#[test]
fn test_invalid_configuration_rejected() -> Result<(), Box<dyn Error>> {
    let mut engine = engine(config())?;
    let mut bad = config();
    bad.swipe_distance_mm = 0.0;
    assert!(matches!(
        engine.reconfigure(bad),
        Err(ConfigError::InvalidValue { field: "swipe_distance_mm", .. })
    ));
    assert_eq!(engine.config().swipe_distance_mm, 18.0);

    let mut bad = config();
    bad.gestures.three_finger_tap = Action::LayerToggle { layer: 2 };
    assert_eq!(
        engine.reconfigure(bad).err(),
        Some(ConfigError::UnknownLayer { layer: 2, count: 1 })
    );

    let keymap = layered_keymap(Action::LayerToggle { layer: 4 });
    assert!(engine.set_layout(layout(), keymap).is_err());
    Ok(())
}
