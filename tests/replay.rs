use std::{collections::HashMap, error::Error, path::Path};

use packed_struct::PackedStruct;

use splitpad::{
    capture::{
        replay::{self, ReplayFixture, ReplayMismatch},
        CaptureReader, CaptureWriter,
    },
    config::{
        layout::{KeyBinding, KeyLayout, Keymap, KeymapLayer},
        Action, EngineConfig,
    },
    drivers::trackpad::{
        hid_report::{OfficialReport, RAW_X_MAX, RAW_Y_MAX},
        DecoderProfile, DeviceDescriptor,
    },
    input::{dispatch::event::DispatchAction, Side},
};

fn descriptor(product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor::new(0x1234, product_id, 0x000d, 0x0005)
}

/// Official report with one contact at the given position in millimetres,
/// or an empty report
fn official(at: Option<(f64, f64)>) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut report = OfficialReport::default();
    if let Some((x, y)) = at {
        report.contact_count = 1;
        let slot = report.slot_mut(0).ok_or("no slot")?;
        slot.contact_id = 3;
        slot.flags = 0x03;
        slot.set_x((x / 160.0 * RAW_X_MAX as f64).round() as u16);
        slot.set_y((y / 114.9 * RAW_Y_MAX as f64).round() as u16);
        slot.pressure = 0x30;
    }
    Ok(report.pack()?.to_vec())
}

/// Types "w" and "e" on the left surface, then "j" on the right
fn write_session(path: &Path) -> Result<(), Box<dyn Error>> {
    let mut writer = CaptureWriter::create(path, descriptor(1), descriptor(2))?;
    let taps = [
        (Side::Left, 0, (57.1, 34.5)),
        (Side::Left, 100_000, (80.0, 34.5)),
        (Side::Right, 200_000, (57.1, 57.4)),
    ];
    let lift = official(None)?;
    for (side, start, position) in taps {
        let touch = official(Some(position))?;
        for offset in [0, 10_000, 20_000] {
            writer.append(Some(side), Some(DecoderProfile::Official), start + offset, &touch)?;
        }
        writer.append(Some(side), Some(DecoderProfile::Official), start + 30_000, &lift)?;
    }
    writer.flush()?;
    Ok(())
}

fn replay_file(path: &Path, keymap: Keymap) -> Result<replay::ReplayOutcome, Box<dyn Error>> {
    let config = EngineConfig::from_yaml_file("rootfs/usr/share/splitpad/config.yaml")?;
    let layout = KeyLayout::split_qwerty(config.surface.width_mm, config.surface.height_mm);
    let reader = CaptureReader::open(path)?;
    Ok(replay::run(reader, config, layout, keymap)?)
}

#[test]
fn test_replayed_session_types_keys() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.atpcap");
    write_session(&path)?;

    let outcome = replay_file(&path, Keymap::default())?;
    assert_eq!(outcome.records, 12);
    assert_eq!(outcome.decoded, 12);
    assert_eq!(outcome.rejected, 0);

    let typed: Vec<(Side, String)> = outcome
        .dispatches
        .iter()
        .map(|event| (event.side, event.label.clone()))
        .collect();
    assert_eq!(
        typed,
        vec![
            (Side::Left, "key:w".to_string()),
            (Side::Left, "key:e".to_string()),
            (Side::Right, "key:j".to_string()),
        ]
    );
    assert!(outcome.drops.is_empty());
    Ok(())
}

#[test]
fn test_fixture_detects_behavior_change() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let capture = dir.path().join("session.atpcap");
    let fixture_path = dir.path().join("session.json");
    write_session(&capture)?;

    let outcome = replay_file(&capture, Keymap::default())?;
    ReplayFixture::from_outcome(&outcome).to_json_file(&fixture_path)?;

    // Same capture and configuration always match
    let fixture = ReplayFixture::from_json_file(&fixture_path)?;
    fixture.verify(&replay_file(&capture, Keymap::default())?)?;

    // Rebinding a key keeps every count but changes the fingerprint
    let remapped = Keymap {
        layers: vec![KeymapLayer {
            name: "base".to_string(),
            bindings: HashMap::from([(
                "w".to_string(),
                KeyBinding {
                    tap: Action::key("x"),
                    hold: None,
                },
            )]),
        }],
    };
    let changed = replay_file(&capture, remapped)?;
    assert_eq!(
        changed.dispatches[0].action,
        DispatchAction::Key {
            key: "x".to_string(),
            modifiers: vec![]
        }
    );
    assert!(matches!(
        fixture.verify(&changed),
        Err(ReplayMismatch::Fingerprint { .. })
    ));
    Ok(())
}
