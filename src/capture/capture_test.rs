use std::{error::Error, io::Cursor};

use packed_struct::PackedStruct;

use crate::{
    capture::{
        replay::{self, ReplayFixture, ReplayMismatch},
        CaptureError, CaptureReader, CaptureRecord, CaptureWriter, FILE_HEADER_SIZE,
        RECORD_HEADER_SIZE,
    },
    config::{
        layout::{KeyLayout, Keymap},
        EngineConfig,
    },
    drivers::trackpad::{
        hid_report::{OfficialReport, RAW_X_MAX, RAW_Y_MAX},
        DecoderProfile, DeviceDescriptor,
    },
    input::{engine::IntentMode, Side},
};

fn left() -> DeviceDescriptor {
    DeviceDescriptor::new(0x1234, 0x0001, 0x000d, 0x0005)
}

fn right() -> DeviceDescriptor {
    DeviceDescriptor::new(0x1234, 0x0002, 0x000d, 0x0005)
}

fn write_records(records: &[CaptureRecord]) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut writer = CaptureWriter::new(Vec::new(), left(), right())?;
    for record in records {
        writer.write_record(record)?;
    }
    assert_eq!(writer.records(), records.len() as u64);
    Ok(writer.into_inner()?)
}

fn record(side: Option<Side>, profile: Option<DecoderProfile>, at: u64, payload: &[u8]) -> CaptureRecord {
    CaptureRecord {
        side,
        profile,
        timestamp_us: at,
        payload: payload.to_vec(),
    }
}

#[test]
fn test_records_read_back_in_order() -> Result<(), Box<dyn Error>> {
    let records = vec![
        record(None, None, 0, &[0x05, 0x01, 0x02]),
        record(Some(Side::Right), Some(DecoderProfile::Legacy), 1_500, &[0xff; 50]),
        record(Some(Side::Left), Some(DecoderProfile::AppleNineByte), 3_000, &[]),
    ];
    let bytes = write_records(&records)?;
    assert_eq!(
        bytes.len(),
        FILE_HEADER_SIZE + 3 * RECORD_HEADER_SIZE + 3 + 50
    );
    assert_eq!(&bytes[..8], b"ATPCAP01");
    assert_eq!(&bytes[8..10], &[0x02, 0x00]);

    let reader = CaptureReader::new(Cursor::new(bytes))?;
    assert_eq!(reader.header().version, 2);
    assert_eq!(reader.header().descriptor(Side::Left), left());
    assert_eq!(reader.header().descriptor(Side::Right), right());

    let read: Vec<CaptureRecord> = reader.collect::<Result<_, _>>()?;
    assert_eq!(read, records);
    Ok(())
}

#[test]
fn test_record_header_layout() -> Result<(), Box<dyn Error>> {
    let bytes = write_records(&[record(
        Some(Side::Right),
        Some(DecoderProfile::Official),
        0x0102_0304,
        &[0xaa, 0xbb],
    )])?;
    let header = &bytes[FILE_HEADER_SIZE..FILE_HEADER_SIZE + RECORD_HEADER_SIZE];
    assert_eq!(
        header,
        &[0x02, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0x03, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00]
    );
    Ok(())
}

#[test]
fn test_truncated_trailing_record() -> Result<(), Box<dyn Error>> {
    let mut bytes = write_records(&[record(Some(Side::Left), None, 0, &[1, 2, 3, 4])])?;
    bytes.extend_from_slice(&[0x01, 0x00, 0x00]);

    let mut reader = CaptureReader::new(Cursor::new(bytes.clone()))?;
    assert!(reader.next_record()?.is_some());
    assert!(matches!(
        reader.next_record(),
        Err(CaptureError::Truncated { index: 1, .. })
    ));

    // A short payload is also truncation, and the iterator stops after it
    bytes.truncate(bytes.len() - 5);
    let results: Vec<_> = CaptureReader::new(Cursor::new(bytes))?.collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(CaptureError::Truncated { index: 0, .. })
    ));
    Ok(())
}

#[test]
fn test_rejects_foreign_files() -> Result<(), Box<dyn Error>> {
    let bytes = write_records(&[])?;

    let mut bad_magic = bytes.clone();
    bad_magic[0] = b'X';
    assert!(matches!(
        CaptureReader::new(Cursor::new(bad_magic)),
        Err(CaptureError::BadMagic(_))
    ));

    let mut old = bytes.clone();
    old[8] = 0x01;
    assert!(matches!(
        CaptureReader::new(Cursor::new(old)),
        Err(CaptureError::UnsupportedVersion(1))
    ));

    assert!(matches!(
        CaptureReader::new(Cursor::new(bytes[..20].to_vec())),
        Err(CaptureError::Truncated { index: 0, .. })
    ));

    let mut bad_side = write_records(&[record(None, None, 0, &[])])?;
    bad_side[FILE_HEADER_SIZE] = 7;
    let mut reader = CaptureReader::new(Cursor::new(bad_side))?;
    assert!(matches!(
        reader.next_record(),
        Err(CaptureError::InvalidField {
            field: "side hint",
            value: 7,
            ..
        })
    ));
    Ok(())
}

#[test]
fn test_capture_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.atpcap");

    let mut writer = CaptureWriter::create(&path, left(), right())?;
    for i in 0..10u64 {
        writer.append(Some(Side::Left), None, i * 8_000, &[i as u8; 50])?;
    }
    writer.flush()?;
    drop(writer);

    let reader = CaptureReader::open(&path)?;
    let timestamps: Vec<u64> = reader
        .map(|r| r.map(|r| r.timestamp_us))
        .collect::<Result<_, _>>()?;
    assert_eq!(timestamps.len(), 10);
    assert_eq!(timestamps[9], 72_000);
    Ok(())
}

/// Official report with contacts given in millimetres on a 160 x 114.9 mm
/// surface
fn official(contacts: &[(u8, f64, f64)]) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut report = OfficialReport {
        contact_count: contacts.len() as u8,
        ..Default::default()
    };
    for (i, (id, x, y)) in contacts.iter().enumerate() {
        let slot = report.slot_mut(i).ok_or("too many contacts")?;
        slot.contact_id = *id;
        slot.flags = 0x03;
        slot.set_x((x / 160.0 * RAW_X_MAX as f64).round() as u16);
        slot.set_y((y / 114.9 * RAW_Y_MAX as f64).round() as u16);
        slot.pressure = 0x40;
    }
    Ok(report.pack()?.to_vec())
}

/// A key tap on the left surface followed by a two finger tap on the right
fn session() -> Result<Vec<u8>, Box<dyn Error>> {
    let base = 5_000_000;
    let official_tag = Some(DecoderProfile::Official);
    let q = official(&[(1, 34.3, 34.5)])?;
    let yu = official(&[(1, 34.3, 34.5), (2, 57.1, 34.5)])?;
    let lift = official(&[])?;

    write_records(&[
        record(Some(Side::Left), official_tag, base, &q),
        record(Some(Side::Left), official_tag, base + 10_000, &q),
        record(Some(Side::Left), official_tag, base + 20_000, &q),
        record(Some(Side::Left), official_tag, base + 30_000, &lift),
        record(Some(Side::Right), official_tag, base + 500_000, &yu),
        record(Some(Side::Right), official_tag, base + 510_000, &yu),
        record(Some(Side::Right), official_tag, base + 520_000, &yu),
        record(Some(Side::Right), official_tag, base + 530_000, &lift),
        // Noise that no profile accepts
        record(None, None, base + 600_000, &[0x00, 0x01]),
    ])
}

fn replay(bytes: &[u8]) -> Result<replay::ReplayOutcome, Box<dyn Error>> {
    let config = EngineConfig::default();
    let layout = KeyLayout::split_qwerty(config.surface.width_mm, config.surface.height_mm);
    let reader = CaptureReader::new(Cursor::new(bytes.to_vec()))?;
    Ok(replay::run(reader, config, layout, Keymap::default())?)
}

#[test]
fn test_replay_is_deterministic() -> Result<(), Box<dyn Error>> {
    let bytes = session()?;
    let first = replay(&bytes)?;
    let second = replay(&bytes)?;
    assert_eq!(first, second);
    assert_eq!(first.fingerprint.len(), 64);

    assert_eq!(first.records, 9);
    assert_eq!(first.decoded, 8);
    assert_eq!(first.rejected, 1);

    let labels: Vec<&str> = first.dispatches.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["key:q", "two_finger_tap"]);
    assert_eq!(first.dispatches[0].timestamp_us, 30_000);

    // Typing grace on the left runs out on a scheduled tick, before the
    // right side is touched
    let modes: Vec<(Side, IntentMode, u64)> = first
        .transitions
        .iter()
        .map(|t| (t.side, t.to, t.at_us))
        .collect();
    assert_eq!(
        modes,
        vec![
            (Side::Left, IntentMode::KeyCandidate, 0),
            (Side::Left, IntentMode::TypingCommitted, 20_000),
            (Side::Left, IntentMode::Idle, 330_000),
            (Side::Right, IntentMode::GestureCandidate, 500_000),
            (Side::Right, IntentMode::Idle, 530_000),
        ]
    );
    Ok(())
}

#[test]
fn test_replay_ticks_between_records() -> Result<(), Box<dyn Error>> {
    let official_tag = Some(DecoderProfile::Official);
    let pointer = official(&[(1, 80.0, 100.0)])?;
    let q = official(&[(2, 34.3, 34.5)])?;
    let lift = official(&[])?;

    // The pointer stops reporting and a new contact lands on "q" without an
    // empty report in between
    let bytes = write_records(&[
        record(Some(Side::Left), official_tag, 0, &pointer),
        record(Some(Side::Left), official_tag, 10_000, &pointer),
        record(Some(Side::Left), official_tag, 40_000, &q),
        record(Some(Side::Left), official_tag, 50_000, &q),
        record(Some(Side::Left), official_tag, 60_000, &q),
        record(Some(Side::Left), official_tag, 70_000, &lift),
    ])?;
    let outcome = replay(&bytes)?;

    let modes: Vec<(IntentMode, IntentMode, u64)> = outcome
        .transitions
        .iter()
        .map(|t| (t.from, t.to, t.at_us))
        .collect();
    assert_eq!(
        modes,
        vec![
            (IntentMode::Idle, IntentMode::MouseCandidate, 0),
            (IntentMode::MouseCandidate, IntentMode::MouseActive, 20_000),
            (IntentMode::MouseActive, IntentMode::Idle, 25_000),
            (IntentMode::Idle, IntentMode::KeyCandidate, 40_000),
            (IntentMode::KeyCandidate, IntentMode::TypingCommitted, 60_000),
            (IntentMode::TypingCommitted, IntentMode::Idle, 370_000),
        ]
    );
    let labels: Vec<&str> = outcome.dispatches.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["key:q"]);
    Ok(())
}

#[test]
fn test_fixture_verification() -> Result<(), Box<dyn Error>> {
    let outcome = replay(&session()?)?;
    let fixture = ReplayFixture::from_outcome(&outcome);
    fixture.verify(&outcome)?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    fixture.to_json_file(&path)?;
    let loaded = ReplayFixture::from_json_file(&path)?;
    assert_eq!(loaded, fixture);

    let mut wrong = fixture.clone();
    wrong.dispatches += 1;
    assert_eq!(
        wrong.verify(&outcome),
        Err(ReplayMismatch::Count {
            field: "dispatches",
            expected: 3,
            actual: 2
        })
    );

    let mut wrong = fixture.clone();
    wrong.fingerprint = "00".repeat(32);
    assert!(matches!(
        wrong.verify(&outcome),
        Err(ReplayMismatch::Fingerprint { .. })
    ));
    Ok(())
}

#[test]
fn test_canonical_rendering() -> Result<(), Box<dyn Error>> {
    let outcome = replay(&session()?)?;
    let text = replay::canonical(&outcome.transitions, &outcome.dispatches);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "T 0 left idle key_candidate");
    assert_eq!(lines[5], "D 30000 left key:q key(q)");
    assert_eq!(lines[6], "D 530000 right two_finger_tap mouse(Left)");
    Ok(())
}
