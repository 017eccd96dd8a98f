//! Nine-byte finger records sent by the USB-C revision when no PTP-shaped
//! report is available.
//! Source: https://github.com/torvalds/linux/blob/master/drivers/hid/hid-magicmouse.c

use super::frame::{Contact, ContactFlags, Frame, MAX_CONTACTS};

/// Vendor ID
pub const VID: u16 = 0x05ac;
/// Product ID of the USB-C revision
pub const PID_USB_C: u16 = 0x0324;
/// Smallest payload that can carry finger records
pub const MIN_PAYLOAD_SIZE: usize = 64;
/// Candidate offsets of the first finger record. Which one applies depends on
/// whether the transport kept the vendor header.
pub const BASE_OFFSETS: [usize; 2] = [1, 9];
/// Size of a single finger record
pub const RECORD_SIZE: usize = 9;

// Input report axis ranges
pub const X_MIN: i32 = -3678;
pub const X_MAX: i32 = 3934;
pub const Y_MIN: i32 = -2478;
pub const Y_MAX: i32 = 2587;

/// One unpacked finger record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finger {
    pub id: u8,
    pub x: i32,
    pub y: i32,
    pub pressure: u8,
    pub phase: u8,
}

impl Finger {
    /// The touch state in the top bits of byte 3 is zero for records that
    /// carry no touch
    pub fn is_touching(&self) -> bool {
        self.phase != 0
    }

    pub fn in_range(&self) -> bool {
        (X_MIN..=X_MAX).contains(&self.x) && (Y_MIN..=Y_MAX).contains(&self.y)
    }
}

/// Unpack a single finger record. X and Y are 13-bit signed values spread
/// over the first four bytes; the identity is the low nibble of the last byte.
pub fn unpack_finger(record: &[u8; RECORD_SIZE]) -> Finger {
    let b0 = record[0] as u32;
    let b1 = record[1] as u32;
    let b2 = record[2] as u32;
    let b3 = record[3] as u32;

    let x = ((b1 << 27 | b0 << 19) as i32) >> 19;
    let y = -(((b3 << 30 | b2 << 22 | b1 << 14) as i32) >> 19);

    Finger {
        id: record[8] & 0x0f,
        x,
        y,
        pressure: record[7],
        phase: (record[3] & 0xc0) >> 6,
    }
}

/// Pack a finger back into its wire form. Used to build test reports.
pub fn pack_finger(finger: &Finger) -> [u8; RECORD_SIZE] {
    let x = (finger.x as u32) & 0x1fff;
    let y = (-finger.y as u32) & 0x1fff;
    let mut record = [0u8; RECORD_SIZE];
    record[0] = (x & 0xff) as u8;
    record[1] = ((x >> 8) as u8 & 0x1f) | (((y & 0x07) as u8) << 5);
    record[2] = ((y >> 3) & 0xff) as u8;
    record[3] = (((y >> 11) & 0x03) as u8) | ((finger.phase & 0x03) << 6);
    record[7] = finger.pressure;
    record[8] = finger.id & 0x0f;
    record
}

/// Rescale a signed device coordinate into `0..=target_max`
pub fn rescale(value: i32, min: i32, max: i32, target_max: u16) -> u16 {
    let span = (max - min) as i64;
    let offset = (value.clamp(min, max) - min) as i64;
    ((offset * target_max as i64 + span / 2) / span) as u16
}

/// Collect valid, de-duplicated fingers starting at the given base offset.
/// Records that are all zero are padding. Records without a touch state or
/// out of range are dropped one by one.
pub fn collect_fingers(bytes: &[u8], base: usize) -> ([Option<Finger>; MAX_CONTACTS], usize) {
    let mut fingers = [None; MAX_CONTACTS];
    let mut found = 0;
    let mut seen: u16 = 0;

    let Some(records) = bytes.get(base..) else {
        return (fingers, 0);
    };
    for chunk in records.chunks_exact(RECORD_SIZE) {
        if found >= MAX_CONTACTS {
            break;
        }
        let Ok(record) = <&[u8; RECORD_SIZE]>::try_from(chunk) else {
            continue;
        };
        if record.iter().all(|b| *b == 0) {
            continue;
        }
        let finger = unpack_finger(record);
        if !finger.is_touching() {
            log::trace!("Dropping finger without touch state: {finger:?}");
            continue;
        }
        if !finger.in_range() {
            log::trace!("Dropping out of range finger: {finger:?}");
            continue;
        }
        let mask = 1u16 << finger.id;
        if seen & mask != 0 {
            continue;
        }
        seen |= mask;
        fingers[found] = Some(finger);
        found += 1;
    }

    (fingers, found)
}

/// Build a frame from whichever base offset yields more valid fingers. Ties
/// prefer the first offset. Returns None if neither offset holds a valid
/// finger, since the report is then not a touch report.
pub fn decode(bytes: &[u8], arrival_timestamp: u64, max_x: u16, max_y: u16) -> Option<Frame> {
    let mut best = collect_fingers(bytes, BASE_OFFSETS[0]);
    let mut base = BASE_OFFSETS[0];
    for offset in BASE_OFFSETS.iter().skip(1) {
        let candidate = collect_fingers(bytes, *offset);
        if candidate.1 > best.1 {
            best = candidate;
            base = *offset;
        }
    }
    if best.1 == 0 {
        return None;
    }

    let report_id = bytes.first().copied().unwrap_or_default();
    let mut frame = Frame::new(report_id, arrival_timestamp);
    // With the vendor header present, the second byte carries the click state
    frame.is_button_clicked = base == BASE_OFFSETS[1] && bytes.get(1).is_some_and(|b| b & 0x01 != 0);

    for finger in best.0.iter().flatten() {
        frame.push(Contact {
            id: finger.id,
            x: rescale(finger.x, X_MIN, X_MAX, max_x),
            y: rescale(finger.y, Y_MIN, Y_MAX, max_y),
            flags: ContactFlags::default().with_touching(),
            pressure: Some(finger.pressure),
            phase: Some(finger.phase),
        });
    }
    frame.set_contact_count(frame.len() as u8);

    Some(frame)
}
