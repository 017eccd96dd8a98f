//! Rolling per-side view of the contacts currently on a surface.

use crate::drivers::trackpad::{decoder::TargetSpace, Frame, MAX_CONTACTS};

/// A tracked contact. Positions are in millimetres from the top-left corner
/// of the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEntry {
    pub id: u8,
    pub x_mm: f64,
    pub y_mm: f64,
    pub start_x_mm: f64,
    pub start_y_mm: f64,
    /// Speed over the last update in mm/s
    pub speed_mm_s: f64,
    pub peak_speed_mm_s: f64,
    /// Largest distance from the start position seen so far
    pub max_travel_mm: f64,
    pub first_seen_us: u64,
    pub last_seen_us: u64,
    pub pressure: Option<u8>,
    pub peak_pressure: Option<u8>,
}

impl TouchEntry {
    fn new(id: u8, x_mm: f64, y_mm: f64, pressure: Option<u8>, now: u64) -> Self {
        Self {
            id,
            x_mm,
            y_mm,
            start_x_mm: x_mm,
            start_y_mm: y_mm,
            speed_mm_s: 0.0,
            peak_speed_mm_s: 0.0,
            max_travel_mm: 0.0,
            first_seen_us: now,
            last_seen_us: now,
            pressure,
            peak_pressure: pressure,
        }
    }

    fn update(&mut self, x_mm: f64, y_mm: f64, pressure: Option<u8>, now: u64) {
        let dt = now.saturating_sub(self.last_seen_us);
        if dt > 0 {
            let distance = ((x_mm - self.x_mm).powi(2) + (y_mm - self.y_mm).powi(2)).sqrt();
            self.speed_mm_s = distance / (dt as f64 / 1_000_000.0);
            self.peak_speed_mm_s = self.peak_speed_mm_s.max(self.speed_mm_s);
        }
        self.x_mm = x_mm;
        self.y_mm = y_mm;
        self.max_travel_mm = self.max_travel_mm.max(self.travel_mm());
        self.last_seen_us = self.last_seen_us.max(now);
        self.pressure = pressure;
        self.peak_pressure = match (self.peak_pressure, pressure) {
            (Some(peak), Some(p)) => Some(peak.max(p)),
            (peak, p) => peak.or(p),
        };
    }

    /// Current distance from the start position
    pub fn travel_mm(&self) -> f64 {
        ((self.x_mm - self.start_x_mm).powi(2) + (self.y_mm - self.start_y_mm).powi(2)).sqrt()
    }

    /// How long the contact has been down
    pub fn age_us(&self, now: u64) -> u64 {
        now.saturating_sub(self.first_seen_us)
    }
}

/// What changed in the table during one update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TouchChanges {
    /// Ids of contacts that appeared, in slot order
    pub began: Vec<u8>,
    /// Contacts that were released, with their last known state
    pub ended: Vec<TouchEntry>,
    /// Ids of contacts that were dropped as malformed
    pub invalid: Vec<u8>,
}

impl TouchChanges {
    pub fn is_empty(&self) -> bool {
        self.began.is_empty() && self.ended.is_empty() && self.invalid.is_empty()
    }
}

/// Fixed capacity table of live contacts for one side
#[derive(Debug, Clone)]
pub struct TouchTable {
    entries: [Option<TouchEntry>; MAX_CONTACTS],
    liveness_us: u64,
    target: TargetSpace,
    mm_per_unit: (f64, f64),
}

impl TouchTable {
    pub fn new(target: TargetSpace, mm_per_unit: (f64, f64), liveness_us: u64) -> Self {
        Self {
            entries: [None; MAX_CONTACTS],
            liveness_us,
            target,
            mm_per_unit,
        }
    }

    /// Apply a decoded frame. Contacts without the tip switch, outside the
    /// target space or re-using an id already seen in the frame are dropped.
    /// A tracked contact reported without tip switch has lifted. An empty
    /// frame reporting zero contacts lifts everything; otherwise missing
    /// contacts are only released once they exceed the liveness window.
    pub fn update(&mut self, frame: &Frame) -> TouchChanges {
        let now = frame.arrival_timestamp;
        let mut changes = TouchChanges::default();
        let mut seen = [false; MAX_CONTACTS];
        let mut lifted = [false; MAX_CONTACTS];
        let mut frame_ids: [Option<u8>; MAX_CONTACTS] = [None; MAX_CONTACTS];

        for (slot, contact) in frame.contacts().iter().enumerate() {
            if contact.x > self.target.max_x || contact.y > self.target.max_y {
                log::trace!("Dropping out of range contact {contact:?}");
                changes.invalid.push(contact.id);
                continue;
            }
            if frame_ids.iter().flatten().any(|id| *id == contact.id) {
                log::trace!("Dropping duplicate contact id {}", contact.id);
                changes.invalid.push(contact.id);
                continue;
            }
            frame_ids[slot] = Some(contact.id);

            let existing = self.position(contact.id);
            if !contact.flags.tip_switch() {
                match existing {
                    Some(idx) => lifted[idx] = true,
                    None => changes.invalid.push(contact.id),
                }
                continue;
            }

            let x_mm = contact.x as f64 * self.mm_per_unit.0;
            let y_mm = contact.y as f64 * self.mm_per_unit.1;
            if let Some(idx) = existing {
                if let Some(entry) = self.entries[idx].as_mut() {
                    entry.update(x_mm, y_mm, contact.pressure, now);
                }
                seen[idx] = true;
                continue;
            }

            let Some(idx) = self.entries.iter().position(Option::is_none) else {
                changes.invalid.push(contact.id);
                continue;
            };
            self.entries[idx] = Some(TouchEntry::new(
                contact.id,
                x_mm,
                y_mm,
                contact.pressure,
                now,
            ));
            seen[idx] = true;
            changes.began.push(contact.id);
        }

        let all_lifted = frame.is_empty() && frame.contact_count == 0;
        for idx in 0..MAX_CONTACTS {
            if seen[idx] {
                continue;
            }
            let Some(entry) = self.entries[idx] else {
                continue;
            };
            let expired = now.saturating_sub(entry.last_seen_us) > self.liveness_us;
            if lifted[idx] || all_lifted || expired {
                self.entries[idx] = None;
                changes.ended.push(entry);
            }
        }

        changes
    }

    /// Release every contact that has not been seen within the liveness
    /// window
    pub fn expire(&mut self, now: u64) -> Vec<TouchEntry> {
        let mut ended = Vec::new();
        for slot in self.entries.iter_mut() {
            let Some(entry) = slot else {
                continue;
            };
            if now.saturating_sub(entry.last_seen_us) > self.liveness_us {
                ended.push(*entry);
                *slot = None;
            }
        }
        ended
    }

    pub fn clear(&mut self) {
        self.entries = [None; MAX_CONTACTS];
    }

    fn position(&self, id: u8) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.is_some_and(|e| e.id == id))
    }

    pub fn get(&self, id: u8) -> Option<&TouchEntry> {
        self.entries.iter().flatten().find(|entry| entry.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TouchEntry> + Clone {
        self.entries.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Average position of all live contacts
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let count = self.len();
        if count == 0 {
            return None;
        }
        let (sx, sy) = self
            .iter()
            .fold((0.0, 0.0), |(sx, sy), e| (sx + e.x_mm, sy + e.y_mm));
        Some((sx / count as f64, sy / count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::trackpad::{Contact, ContactFlags};

    // One target unit per millimetre keeps the numbers readable
    fn table() -> TouchTable {
        let target = TargetSpace {
            max_x: 160,
            max_y: 115,
        };
        TouchTable::new(target, (1.0, 1.0), 12_000)
    }

    fn frame(now: u64, contacts: &[(u8, u16, u16)]) -> Frame {
        let mut frame = Frame::new(5, now);
        for (id, x, y) in contacts {
            frame.push(Contact {
                id: *id,
                x: *x,
                y: *y,
                flags: ContactFlags::default().with_touching(),
                pressure: Some(50),
                phase: None,
            });
        }
        frame.set_contact_count(contacts.len() as u8);
        frame
    }

    #[test]
    fn test_motion_tracking() {
        let mut table = table();
        let changes = table.update(&frame(0, &[(1, 10, 10)]));
        assert_eq!(changes.began, vec![1]);

        table.update(&frame(10_000, &[(1, 13, 14)]));
        let entry = table.get(1).copied().unwrap_or_else(|| panic!("missing"));
        assert_eq!(entry.travel_mm(), 5.0);
        assert_eq!(entry.max_travel_mm, 5.0);
        assert!((entry.speed_mm_s - 500.0).abs() < 1e-6);

        table.update(&frame(20_000, &[(1, 10, 10)]));
        let entry = table.get(1).copied().unwrap_or_else(|| panic!("missing"));
        assert_eq!(entry.travel_mm(), 0.0);
        assert_eq!(entry.max_travel_mm, 5.0);
        assert!((entry.peak_speed_mm_s - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_contacts_dropped() {
        let mut table = table();
        let mut f = frame(0, &[(1, 10, 10), (1, 20, 20), (2, 500, 10)]);
        let mut untouched = Contact {
            id: 3,
            x: 5,
            y: 5,
            ..Default::default()
        };
        untouched.flags = ContactFlags(0);
        f.push(untouched);

        let changes = table.update(&f);
        assert_eq!(changes.began, vec![1]);
        assert_eq!(changes.invalid, vec![1, 2, 3]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_release_rules() {
        let mut table = table();
        table.update(&frame(0, &[(1, 10, 10), (2, 50, 50)]));

        // Missing from a non-empty frame, but still within liveness
        let changes = table.update(&frame(8_000, &[(1, 10, 10)]));
        assert!(changes.ended.is_empty());
        assert_eq!(table.len(), 2);

        let changes = table.update(&frame(16_000, &[(1, 10, 10)]));
        assert_eq!(changes.ended.len(), 1);
        assert_eq!(changes.ended[0].id, 2);

        // An empty frame lifts everything
        let changes = table.update(&frame(17_000, &[]));
        assert_eq!(changes.ended.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_expire() {
        let mut table = table();
        table.update(&frame(0, &[(1, 10, 10), (2, 30, 10)]));
        assert_eq!(table.centroid(), Some((20.0, 10.0)));
        assert!(table.expire(12_000).is_empty());
        assert_eq!(table.expire(12_001).len(), 2);
        assert!(table.is_empty());
    }
}
