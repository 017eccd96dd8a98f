use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of contacts a single [Frame] can hold
pub const MAX_CONTACTS: usize = 5;

/// Identity of the HID interface a report was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
}

impl DeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16, usage_page: u16, usage: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            usage_page,
            usage,
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} ({:04x}/{:04x})",
            self.vendor_id, self.product_id, self.usage_page, self.usage
        )
    }
}

/// A raw input report as read from the device. Only lives for the duration
/// of a decode.
#[derive(Debug, Clone, Copy)]
pub struct RawReport<'a> {
    pub bytes: &'a [u8],
    pub descriptor: DeviceDescriptor,
}

impl<'a> RawReport<'a> {
    pub fn new(bytes: &'a [u8], descriptor: DeviceDescriptor) -> Self {
        Self { bytes, descriptor }
    }

    /// Returns the first `len` bytes of the report as a hex string for logging
    pub fn hex_prefix(&self, len: usize) -> String {
        hex_prefix(self.bytes, len)
    }
}

/// Format the first `len` bytes of the given buffer as space separated hex
pub fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-contact flag bits. Bits other than tip switch and confidence are kept
/// exactly as the device sent them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ContactFlags(pub u8);

impl ContactFlags {
    pub const CONFIDENCE: u8 = 0b0000_0001;
    pub const TIP_SWITCH: u8 = 0b0000_0010;

    pub fn tip_switch(&self) -> bool {
        self.0 & Self::TIP_SWITCH != 0
    }

    pub fn confidence(&self) -> bool {
        self.0 & Self::CONFIDENCE != 0
    }

    /// Returns a copy of the flags with tip switch and confidence set
    pub fn with_touching(self) -> Self {
        Self(self.0 | Self::TIP_SWITCH | Self::CONFIDENCE)
    }
}

/// One touch point within a [Frame]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Contact {
    pub id: u8,
    pub x: u16,
    pub y: u16,
    pub flags: ContactFlags,
    /// Raw pressure byte. Not physically calibrated.
    pub pressure: Option<u8>,
    /// Raw lifecycle byte. Only partially understood, passed through as-is.
    pub phase: Option<u8>,
}

/// A single decoded report in the canonical shape consumed by the engine.
/// Contacts live in a fixed-capacity array so decoding never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub report_id: u8,
    contacts: [Contact; MAX_CONTACTS],
    occupied: u8,
    /// Number of contacts the device claims are on the surface. This is
    /// authoritative and may differ from the number of occupied slots.
    pub contact_count: u8,
    /// Device tick counter, not wall-clock
    pub scan_time: u16,
    pub is_button_clicked: bool,
    /// Monotonic receive time in microseconds
    pub arrival_timestamp: u64,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            report_id: 0,
            contacts: [Contact::default(); MAX_CONTACTS],
            occupied: 0,
            contact_count: 0,
            scan_time: 0,
            is_button_clicked: false,
            arrival_timestamp: 0,
        }
    }
}

impl Frame {
    pub fn new(report_id: u8, arrival_timestamp: u64) -> Self {
        Self {
            report_id,
            arrival_timestamp,
            ..Default::default()
        }
    }

    /// Append a contact. Returns false if the frame is already full.
    pub fn push(&mut self, contact: Contact) -> bool {
        let idx = self.occupied as usize;
        let Some(slot) = self.contacts.get_mut(idx) else {
            return false;
        };
        *slot = contact;
        self.occupied += 1;
        true
    }

    /// The occupied contacts in slot order
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts[..self.occupied as usize]
    }

    pub fn contacts_mut(&mut self) -> &mut [Contact] {
        &mut self.contacts[..self.occupied as usize]
    }

    pub fn len(&self) -> usize {
        self.occupied as usize
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Set the reported contact count, clamped to the frame capacity
    pub fn set_contact_count(&mut self, count: u8) {
        self.contact_count = count.min(MAX_CONTACTS as u8);
    }
}
