use packed_struct::prelude::*;

/// Report ID that marks the start of a PTP-shaped touch report
pub const TOUCH_REPORT_ID: u8 = 0x05;
/// Size of the PTP-shaped touch structure, including the report ID
pub const TOUCH_REPORT_SIZE: usize = 50;
/// Size of a single contact slot
pub const SLOT_SIZE: usize = 9;
/// Maximum number of bytes to skip looking for the report ID. Some transports
/// prepend a vendor header of varying length.
pub const MARKER_SCAN_WINDOW: usize = 96;

// Device axis ranges. Asymmetric on purpose, this is the real sensor size.
pub const RAW_X_MAX: u16 = 14720;
pub const RAW_Y_MAX: u16 = 10240;

// The legacy layout is only trusted within twice the sensor size
pub const LEGACY_X_LIMIT: u16 = RAW_X_MAX * 2;
pub const LEGACY_Y_LIMIT: u16 = RAW_Y_MAX * 2;

// Official layout as seen on the wire. X/Y are taken from bytes 2..=5 of the
// slot, which is where they read cleanly; the nominal PTP field positions
// mix in unrelated state bits.
//
// 05 07 03 10 00 20 00 3c 02 00 .. .. .. .. .. .. .. .. .. .. .. .. .. ..
//    |  |  x---- y---- p  ph
//    |  flags
//    contact id
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct OfficialSlot {
    #[packed_field(bytes = "0")]
    pub contact_id: u8,
    #[packed_field(bytes = "1")]
    pub flags: u8,
    #[packed_field(bytes = "2..=3", endian = "lsb")]
    pub x: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "4..=5", endian = "lsb")]
    pub y: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "6")]
    pub pressure: u8,
    #[packed_field(bytes = "7")]
    pub phase: u8,
    #[packed_field(bytes = "8")]
    pub _unused8: u8,
}

impl Default for OfficialSlot {
    fn default() -> Self {
        Self {
            contact_id: 0,
            flags: 0,
            x: Integer::from_primitive(0),
            y: Integer::from_primitive(0),
            pressure: 0,
            phase: 0,
            _unused8: 0,
        }
    }
}

impl OfficialSlot {
    pub fn get_x(&self) -> u16 {
        self.x.to_primitive()
    }

    pub fn get_y(&self) -> u16 {
        self.y.to_primitive()
    }

    pub fn set_x(&mut self, value: u16) {
        self.x = Integer::from_primitive(value);
    }

    pub fn set_y(&mut self, value: u16) {
        self.y = Integer::from_primitive(value);
    }

    /// Returns true if every field of the slot is zero. Empty slots are
    /// padding, not contacts.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "50")]
pub struct OfficialReport {
    #[packed_field(bytes = "0")]
    pub report_id: u8,
    #[packed_field(bytes = "1..=9")]
    pub slot0: OfficialSlot,
    #[packed_field(bytes = "10..=18")]
    pub slot1: OfficialSlot,
    #[packed_field(bytes = "19..=27")]
    pub slot2: OfficialSlot,
    #[packed_field(bytes = "28..=36")]
    pub slot3: OfficialSlot,
    #[packed_field(bytes = "37..=45")]
    pub slot4: OfficialSlot,
    #[packed_field(bytes = "46..=47", endian = "lsb")]
    pub scan_time: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "48")]
    pub contact_count: u8,
    #[packed_field(bytes = "49")]
    pub button: u8,
}

impl Default for OfficialReport {
    fn default() -> Self {
        Self {
            report_id: TOUCH_REPORT_ID,
            slot0: OfficialSlot::default(),
            slot1: OfficialSlot::default(),
            slot2: OfficialSlot::default(),
            slot3: OfficialSlot::default(),
            slot4: OfficialSlot::default(),
            scan_time: Integer::from_primitive(0),
            contact_count: 0,
            button: 0,
        }
    }
}

impl OfficialReport {
    /// Slots in wire order
    pub fn slots(&self) -> [OfficialSlot; 5] {
        [self.slot0, self.slot1, self.slot2, self.slot3, self.slot4]
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut OfficialSlot> {
        match index {
            0 => Some(&mut self.slot0),
            1 => Some(&mut self.slot1),
            2 => Some(&mut self.slot2),
            3 => Some(&mut self.slot3),
            4 => Some(&mut self.slot4),
            _ => None,
        }
    }
}

// Native PTP packing of the same 9 bytes:
// 03 00 00 00 01 10 00 20 00
// |  id--------- x---- y----
// flags
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct LegacySlot {
    #[packed_field(bytes = "0")]
    pub flags: u8,
    #[packed_field(bytes = "1..=4", endian = "lsb")]
    pub contact_id: Integer<u32, packed_bits::Bits<32>>,
    #[packed_field(bytes = "5..=6", endian = "lsb")]
    pub x: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "7..=8", endian = "lsb")]
    pub y: Integer<u16, packed_bits::Bits<16>>,
}

impl Default for LegacySlot {
    fn default() -> Self {
        Self {
            flags: 0,
            contact_id: Integer::from_primitive(0),
            x: Integer::from_primitive(0),
            y: Integer::from_primitive(0),
        }
    }
}

impl LegacySlot {
    pub fn get_contact_id(&self) -> u32 {
        self.contact_id.to_primitive()
    }

    pub fn get_x(&self) -> u16 {
        self.x.to_primitive()
    }

    pub fn get_y(&self) -> u16 {
        self.y.to_primitive()
    }

    pub fn is_touching(&self) -> bool {
        self.flags & super::frame::ContactFlags::TIP_SWITCH != 0
    }
}

#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "50")]
pub struct LegacyReport {
    #[packed_field(bytes = "0")]
    pub report_id: u8,
    #[packed_field(bytes = "1..=9")]
    pub slot0: LegacySlot,
    #[packed_field(bytes = "10..=18")]
    pub slot1: LegacySlot,
    #[packed_field(bytes = "19..=27")]
    pub slot2: LegacySlot,
    #[packed_field(bytes = "28..=36")]
    pub slot3: LegacySlot,
    #[packed_field(bytes = "37..=45")]
    pub slot4: LegacySlot,
    #[packed_field(bytes = "46..=47", endian = "lsb")]
    pub scan_time: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "48")]
    pub contact_count: u8,
    #[packed_field(bytes = "49")]
    pub button: u8,
}

impl Default for LegacyReport {
    fn default() -> Self {
        Self {
            report_id: 0x01,
            slot0: LegacySlot::default(),
            slot1: LegacySlot::default(),
            slot2: LegacySlot::default(),
            slot3: LegacySlot::default(),
            slot4: LegacySlot::default(),
            scan_time: Integer::from_primitive(0),
            contact_count: 0,
            button: 0,
        }
    }
}

impl LegacyReport {
    pub fn slots(&self) -> [LegacySlot; 5] {
        [self.slot0, self.slot1, self.slot2, self.slot3, self.slot4]
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut LegacySlot> {
        match index {
            0 => Some(&mut self.slot0),
            1 => Some(&mut self.slot1),
            2 => Some(&mut self.slot2),
            3 => Some(&mut self.slot3),
            4 => Some(&mut self.slot4),
            _ => None,
        }
    }
}
