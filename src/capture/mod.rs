//! Versioned binary log of raw reports. A capture starts with a 32 byte file
//! header followed by records, each a 16 byte header and the raw payload.
//! Every multi-byte value is little-endian.
//!
//! ```text
//! file:   41 54 50 43 41 50 30 31  02 00  00 00  <left desc>  <right desc>  00 00 00 00
//!         magic "ATPCAP01"         ver    rsvd   4 x u16      4 x u16      reserved
//!
//! record: 01  02  00 00  32 00 00 00  e8 03 00 00 00 00 00 00  <payload>
//!         |   |   rsvd   payload len  timestamp (us)
//!         |   profile tag (0 auto, 1 official, 2 legacy, 3 apple_nine_byte)
//!         side hint (0 unknown, 1 left, 2 right)
//! ```

pub mod replay;

#[cfg(test)]
mod capture_test;

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use packed_struct::prelude::*;
use thiserror::Error;

use crate::{
    drivers::trackpad::{DecoderProfile, DeviceDescriptor},
    input::Side,
};

pub const MAGIC: [u8; 8] = *b"ATPCAP01";
pub const VERSION: u16 = 2;
pub const FILE_HEADER_SIZE: usize = 32;
pub const RECORD_HEADER_SIZE: usize = 16;
/// Larger payloads only show up in corrupt files
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to pack capture header: {0}")]
    Pack(#[from] PackingError),
    #[error("not a capture file, magic was {0:02x?}")]
    BadMagic([u8; 8]),
    #[error("unsupported capture version {0}")]
    UnsupportedVersion(u16),
    #[error("record {index} is truncated: {reason}")]
    Truncated { index: u64, reason: String },
    #[error("record {index} has an invalid {field}: {value}")]
    InvalidField {
        index: u64,
        field: &'static str,
        value: u32,
    },
    #[error("payload of {0} bytes is too large")]
    PayloadTooLarge(usize),
}

#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "32")]
pub struct PackedFileHeader {
    #[packed_field(bytes = "0..=7")]
    pub magic: [u8; 8],
    #[packed_field(bytes = "8..=9", endian = "lsb")]
    pub version: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "10..=11", endian = "lsb")]
    pub _reserved10: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "12..=13", endian = "lsb")]
    pub left_vendor_id: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "14..=15", endian = "lsb")]
    pub left_product_id: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "16..=17", endian = "lsb")]
    pub left_usage_page: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "18..=19", endian = "lsb")]
    pub left_usage: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "20..=21", endian = "lsb")]
    pub right_vendor_id: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "22..=23", endian = "lsb")]
    pub right_product_id: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "24..=25", endian = "lsb")]
    pub right_usage_page: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "26..=27", endian = "lsb")]
    pub right_usage: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "28..=31", endian = "lsb")]
    pub _reserved28: Integer<u32, packed_bits::Bits<32>>,
}

impl PackedFileHeader {
    pub fn new(left: DeviceDescriptor, right: DeviceDescriptor) -> Self {
        Self {
            magic: MAGIC,
            version: Integer::from_primitive(VERSION),
            _reserved10: Integer::from_primitive(0),
            left_vendor_id: Integer::from_primitive(left.vendor_id),
            left_product_id: Integer::from_primitive(left.product_id),
            left_usage_page: Integer::from_primitive(left.usage_page),
            left_usage: Integer::from_primitive(left.usage),
            right_vendor_id: Integer::from_primitive(right.vendor_id),
            right_product_id: Integer::from_primitive(right.product_id),
            right_usage_page: Integer::from_primitive(right.usage_page),
            right_usage: Integer::from_primitive(right.usage),
            _reserved28: Integer::from_primitive(0),
        }
    }

    pub fn left(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(
            self.left_vendor_id.to_primitive(),
            self.left_product_id.to_primitive(),
            self.left_usage_page.to_primitive(),
            self.left_usage.to_primitive(),
        )
    }

    pub fn right(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(
            self.right_vendor_id.to_primitive(),
            self.right_product_id.to_primitive(),
            self.right_usage_page.to_primitive(),
            self.right_usage.to_primitive(),
        )
    }
}

#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "16")]
pub struct PackedRecordHeader {
    #[packed_field(bytes = "0")]
    pub side_hint: u8,
    #[packed_field(bytes = "1")]
    pub profile: u8,
    #[packed_field(bytes = "2..=3", endian = "lsb")]
    pub _reserved2: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "4..=7", endian = "lsb")]
    pub payload_len: Integer<u32, packed_bits::Bits<32>>,
    #[packed_field(bytes = "8..=15", endian = "lsb")]
    pub timestamp_us: Integer<u64, packed_bits::Bits<64>>,
}

/// Identity of the capture: format version and the device on each side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureHeader {
    pub version: u16,
    pub left: DeviceDescriptor,
    pub right: DeviceDescriptor,
}

impl CaptureHeader {
    pub fn descriptor(&self, side: Side) -> DeviceDescriptor {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// One raw report as it was submitted to the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    /// None when the source had no side assigned
    pub side: Option<Side>,
    /// Profile that decoded the report, None if it was rejected
    pub profile: Option<DecoderProfile>,
    /// Microseconds since the capture started
    pub timestamp_us: u64,
    pub payload: Vec<u8>,
}

pub fn side_hint(side: Option<Side>) -> u8 {
    match side {
        None => 0,
        Some(Side::Left) => 1,
        Some(Side::Right) => 2,
    }
}

pub fn profile_tag(profile: Option<DecoderProfile>) -> u8 {
    match profile {
        None => 0,
        Some(DecoderProfile::Official) => 1,
        Some(DecoderProfile::Legacy) => 2,
        Some(DecoderProfile::AppleNineByte) => 3,
    }
}

fn side_from_hint(hint: u8, index: u64) -> Result<Option<Side>, CaptureError> {
    match hint {
        0 => Ok(None),
        1 => Ok(Some(Side::Left)),
        2 => Ok(Some(Side::Right)),
        value => Err(CaptureError::InvalidField {
            index,
            field: "side hint",
            value: value as u32,
        }),
    }
}

fn profile_from_tag(tag: u8, index: u64) -> Result<Option<DecoderProfile>, CaptureError> {
    match tag {
        0 => Ok(None),
        1 => Ok(Some(DecoderProfile::Official)),
        2 => Ok(Some(DecoderProfile::Legacy)),
        3 => Ok(Some(DecoderProfile::AppleNineByte)),
        value => Err(CaptureError::InvalidField {
            index,
            field: "profile tag",
            value: value as u32,
        }),
    }
}

/// Appends records to a capture
#[derive(Debug)]
pub struct CaptureWriter<W: Write> {
    writer: W,
    records: u64,
}

impl CaptureWriter<BufWriter<File>> {
    /// Create a new capture file, replacing any existing file
    pub fn create<P: AsRef<Path>>(
        path: P,
        left: DeviceDescriptor,
        right: DeviceDescriptor,
    ) -> Result<Self, CaptureError> {
        let file = File::create(path)?;
        CaptureWriter::new(BufWriter::new(file), left, right)
    }
}

impl<W: Write> CaptureWriter<W> {
    /// Start a capture by writing the file header
    pub fn new(mut writer: W, left: DeviceDescriptor, right: DeviceDescriptor) -> Result<Self, CaptureError> {
        let header = PackedFileHeader::new(left, right).pack()?;
        writer.write_all(&header)?;
        Ok(Self { writer, records: 0 })
    }

    pub fn append(
        &mut self,
        side: Option<Side>,
        profile: Option<DecoderProfile>,
        timestamp_us: u64,
        payload: &[u8],
    ) -> Result<(), CaptureError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CaptureError::PayloadTooLarge(payload.len()));
        }
        let header = PackedRecordHeader {
            side_hint: side_hint(side),
            profile: profile_tag(profile),
            _reserved2: Integer::from_primitive(0),
            payload_len: Integer::from_primitive(payload.len() as u32),
            timestamp_us: Integer::from_primitive(timestamp_us),
        };
        self.writer.write_all(&header.pack()?)?;
        self.writer.write_all(payload)?;
        self.records += 1;
        Ok(())
    }

    pub fn write_record(&mut self, record: &CaptureRecord) -> Result<(), CaptureError> {
        self.append(record.side, record.profile, record.timestamp_us, &record.payload)
    }

    /// Number of records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> Result<(), CaptureError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W, CaptureError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reads records from a capture in order
#[derive(Debug)]
pub struct CaptureReader<R: Read> {
    reader: R,
    header: CaptureHeader,
    index: u64,
    failed: bool,
}

impl CaptureReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let file = File::open(path)?;
        CaptureReader::new(BufReader::new(file))
    }
}

impl<R: Read> CaptureReader<R> {
    /// Read and validate the file header
    pub fn new(mut reader: R) -> Result<Self, CaptureError> {
        let mut buf = [0; FILE_HEADER_SIZE];
        let read = read_full(&mut reader, &mut buf)?;
        if read < FILE_HEADER_SIZE {
            return Err(CaptureError::Truncated {
                index: 0,
                reason: format!("file header has {read} of {FILE_HEADER_SIZE} bytes"),
            });
        }
        let header = PackedFileHeader::unpack(&buf)?;
        if header.magic != MAGIC {
            return Err(CaptureError::BadMagic(header.magic));
        }
        let version = header.version.to_primitive();
        if version != VERSION {
            return Err(CaptureError::UnsupportedVersion(version));
        }

        Ok(Self {
            reader,
            header: CaptureHeader {
                version,
                left: header.left(),
                right: header.right(),
            },
            index: 0,
            failed: false,
        })
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    /// Read the next record. Returns None at a clean end of file; a partial
    /// trailing record is an error.
    pub fn next_record(&mut self) -> Result<Option<CaptureRecord>, CaptureError> {
        let index = self.index;
        let mut buf = [0; RECORD_HEADER_SIZE];
        let read = read_full(&mut self.reader, &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        if read < RECORD_HEADER_SIZE {
            return Err(CaptureError::Truncated {
                index,
                reason: format!("header has {read} of {RECORD_HEADER_SIZE} bytes"),
            });
        }

        let header = PackedRecordHeader::unpack(&buf)?;
        let len = header.payload_len.to_primitive() as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(CaptureError::PayloadTooLarge(len));
        }
        let side = side_from_hint(header.side_hint, index)?;
        let profile = profile_from_tag(header.profile, index)?;

        let mut payload = vec![0; len];
        let read = read_full(&mut self.reader, &mut payload)?;
        if read < len {
            return Err(CaptureError::Truncated {
                index,
                reason: format!("payload has {read} of {len} bytes"),
            });
        }

        self.index += 1;
        Ok(Some(CaptureRecord {
            side,
            profile,
            timestamp_us: header.timestamp_us.to_primitive(),
            payload,
        }))
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<CaptureRecord, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill the buffer, stopping early only at end of file. Returns the number
/// of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, io::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
