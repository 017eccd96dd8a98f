use std::{collections::HashMap, fmt};

use packed_struct::{types::SizedInteger, PackedStruct};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    apple,
    frame::{Contact, ContactFlags, Frame, RawReport, MAX_CONTACTS},
    hid_report::{
        LegacyReport, OfficialReport, LEGACY_X_LIMIT, LEGACY_Y_LIMIT, MARKER_SCAN_WINDOW,
        RAW_X_MAX, RAW_Y_MAX, TOUCH_REPORT_ID, TOUCH_REPORT_SIZE,
    },
    identity,
};

/// Default width of the engine coordinate space
pub const DEFAULT_TARGET_MAX_X: u16 = 7612;
/// Default height of the engine coordinate space
pub const DEFAULT_TARGET_MAX_Y: u16 = 5065;

/// Legacy contact ids at or above this value with a zero low byte are
/// bit-packed garbage, not real identities
const PACKED_ID_THRESHOLD: u32 = 1 << 24;

/// The strategy used to interpret a device's reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecoderProfile {
    Official,
    Legacy,
    AppleNineByte,
}

impl DecoderProfile {
    /// Order in which profiles are tried in auto mode
    pub const AUTO_ORDER: [DecoderProfile; 3] = [
        DecoderProfile::Official,
        DecoderProfile::Legacy,
        DecoderProfile::AppleNineByte,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecoderProfile::Official => "official",
            DecoderProfile::Legacy => "legacy",
            DecoderProfile::AppleNineByte => "apple_nine_byte",
        }
    }
}

impl fmt::Display for DecoderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which profile(s) the decoder may use for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProfilePreference {
    /// Try every profile in order and keep the first that validates
    #[default]
    Auto,
    Official,
    Legacy,
    AppleNineByte,
}

impl ProfilePreference {
    /// Returns the forced profile, or None for auto
    pub fn forced(&self) -> Option<DecoderProfile> {
        match self {
            ProfilePreference::Auto => None,
            ProfilePreference::Official => Some(DecoderProfile::Official),
            ProfilePreference::Legacy => Some(DecoderProfile::Legacy),
            ProfilePreference::AppleNineByte => Some(DecoderProfile::AppleNineByte),
        }
    }
}

impl From<DecoderProfile> for ProfilePreference {
    fn from(profile: DecoderProfile) -> Self {
        match profile {
            DecoderProfile::Official => ProfilePreference::Official,
            DecoderProfile::Legacy => ProfilePreference::Legacy,
            DecoderProfile::AppleNineByte => ProfilePreference::AppleNineByte,
        }
    }
}

impl fmt::Display for ProfilePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.forced() {
            Some(profile) => write!(f, "{profile}"),
            None => write!(f, "auto"),
        }
    }
}

/// Why a single profile refused a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    TooShort { len: usize, needed: usize },
    MarkerNotFound,
    TooManyContacts(u8),
    NoLiveContacts,
    OutOfBounds { slot: usize, x: u16, y: u16 },
    ContactCountMismatch { declared: u8, observed: u8 },
    UnsupportedDevice { vendor_id: u16, product_id: u16 },
    Unpack(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TooShort { len, needed } => {
                write!(f, "report too short: {len}/{needed} bytes")
            }
            RejectReason::MarkerNotFound => write!(f, "report id marker not found"),
            RejectReason::TooManyContacts(count) => write!(f, "too many contacts: {count}"),
            RejectReason::NoLiveContacts => write!(f, "contacts reported but all slots empty"),
            RejectReason::OutOfBounds { slot, x, y } => {
                write!(f, "slot {slot} out of bounds: ({x}, {y})")
            }
            RejectReason::ContactCountMismatch { declared, observed } => write!(
                f,
                "declared {declared} contacts but {observed} are touching"
            ),
            RejectReason::UnsupportedDevice {
                vendor_id,
                product_id,
            } => write!(f, "unsupported device {vendor_id:04x}:{product_id:04x}"),
            RejectReason::Unpack(err) => write!(f, "unable to unpack: {err}"),
        }
    }
}

impl std::error::Error for RejectReason {}

/// No attempted profile could decode the report. This is an expected outcome
/// for noise and unrelated reports, not a fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("report rejected by {}", describe_attempts(.attempts))]
pub struct DecodeRejected {
    pub attempts: Vec<(DecoderProfile, RejectReason)>,
}

fn describe_attempts(attempts: &[(DecoderProfile, RejectReason)]) -> String {
    attempts
        .iter()
        .map(|(profile, reason)| format!("{profile} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A successfully decoded frame and the profile that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub frame: Frame,
    pub profile: DecoderProfile,
}

/// Target coordinate space that every profile rescales into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpace {
    pub max_x: u16,
    pub max_y: u16,
}

impl Default for TargetSpace {
    fn default() -> Self {
        Self {
            max_x: DEFAULT_TARGET_MAX_X,
            max_y: DEFAULT_TARGET_MAX_Y,
        }
    }
}

/// Clamp a raw axis value to the sensor range and rescale it, rounding to
/// the nearest target unit
pub fn rescale(value: u16, raw_max: u16, target_max: u16) -> u16 {
    let value = value.min(raw_max) as u32;
    let raw_max = raw_max as u32;
    ((value * target_max as u32 + raw_max / 2) / raw_max) as u16
}

/// Stateless report decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    target: TargetSpace,
}

impl Decoder {
    pub fn new(target: TargetSpace) -> Self {
        Self { target }
    }

    pub fn target(&self) -> TargetSpace {
        self.target
    }

    /// Decode the report using the given preference. In auto mode the
    /// profiles are tried in [DecoderProfile::AUTO_ORDER]; a forced profile
    /// is the only one tried.
    pub fn decode(
        &self,
        report: RawReport,
        arrival_timestamp: u64,
        preference: ProfilePreference,
    ) -> Result<Decoded, DecodeRejected> {
        let mut attempts = Vec::new();
        if let Some(profile) = preference.forced() {
            return match self.decode_with(profile, report, arrival_timestamp, true) {
                Ok(frame) => Ok(Decoded { frame, profile }),
                Err(reason) => {
                    attempts.push((profile, reason));
                    Err(DecodeRejected { attempts })
                }
            };
        }

        for profile in DecoderProfile::AUTO_ORDER {
            match self.decode_with(profile, report, arrival_timestamp, false) {
                Ok(frame) => return Ok(Decoded { frame, profile }),
                Err(reason) => attempts.push((profile, reason)),
            }
        }

        Err(DecodeRejected { attempts })
    }

    /// Decode the report with a single profile. When `forced` is false the
    /// Apple profile only accepts the USB-C product.
    pub fn decode_with(
        &self,
        profile: DecoderProfile,
        report: RawReport,
        arrival_timestamp: u64,
        forced: bool,
    ) -> Result<Frame, RejectReason> {
        let mut frame = match profile {
            DecoderProfile::Official => self.decode_official(report.bytes, arrival_timestamp)?,
            DecoderProfile::Legacy => self.decode_legacy(report.bytes, arrival_timestamp)?,
            DecoderProfile::AppleNineByte => {
                let descriptor = report.descriptor;
                if !forced
                    && (descriptor.vendor_id != apple::VID
                        || descriptor.product_id != apple::PID_USB_C)
                {
                    return Err(RejectReason::UnsupportedDevice {
                        vendor_id: descriptor.vendor_id,
                        product_id: descriptor.product_id,
                    });
                }
                if report.bytes.len() < apple::MIN_PAYLOAD_SIZE {
                    return Err(RejectReason::TooShort {
                        len: report.bytes.len(),
                        needed: apple::MIN_PAYLOAD_SIZE,
                    });
                }
                apple::decode(
                    report.bytes,
                    arrival_timestamp,
                    self.target.max_x,
                    self.target.max_y,
                )
                .ok_or(RejectReason::NoLiveContacts)?
            }
        };

        identity::stabilize(&mut frame);
        Ok(frame)
    }

    /// Locate the report id marker and parse the structure that follows it.
    /// A marker is only a candidate if a full structure fits after it; the
    /// first candidate that validates wins.
    fn decode_official(&self, bytes: &[u8], arrival_timestamp: u64) -> Result<Frame, RejectReason> {
        let Some(last_start) = bytes.len().checked_sub(TOUCH_REPORT_SIZE) else {
            return Err(RejectReason::TooShort {
                len: bytes.len(),
                needed: TOUCH_REPORT_SIZE,
            });
        };

        let mut first_error = None;
        let end = last_start.min(MARKER_SCAN_WINDOW - 1);
        for start in 0..=end {
            if bytes[start] != TOUCH_REPORT_ID {
                continue;
            }
            if start > 0 {
                log::trace!("Found report id marker at offset {start}");
            }
            match self.parse_official(&bytes[start..start + TOUCH_REPORT_SIZE], arrival_timestamp)
            {
                Ok(frame) => return Ok(frame),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        Err(first_error.unwrap_or(RejectReason::MarkerNotFound))
    }

    fn parse_official(&self, bytes: &[u8], arrival_timestamp: u64) -> Result<Frame, RejectReason> {
        let buf: [u8; TOUCH_REPORT_SIZE] = bytes
            .try_into()
            .map_err(|_| RejectReason::TooShort {
                len: bytes.len(),
                needed: TOUCH_REPORT_SIZE,
            })?;
        let report =
            OfficialReport::unpack(&buf).map_err(|e| RejectReason::Unpack(e.to_string()))?;

        let count = report.contact_count;
        if count as usize > MAX_CONTACTS {
            return Err(RejectReason::TooManyContacts(count));
        }

        let mut frame = Frame::new(report.report_id, arrival_timestamp);
        frame.set_contact_count(count);
        frame.scan_time = report.scan_time.to_primitive();
        frame.is_button_clicked = report.button & 0x01 != 0;

        for slot in report.slots().iter().take(count as usize) {
            if slot.is_empty() {
                continue;
            }
            frame.push(Contact {
                id: slot.contact_id,
                x: rescale(slot.get_x(), RAW_X_MAX, self.target.max_x),
                y: rescale(slot.get_y(), RAW_Y_MAX, self.target.max_y),
                // The tip/confidence source bits are not trusted yet
                flags: ContactFlags(slot.flags).with_touching(),
                pressure: Some(slot.pressure),
                phase: Some(slot.phase),
            });
        }

        if count > 0 && frame.is_empty() {
            return Err(RejectReason::NoLiveContacts);
        }

        Ok(frame)
    }

    fn decode_legacy(&self, bytes: &[u8], arrival_timestamp: u64) -> Result<Frame, RejectReason> {
        let Some(bytes) = bytes.get(..TOUCH_REPORT_SIZE) else {
            return Err(RejectReason::TooShort {
                len: bytes.len(),
                needed: TOUCH_REPORT_SIZE,
            });
        };
        let buf: [u8; TOUCH_REPORT_SIZE] = bytes
            .try_into()
            .map_err(|_| RejectReason::TooShort {
                len: bytes.len(),
                needed: TOUCH_REPORT_SIZE,
            })?;
        let report = LegacyReport::unpack(&buf).map_err(|e| RejectReason::Unpack(e.to_string()))?;

        let declared = report.contact_count.min(MAX_CONTACTS as u8);
        let slots = report.slots();

        // Every touching contact has to be somewhere near the sensor
        let mut observed = 0u8;
        for (idx, slot) in slots.iter().enumerate() {
            if !slot.is_touching() {
                continue;
            }
            let (x, y) = (slot.get_x(), slot.get_y());
            if x > LEGACY_X_LIMIT || y > LEGACY_Y_LIMIT {
                return Err(RejectReason::OutOfBounds { slot: idx, x, y });
            }
            observed += 1;
        }

        let consistent = match declared {
            0 => observed == 0,
            n => observed >= 1 && observed <= n,
        };
        if !consistent {
            return Err(RejectReason::ContactCountMismatch { declared, observed });
        }

        // Some firmware packs state into the upper bytes of the id. Those
        // values are huge and change every frame, so fall back to the slot.
        let touching = || slots.iter().filter(|s| s.is_touching());
        let packed = observed > 0
            && touching().all(|s| s.get_contact_id() & 0xff == 0)
            && touching().any(|s| s.get_contact_id() >= PACKED_ID_THRESHOLD);
        if packed {
            log::trace!("Legacy report uses packed contact ids, using slot index");
        }

        let mut frame = Frame::new(report.report_id, arrival_timestamp);
        frame.set_contact_count(declared);
        frame.scan_time = report.scan_time.to_primitive();
        frame.is_button_clicked = report.button & 0x01 != 0;

        for (idx, slot) in slots.iter().enumerate() {
            if !slot.is_touching() {
                continue;
            }
            let raw_id = slot.get_contact_id();
            let id = match u8::try_from(raw_id) {
                Ok(id) if !packed => id,
                _ => idx as u8,
            };
            frame.push(Contact {
                id,
                x: rescale(slot.get_x(), RAW_X_MAX, self.target.max_x),
                y: rescale(slot.get_y(), RAW_Y_MAX, self.target.max_y),
                flags: ContactFlags(slot.flags),
                pressure: None,
                phase: None,
            });
        }

        Ok(frame)
    }
}

/// Remembers which profile decoded each device path so later reports from
/// the same device try it first
#[derive(Debug, Default)]
pub struct ProfileCache {
    entries: HashMap<String, DecoderProfile>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached profile for the given device path
    pub fn get(&self, path: &str) -> Option<DecoderProfile> {
        self.entries.get(path).copied()
    }

    /// Forget every cached profile
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Decode a report from the given device path. Forced preferences bypass
    /// the cache. In auto mode the cached profile is tried first; if it
    /// rejects, the rest of the chain is tried for this report only.
    pub fn decode(
        &mut self,
        decoder: &Decoder,
        path: &str,
        report: RawReport,
        arrival_timestamp: u64,
        preference: ProfilePreference,
    ) -> Result<Decoded, DecodeRejected> {
        if preference.forced().is_some() {
            return decoder.decode(report, arrival_timestamp, preference);
        }

        let Some(cached) = self.get(path) else {
            let decoded = decoder.decode(report, arrival_timestamp, preference)?;
            log::debug!("Using {} decoder profile for {path}", decoded.profile);
            self.entries.insert(path.to_string(), decoded.profile);
            return Ok(decoded);
        };

        let mut attempts = Vec::new();
        match decoder.decode_with(cached, report, arrival_timestamp, false) {
            Ok(frame) => {
                return Ok(Decoded {
                    frame,
                    profile: cached,
                })
            }
            Err(reason) => attempts.push((cached, reason)),
        }
        for profile in DecoderProfile::AUTO_ORDER {
            if profile == cached {
                continue;
            }
            match decoder.decode_with(profile, report, arrival_timestamp, false) {
                Ok(frame) => return Ok(Decoded { frame, profile }),
                Err(reason) => attempts.push((profile, reason)),
            }
        }

        Err(DecodeRejected { attempts })
    }
}
