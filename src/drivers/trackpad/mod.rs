pub mod apple;
pub mod decoder;
pub mod frame;
pub mod hid_report;
pub mod identity;

pub use decoder::{
    DecodeRejected, Decoded, Decoder, DecoderProfile, ProfileCache, ProfilePreference,
    RejectReason, TargetSpace,
};
pub use frame::{hex_prefix, Contact, ContactFlags, DeviceDescriptor, Frame, RawReport, MAX_CONTACTS};
