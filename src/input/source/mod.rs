pub mod hidraw;


use std::{error::Error, ffi::NulError};

use thiserror::Error;

use crate::drivers::trackpad::DeviceDescriptor;

/// Possible errors for a raw input source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("invalid device path: {0}")]
    InvalidPath(#[from] NulError),
    #[error("hidapi error: {0}")]
    Hid(#[from] hidapi::HidError),
    #[error("failed to read from device: {0}")]
    Read(Box<dyn Error + Send + Sync>),
    #[error("source thread failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A device that produces raw input reports. Reads block for at most the
/// given timeout and return the number of bytes read, zero on timeout.
pub trait ReportDevice: Send {
    fn descriptor(&self) -> DeviceDescriptor;
    fn read(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, SourceError>;
}
