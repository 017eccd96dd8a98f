use std::time::Instant;

use tokio::sync::oneshot;

use crate::{
    config::{
        layout::{KeyLayout, Keymap},
        ConfigError, EngineConfig,
    },
    drivers::trackpad::DeviceDescriptor,
    input::Side,
};

/// One raw report as read from a device
#[derive(Debug, Clone)]
pub struct SourceReport {
    /// Device path the report was read from
    pub path: String,
    /// Side assigned by the source, if any. Falls back to the configured
    /// side for the path.
    pub side: Option<Side>,
    pub descriptor: DeviceDescriptor,
    pub bytes: Vec<u8>,
    pub received: Instant,
}

impl SourceReport {
    pub fn new(path: &str, side: Option<Side>, descriptor: DeviceDescriptor, bytes: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            side,
            descriptor,
            bytes: bytes.to_vec(),
            received: Instant::now(),
        }
    }
}

/// Commands define all the different ways to interact with the
/// [super::EngineActor] over a channel. Commands are processed one at a time
/// in the order they were sent.
#[derive(Debug)]
pub enum EngineCommand {
    ProcessReport(SourceReport),
    /// Replies once every command sent before it has been processed
    WaitForIdle(oneshot::Sender<()>),
    ResetState,
    Reconfigure(Box<EngineConfig>, oneshot::Sender<Result<(), ConfigError>>),
    SetLayout(
        Box<(KeyLayout, Keymap)>,
        oneshot::Sender<Result<(), ConfigError>>,
    ),
    Stop,
}
