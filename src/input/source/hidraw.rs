use std::{
    ffi::CString,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use hidapi::{HidApi, HidDevice};
use tokio::task::JoinHandle;

use crate::{
    drivers::trackpad::DeviceDescriptor,
    input::{
        actor::{
            client::{ClientError, EngineClient},
            command::SourceReport,
        },
        Side,
    },
};

use super::{ReportDevice, SourceError};

/// How long a single read may block. Bounds how quickly a stop request is
/// noticed.
pub const READ_TIMEOUT_MS: i32 = 10;
/// Large enough for every report the trackpads send
const REPORT_BUFFER_SIZE: usize = 256;

/// A trackpad opened through hidraw
pub struct HidRawDevice {
    device: HidDevice,
    descriptor: DeviceDescriptor,
}

impl HidRawDevice {
    pub fn open(path: &str) -> Result<Self, SourceError> {
        let c_path = CString::new(path)?;
        let api = HidApi::new()?;
        let device = api.open_path(&c_path)?;
        let info = device.get_device_info()?;
        let descriptor = DeviceDescriptor::new(
            info.vendor_id(),
            info.product_id(),
            info.usage_page(),
            info.usage(),
        );
        log::info!(
            "Opened {path}: {:04x}:{:04x} {}",
            descriptor.vendor_id,
            descriptor.product_id,
            info.product_string().unwrap_or("unknown product")
        );

        Ok(Self { device, descriptor })
    }
}

impl ReportDevice for HidRawDevice {
    fn descriptor(&self) -> DeviceDescriptor {
        self.descriptor
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, SourceError> {
        Ok(self.device.read_timeout(buf, timeout_ms)?)
    }
}

/// Producer that reads raw reports from one device on a blocking thread and
/// submits them to the engine without ever waiting on it
pub struct HidRawSource {
    path: String,
    running: Arc<AtomicBool>,
    task: JoinHandle<Result<u64, SourceError>>,
}

impl HidRawSource {
    /// Open the hidraw device at the given path and start reading from it
    pub fn open(path: &str, side: Option<Side>, client: EngineClient) -> Result<Self, SourceError> {
        let device = HidRawDevice::open(path)?;
        Ok(Self::start(path, side, device, client))
    }

    /// Start reading from the given device. Must be called from within a
    /// tokio runtime.
    pub fn start<D>(path: &str, side: Option<Side>, mut device: D, client: EngineClient) -> Self
    where
        D: ReportDevice + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let task_running = running.clone();
        let device_path = path.to_string();

        let task = tokio::task::spawn_blocking(move || -> Result<u64, SourceError> {
            log::debug!("Reading reports from {device_path}");
            let descriptor = device.descriptor();
            let mut buf = [0; REPORT_BUFFER_SIZE];
            let mut submitted = 0;
            while task_running.load(Ordering::Relaxed) {
                let bytes_read = match device.read(&mut buf, READ_TIMEOUT_MS) {
                    Ok(n) => n,
                    Err(e) => {
                        log::error!("Failed to read from {device_path}: {e}");
                        return Err(e);
                    }
                };
                if bytes_read == 0 {
                    continue;
                }

                let report = SourceReport::new(&device_path, side, descriptor, &buf[..bytes_read]);
                match client.submit_report(report) {
                    Ok(_) => submitted += 1,
                    // Already counted and logged by the client
                    Err(ClientError::QueueFull(_)) => (),
                    Err(ClientError::ChannelClosed) => {
                        log::debug!("Engine stopped, closing {device_path}");
                        break;
                    }
                    Err(e) => log::warn!("Failed to submit report from {device_path}: {e}"),
                }
            }
            log::debug!("Stopped reading {device_path} after {submitted} reports");
            Ok(submitted)
        });

        Self {
            path: path.to_string(),
            running,
            task,
        }
    }

    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// Ask the reader thread to stop after its current read
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Wait for the reader thread to exit. Returns the number of reports
    /// that were submitted.
    pub async fn join(self) -> Result<u64, SourceError> {
        self.task.await?
    }
}
