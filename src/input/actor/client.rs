use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::{
    mpsc::{
        self,
        error::{SendTimeoutError, TrySendError},
    },
    oneshot, watch,
};

use crate::{
    config::{
        layout::{KeyLayout, Keymap},
        ConfigError, EngineConfig,
    },
    input::{dispatch::event::DropReason, engine::EngineSnapshot, metrics::Metrics},
    sync::{ReceiveTimeoutError, TimeoutReceiver},
};

use super::command::{EngineCommand, SourceReport};

/// Maximum duration to wait for a response from a command. If this timeout
/// is reached, that typically indicates a deadlock somewhere in the code.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Possible errors for an engine client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("frame queue is full, report from {0} dropped")]
    QueueFull(String),
    #[error("timed out waiting for the engine")]
    Timeout,
    #[error("engine rejected the request: {0}")]
    Config(#[from] ConfigError),
    #[error("engine is no longer running")]
    ChannelClosed,
}

/// A client for the [super::EngineActor]
#[derive(Debug, Clone)]
pub struct EngineClient {
    tx: mpsc::Sender<EngineCommand>,
    snapshot: watch::Receiver<Arc<EngineSnapshot>>,
    metrics: Arc<Metrics>,
}

impl EngineClient {
    pub fn new(
        tx: mpsc::Sender<EngineCommand>,
        snapshot: watch::Receiver<Arc<EngineSnapshot>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            tx,
            snapshot,
            metrics,
        }
    }

    /// Send the given command to the engine. This method uses a timeout to
    /// detect potential deadlocks.
    async fn send(&self, cmd: EngineCommand) -> Result<(), ClientError> {
        let result = self.tx.send_timeout(cmd, DEFAULT_TIMEOUT).await;
        let Err(err) = result else {
            return Ok(());
        };
        match err {
            SendTimeoutError::Timeout(ref cmd) => {
                log::error!("POSSIBLE DEADLOCK: timed out after {DEFAULT_TIMEOUT:?} sending command to engine: {cmd:?}");
                Err(ClientError::Timeout)
            }
            SendTimeoutError::Closed(_) => Err(ClientError::ChannelClosed),
        }
    }

    /// Wait for a reply from the engine
    async fn recv<T>(mut rx: oneshot::Receiver<T>, timeout: Duration) -> Result<T, ClientError>
    where
        T: Send + Sync,
    {
        match rx.recv_timeout(timeout).await {
            Ok(value) => Ok(value),
            Err(ReceiveTimeoutError::Timeout) => {
                log::error!("POSSIBLE DEADLOCK: timed out after {timeout:?} waiting for response from engine");
                Err(ClientError::Timeout)
            }
            Err(ReceiveTimeoutError::Closed) => Err(ClientError::ChannelClosed),
        }
    }

    /// Submit a raw report without blocking. Reports that do not fit in the
    /// frame queue are dropped and counted.
    pub fn submit_report(&self, report: SourceReport) -> Result<(), ClientError> {
        self.metrics.inc_report();
        match self.tx.try_send(EngineCommand::ProcessReport(report)) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full(EngineCommand::ProcessReport(report))) => {
                self.metrics.record_drop(DropReason::FrameQueueFull);
                log::warn!("Frame queue full, dropping report from {}", report.path);
                Err(ClientError::QueueFull(report.path))
            }
            Err(TrySendError::Full(_)) => Err(ClientError::QueueFull(String::new())),
            Err(TrySendError::Closed(_)) => Err(ClientError::ChannelClosed),
        }
    }

    /// Wait until every command submitted before this call has been
    /// processed
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        match tokio::time::timeout(timeout, self.tx.send(EngineCommand::WaitForIdle(tx))).await {
            Ok(Ok(_)) => (),
            Ok(Err(_)) => return Err(ClientError::ChannelClosed),
            Err(_) => return Err(ClientError::Timeout),
        }
        Self::recv(rx, timeout).await
    }

    /// Clear touch tables and intent modes on both sides
    pub async fn reset_state(&self) -> Result<(), ClientError> {
        self.send(EngineCommand::ResetState).await
    }

    /// Replace the engine configuration
    pub async fn reconfigure(&self, config: EngineConfig) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Reconfigure(Box::new(config), tx))
            .await?;
        Self::recv(rx, DEFAULT_TIMEOUT).await??;
        Ok(())
    }

    /// Replace the key layout and keymap
    pub async fn set_layout(&self, layout: KeyLayout, keymap: Keymap) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::SetLayout(Box::new((layout, keymap)), tx))
            .await?;
        Self::recv(rx, DEFAULT_TIMEOUT).await??;
        Ok(())
    }

    /// Latest published engine snapshot
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified whenever a new snapshot is published
    pub fn subscribe(&self) -> watch::Receiver<Arc<EngineSnapshot>> {
        self.snapshot.clone()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop the engine
    pub async fn stop(&self) -> Result<(), ClientError> {
        self.send(EngineCommand::Stop).await
    }
}
