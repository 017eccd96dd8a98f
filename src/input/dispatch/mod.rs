pub mod event;
pub mod sink;


use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::input::metrics::Metrics;

use event::{DispatchEvent, DropReason};
use sink::InjectionSink;

/// Possible errors when enqueueing a dispatch event
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatch queue is full, dropped: {0}")]
    QueueFull(DispatchEvent),
    #[error("dispatch consumer has stopped")]
    Closed,
}

/// Producer half of the dispatch pipeline. Enqueueing never blocks; events
/// that do not fit are dropped and counted.
#[derive(Debug)]
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchEvent>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn dispatch(&self, event: DispatchEvent) -> Result<(), DispatchError> {
        match self.tx.try_send(event) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full(event)) => {
                self.metrics.record_drop(DropReason::EngineQueueFull);
                log::warn!("Dispatch queue full, dropping {event}");
                Err(DispatchError::QueueFull(event))
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }
}

/// Consumer half of the dispatch pipeline. Owns the thread that hands
/// events to the [InjectionSink].
#[derive(Debug)]
pub struct DispatchConsumer {
    task: JoinHandle<u64>,
}

impl DispatchConsumer {
    /// Wait for the consumer to drain the queue and stop. The queue closes
    /// once the [Dispatcher] is dropped. Returns the number of events that
    /// were injected.
    pub async fn join(self) -> u64 {
        match self.task.await {
            Ok(delivered) => delivered,
            Err(e) => {
                log::error!("Dispatch consumer failed: {e}");
                0
            }
        }
    }
}

/// Create the dispatch queue and start its consumer. Must be called from
/// within a tokio runtime.
pub fn start<S: InjectionSink>(
    capacity: usize,
    mut sink: S,
    metrics: Arc<Metrics>,
) -> (Dispatcher, DispatchConsumer) {
    let (tx, mut rx) = mpsc::channel::<DispatchEvent>(capacity.max(1));

    let consumer_metrics = metrics.clone();
    let task = tokio::task::spawn_blocking(move || {
        log::debug!("Dispatch consumer started");
        let mut delivered = 0;
        while let Some(event) = rx.blocking_recv() {
            if let Err(e) = sink.inject(&event) {
                log::error!("Failed to inject {event}: {e}");
                continue;
            }
            consumer_metrics.inc_dispatched();
            delivered += 1;
        }
        log::debug!("Dispatch consumer stopped after {delivered} events");
        delivered
    });

    (Dispatcher { tx, metrics }, DispatchConsumer { task })
}
