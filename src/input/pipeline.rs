use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::input::{
    actor::{client::EngineClient, CaptureSink, EngineActor},
    dispatch::{self, sink::InjectionSink, DispatchConsumer},
    engine::Engine,
    metrics::{Metrics, MetricsSnapshot},
};

/// A running engine actor and dispatch consumer
pub struct Pipeline {
    client: EngineClient,
    metrics: Arc<Metrics>,
    actor: JoinHandle<()>,
    consumer: DispatchConsumer,
}

impl Pipeline {
    /// Start the dispatch consumer and the engine actor. Must be called from
    /// within a tokio runtime.
    pub fn start<S: InjectionSink>(engine: Engine, sink: S, capture: Option<CaptureSink>) -> Self {
        let metrics = Arc::new(Metrics::new());
        let capacity = engine.config().queues.dispatch_capacity;
        let (dispatcher, consumer) = dispatch::start(capacity, sink, metrics.clone());

        let actor = EngineActor::new(engine, dispatcher, metrics.clone(), capture);
        let client = actor.client();
        let actor = tokio::spawn(actor.run());
        log::info!("Pipeline started");

        Self {
            client,
            metrics,
            actor,
            consumer,
        }
    }

    pub fn client(&self) -> EngineClient {
        self.client.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the actor, wait for it to exit, then drain the dispatch queue and
    /// join its consumer. Returns the final metrics.
    pub async fn shutdown(self) -> MetricsSnapshot {
        if let Err(e) = self.client.stop().await {
            log::debug!("Engine actor already stopped: {e}");
        }
        if let Err(e) = self.actor.await {
            log::error!("Engine actor failed: {e}");
        }
        // The actor owned the only dispatcher, so the queue is closed now
        let delivered = self.consumer.join().await;
        log::info!("Pipeline stopped, {delivered} events dispatched");
        self.metrics.snapshot()
    }
}
