use std::{
    error::Error,
    io::Write,
    sync::{Arc, Mutex},
};

use super::event::DispatchEvent;

/// Receives dispatch events in emission order. Implementations perform the
/// actual key or mouse injection and run on the dispatch consumer thread.
pub trait InjectionSink: Send + 'static {
    fn inject(&mut self, event: &DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Logs every event instead of injecting it
#[derive(Debug, Default)]
pub struct LogSink;

impl InjectionSink for LogSink {
    fn inject(&mut self, event: &DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        log::info!("{event}");
        Ok(())
    }
}

/// Writes every event as one JSON document per line
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send + 'static> {
    writer: W,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send + 'static> InjectionSink for JsonLinesSink<W> {
    fn inject(&mut self, event: &DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every event in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DispatchEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event received so far
    pub fn events(&self) -> Vec<DispatchEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl InjectionSink for MemorySink {
    fn inject(&mut self, event: &DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| format!("event buffer poisoned: {e}"))?;
        events.push(event.clone());
        Ok(())
    }
}
