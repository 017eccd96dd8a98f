pub mod client;
pub mod command;
pub mod fault;


use std::{
    any::Any,
    io::Write,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{mpsc, watch};

use crate::{
    capture::CaptureWriter,
    config::{
        layout::{KeyLayout, Keymap},
        ConfigError, EngineConfig,
    },
    drivers::trackpad::{hex_prefix, Decoder, DecoderProfile, ProfileCache, RawReport},
    input::{
        dispatch::{event::DropReason, DispatchError, Dispatcher},
        engine::{Engine, EngineOutput, EngineSnapshot, TICK_INTERVAL_US},
        metrics::Metrics,
        Side,
    },
};

use client::EngineClient;
use command::{EngineCommand, SourceReport};
use fault::{FaultGovernor, RuntimeFault};

/// How often the engine is advanced when no reports arrive
pub const TICK_INTERVAL: Duration = Duration::from_micros(TICK_INTERVAL_US);
/// Number of payload bytes included in fault logs
const FAULT_PREFIX_LEN: usize = 16;

/// Capture sink the actor tees raw reports into
pub type CaptureSink = CaptureWriter<Box<dyn Write + Send>>;

/// Single writer of the [Engine]. Decodes raw reports, applies them to the
/// engine and forwards dispatch events, one command at a time.
pub struct EngineActor {
    engine: Engine,
    decoder: Decoder,
    profiles: ProfileCache,
    faults: FaultGovernor,
    capture: Option<CaptureSink>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    snapshot: watch::Sender<Arc<EngineSnapshot>>,
    tx: mpsc::Sender<EngineCommand>,
    rx: mpsc::Receiver<EngineCommand>,
    epoch: Instant,
    report_index: u64,
}

impl EngineActor {
    pub fn new(
        engine: Engine,
        dispatcher: Dispatcher,
        metrics: Arc<Metrics>,
        capture: Option<CaptureSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(engine.config().queues.frame_capacity.max(1));
        let (snapshot, _) = watch::channel(Arc::new(engine.snapshot()));
        Self {
            decoder: Decoder::new(engine.config().decoder.target()),
            engine,
            profiles: ProfileCache::new(),
            faults: FaultGovernor::new(),
            capture,
            dispatcher,
            metrics,
            snapshot,
            tx,
            rx,
            epoch: Instant::now(),
            report_index: 0,
        }
    }

    /// Returns a client to communicate with the running actor
    pub fn client(&self) -> EngineClient {
        EngineClient::new(
            self.tx.clone(),
            self.snapshot.subscribe(),
            self.metrics.clone(),
        )
    }

    /// Process commands until [EngineCommand::Stop] is received or every
    /// client is gone. The engine is advanced every [TICK_INTERVAL] so that
    /// timeouts fire without new reports.
    pub async fn run(mut self) {
        log::debug!("Engine actor started");
        // Clients hold the only senders from here on
        let (closed, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.tx, closed));

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else {
                        log::debug!("All engine clients dropped");
                        break;
                    };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                _ = interval.tick() => self.tick(),
            }
        }

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.flush() {
                log::error!("Failed to flush capture: {e}");
            }
            log::info!("Captured {} reports", capture.records());
        }
        log::debug!("Engine actor stopped");
    }

    /// Handle one command. Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::ProcessReport(report) => self.process_report(report),
            EngineCommand::WaitForIdle(reply) => {
                let _ = reply.send(());
            }
            EngineCommand::ResetState => {
                self.engine.reset_state();
                self.publish();
            }
            EngineCommand::Reconfigure(config, reply) => {
                let result = self.reconfigure(*config);
                if let Err(e) = reply.send(result) {
                    log::error!("Failed to send reconfigure result: {e:?}");
                }
            }
            EngineCommand::SetLayout(layout, reply) => {
                let (layout, keymap) = *layout;
                let result = self.set_layout(layout, keymap);
                if let Err(e) = reply.send(result) {
                    log::error!("Failed to send layout result: {e:?}");
                }
            }
            EngineCommand::Stop => {
                log::debug!("Stopping engine actor");
                return false;
            }
        }
        true
    }

    fn reconfigure(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        let target = config.decoder.target();
        self.engine.reconfigure(config)?;
        if target != self.decoder.target() {
            self.decoder = Decoder::new(target);
        }
        self.profiles.clear();
        self.publish();
        Ok(())
    }

    fn set_layout(&mut self, layout: KeyLayout, keymap: Keymap) -> Result<(), ConfigError> {
        self.engine.set_layout(layout, keymap)?;
        self.publish();
        Ok(())
    }

    /// Microseconds since the actor was created
    fn elapsed_us(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_micros() as u64
    }

    fn tick(&mut self) {
        let now = self.elapsed_us(Instant::now());
        self.advance_to(now);
    }

    /// Run the scheduled engine ticks up to `now`
    fn advance_to(&mut self, now: u64) {
        let output = self.engine.advance_to(now);
        if !output.is_empty() {
            self.handle_output(output);
        }
    }

    fn process_report(&mut self, report: SourceReport) {
        let index = self.report_index;
        self.report_index += 1;
        // A report is never applied before a tick that already ran, and every
        // tick up to its time runs first. Captures record this time so replay
        // sees the same order.
        let now = self
            .elapsed_us(report.received)
            .max(self.engine.last_tick_us());
        self.advance_to(now);

        if self.faults.in_cooldown(now) {
            self.metrics.record_drop(DropReason::Cooldown);
            log::warn!("Dropping report {index} from {} during fault cooldown", report.path);
            return;
        }

        let side_hint = report
            .side
            .or_else(|| self.engine.config().decoder.side_for(&report.path));
        let side = side_hint.unwrap_or(Side::Left);
        let result = self.guarded(&report, index, now, |actor| {
            actor.decode_and_apply(&report, side_hint, side, now)
        });
        if let Some(output) = result {
            self.faults.record_success();
            if let Some(output) = output {
                self.handle_output(output);
            }
        }
    }

    /// Decode the report and apply it to the engine. Returns None if no
    /// profile accepted the report.
    fn decode_and_apply(
        &mut self,
        report: &SourceReport,
        side_hint: Option<Side>,
        side: Side,
        now: u64,
    ) -> Option<EngineOutput> {
        let preference = self.engine.config().decoder.profile_for(&report.path);
        let raw = RawReport::new(&report.bytes, report.descriptor);
        let decoded = self
            .profiles
            .decode(&self.decoder, &report.path, raw, now, preference);

        let profile = decoded.as_ref().ok().map(|decoded| decoded.profile);
        self.tee(side_hint, profile, now, &report.bytes);

        match decoded {
            Ok(decoded) => {
                self.metrics.inc_decoded();
                log::trace!("{side} frame from {}: {:?}", report.path, decoded.frame);
                Some(self.engine.apply(side, &decoded.frame))
            }
            Err(e) => {
                self.metrics.inc_rejected();
                log::debug!(
                    "Rejected report from {} ({}): {e}",
                    report.path,
                    hex_prefix(&report.bytes, FAULT_PREFIX_LEN)
                );
                None
            }
        }
    }

    /// Run the given closure, containing any panic it raises. A panic is
    /// logged as a [RuntimeFault], clears the engine state and counts
    /// towards a cooldown.
    fn guarded<T>(
        &mut self,
        report: &SourceReport,
        index: u64,
        now: u64,
        f: impl FnOnce(&mut Self) -> T,
    ) -> Option<T> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        let payload = match result {
            Ok(value) => return Some(value),
            Err(payload) => payload,
        };

        let fault = RuntimeFault::Panicked {
            path: report.path.clone(),
            index,
            prefix: hex_prefix(&report.bytes, FAULT_PREFIX_LEN),
            message: panic_message(payload.as_ref()),
        };
        log::error!("{fault}");
        self.metrics.inc_fault();
        self.engine.reset_state();
        self.publish();
        if self.faults.record(now) {
            log::error!(
                "Repeated faults, ignoring raw input for {}ms",
                fault::COOLDOWN_US / 1000
            );
        }
        None
    }

    /// Append the raw report to the capture, if one is active. A failing
    /// capture is closed so it does not fail on every report.
    fn tee(&mut self, side: Option<Side>, profile: Option<DecoderProfile>, now: u64, bytes: &[u8]) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if let Err(e) = capture.append(side, profile, now, bytes) {
            log::error!("Failed to write capture record, stopping capture: {e}");
            self.capture = None;
        }
    }

    fn handle_output(&mut self, output: EngineOutput) {
        for transition in output.transitions.iter() {
            log::debug!(
                "{} intent {} -> {} at {}us",
                transition.side,
                transition.from,
                transition.to,
                transition.at_us
            );
        }
        for drop in output.drops.iter() {
            self.metrics.record_drop(drop.reason);
            log::warn!(
                "Dropped {} input from contact {:?}: {}",
                drop.side,
                drop.contact_id,
                drop.reason
            );
        }
        for event in output.dispatches {
            match self.dispatcher.dispatch(event) {
                Ok(_) | Err(DispatchError::QueueFull(_)) => (),
                Err(DispatchError::Closed) => log::error!("Dispatch consumer has stopped"),
            }
        }
        self.publish();
    }

    /// Publish a new snapshot if anything observable changed
    fn publish(&self) {
        let snapshot = self.engine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if **current == snapshot {
                return false;
            }
            *current = Arc::new(snapshot);
            true
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
