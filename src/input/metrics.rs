//! Lock-free counters shared between the producer threads, the engine actor
//! and the dispatch consumer.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;

use super::dispatch::event::DropReason;

const DROP_REASONS: [DropReason; 7] = [
    DropReason::OffKeyNoSnap,
    DropReason::ForceGated,
    DropReason::DragCancel,
    DropReason::InvalidContact,
    DropReason::EngineQueueFull,
    DropReason::FrameQueueFull,
    DropReason::Cooldown,
];

fn drop_index(reason: DropReason) -> usize {
    match reason {
        DropReason::OffKeyNoSnap => 0,
        DropReason::ForceGated => 1,
        DropReason::DragCancel => 2,
        DropReason::InvalidContact => 3,
        DropReason::EngineQueueFull => 4,
        DropReason::FrameQueueFull => 5,
        DropReason::Cooldown => 6,
    }
}

#[derive(Debug)]
pub struct Metrics {
    reports_received: AtomicU64,
    frames_decoded: AtomicU64,
    frames_rejected: AtomicU64,
    dispatched: AtomicU64,
    faults: AtomicU64,
    drops: [AtomicU64; DROP_REASONS.len()],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            reports_received: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            drops: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
        }
    }

    #[inline]
    pub fn inc_report(&self) {
        self.reports_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_drop(&self, reason: DropReason) {
        self.drops[drop_index(reason)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn drops(&self, reason: DropReason) -> u64 {
        self.drops[drop_index(reason)].load(Ordering::Relaxed)
    }

    /// Read every counter. Counters are read individually, so the snapshot
    /// is not atomic as a whole.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reports_received: self.reports_received.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            drops: DROP_REASONS
                .iter()
                .map(|reason| (*reason, self.drops(*reason)))
                .filter(|(_, count)| *count > 0)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub reports_received: u64,
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub dispatched: u64,
    pub faults: u64,
    pub drops: BTreeMap<DropReason, u64>,
}
