use std::collections::VecDeque;

use thiserror::Error;

/// Consecutive faults within this window count towards a cooldown
pub const FAULT_WINDOW_US: u64 = 1_000_000;
/// Number of consecutive faults inside the window that triggers a cooldown
pub const FAULT_LIMIT: usize = 3;
/// How long raw input is ignored once the limit is hit
pub const COOLDOWN_US: u64 = 2_000_000;

/// A failure while handling a single raw report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeFault {
    #[error("report {index} from {path} panicked ({message}), data: {prefix}")]
    Panicked {
        path: String,
        index: u64,
        prefix: String,
        message: String,
    },
}

/// Tracks recent faults and decides when raw input processing should pause.
/// All times are microseconds on the pipeline clock.
#[derive(Debug, Default)]
pub struct FaultGovernor {
    recent: VecDeque<u64>,
    cooldown_until: Option<u64>,
}

impl FaultGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fault. Returns true if this fault started a cooldown.
    pub fn record(&mut self, now: u64) -> bool {
        while self
            .recent
            .front()
            .is_some_and(|at| now.saturating_sub(*at) >= FAULT_WINDOW_US)
        {
            self.recent.pop_front();
        }
        self.recent.push_back(now);
        if self.recent.len() < FAULT_LIMIT {
            return false;
        }

        self.recent.clear();
        self.cooldown_until = Some(now + COOLDOWN_US);
        true
    }

    /// A report was handled without a fault, which breaks any run of faults
    pub fn record_success(&mut self) {
        self.recent.clear();
    }

    pub fn in_cooldown(&mut self, now: u64) -> bool {
        match self.cooldown_until {
            Some(until) if now < until => true,
            Some(_) => {
                log::info!("Fault cooldown ended, resuming raw input");
                self.cooldown_until = None;
                false
            }
            None => false,
        }
    }
}
