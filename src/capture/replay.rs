//! Deterministic replay of a capture through the decoder and the engine.
//! Replays never touch the wall clock, so the same capture and
//! configuration always produce the same fingerprint.

use std::{collections::BTreeMap, fmt::Write as _, fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    config::{
        layout::{KeyLayout, Keymap},
        ConfigError, EngineConfig, LoadError,
    },
    drivers::trackpad::{Decoder, ProfileCache, ProfilePreference, RawReport},
    input::{
        dispatch::event::{DispatchEvent, DropReason},
        engine::{Engine, EngineOutput, Transition, TICK_INTERVAL_US},
        Side,
    },
};

use super::{CaptureError, CaptureReader};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A replay result that differs from its fixture. Describes the first
/// difference found.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayMismatch {
    #[error("expected {expected} {field}, replay produced {actual}")]
    Count {
        field: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("expected {expected} {reason} drops, replay produced {actual}")]
    Drops {
        reason: DropReason,
        expected: u64,
        actual: u64,
    },
    #[error("fingerprint mismatch: expected {expected}, replay produced {actual}")]
    Fingerprint { expected: String, actual: String },
}

/// Everything a replay produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub records: u64,
    pub decoded: u64,
    pub rejected: u64,
    pub transitions: Vec<Transition>,
    pub dispatches: Vec<DispatchEvent>,
    pub drops: BTreeMap<DropReason, u64>,
    pub fingerprint: String,
}

impl ReplayOutcome {
    fn record(&mut self, output: EngineOutput) {
        for drop in output.drops {
            *self.drops.entry(drop.reason).or_default() += 1;
        }
        self.transitions.extend(output.transitions);
        self.dispatches.extend(output.dispatches);
    }
}

/// Render transitions and dispatches one per line. This is the input of the
/// fingerprint, so the format must stay stable.
pub fn canonical(transitions: &[Transition], dispatches: &[DispatchEvent]) -> String {
    let mut out = String::new();
    for t in transitions {
        let _ = writeln!(out, "T {} {} {} {}", t.at_us, t.side, t.from, t.to);
    }
    for d in dispatches {
        let _ = writeln!(out, "D {} {} {} {}", d.timestamp_us, d.side, d.label, d.action);
    }
    out
}

/// SHA-256 of the canonical rendering as lowercase hex
pub fn fingerprint(transitions: &[Transition], dispatches: &[DispatchEvent]) -> String {
    let digest = Sha256::digest(canonical(transitions, dispatches).as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut hex, b| {
        let _ = write!(hex, "{b:02x}");
        hex
    })
}

/// Replay every record of the capture. Timestamps are rebased to the tick
/// boundary at or before the first record, so the engine ticks on the same
/// grid as the live pipeline that recorded the capture. Every scheduled tick
/// up to a record runs before it, and each record is decoded with the profile
/// it was captured with. Records without a side are routed to the left
/// surface. After the last record the engine is advanced far enough for
/// every contact to expire.
pub fn run<R: Read>(
    reader: CaptureReader<R>,
    config: EngineConfig,
    layout: KeyLayout,
    keymap: Keymap,
) -> Result<ReplayOutcome, ReplayError> {
    let decoder = Decoder::new(config.decoder.target());
    let settle_us = config.contact_liveness_ms.max(config.typing_grace_ms) * 1000 + TICK_INTERVAL_US;
    let mut engine = Engine::new(config, layout, keymap)?;
    let mut profiles = ProfileCache::new();
    let header = *reader.header();

    let mut outcome = ReplayOutcome::default();
    let mut base: Option<u64> = None;
    let mut now = 0;
    for record in reader {
        let record = record?;
        outcome.records += 1;

        let base = *base.get_or_insert(record.timestamp_us - record.timestamp_us % TICK_INTERVAL_US);
        now = record
            .timestamp_us
            .saturating_sub(base)
            .max(engine.last_tick_us());
        outcome.record(engine.advance_to(now));

        let side = record.side.unwrap_or(Side::Left);
        let preference = record
            .profile
            .map(ProfilePreference::from)
            .unwrap_or_default();
        let report = RawReport::new(&record.payload, header.descriptor(side));

        match profiles.decode(&decoder, side.as_str(), report, now, preference) {
            Ok(decoded) => {
                outcome.decoded += 1;
                outcome.record(engine.apply(side, &decoded.frame));
            }
            Err(e) => {
                outcome.rejected += 1;
                log::debug!("Replay record {} rejected: {e}", outcome.records - 1);
            }
        }
    }
    if outcome.records > 0 {
        outcome.record(engine.advance_to(now + settle_us));
    }

    outcome.fingerprint = fingerprint(&outcome.transitions, &outcome.dispatches);
    log::info!(
        "Replayed {} records: {} transitions, {} dispatches, fingerprint {}",
        outcome.records,
        outcome.transitions.len(),
        outcome.dispatches.len(),
        outcome.fingerprint
    );
    Ok(outcome)
}

/// Expected result of replaying a capture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFixture {
    pub records: u64,
    pub transitions: u64,
    pub dispatches: u64,
    #[serde(default)]
    pub drops: BTreeMap<DropReason, u64>,
    pub fingerprint: String,
}

impl ReplayFixture {
    pub fn from_outcome(outcome: &ReplayOutcome) -> Self {
        Self {
            records: outcome.records,
            transitions: outcome.transitions.len() as u64,
            dispatches: outcome.dispatches.len() as u64,
            drops: outcome.drops.clone(),
            fingerprint: outcome.fingerprint.clone(),
        }
    }

    /// Load a [ReplayFixture] from the given JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let file = File::open(path)?;
        let fixture = serde_json::from_reader(file)?;
        Ok(fixture)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), LoadError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Compare the outcome against this fixture
    pub fn verify(&self, outcome: &ReplayOutcome) -> Result<(), ReplayMismatch> {
        let actual = Self::from_outcome(outcome);
        let counts = [
            ("records", self.records, actual.records),
            ("transitions", self.transitions, actual.transitions),
            ("dispatches", self.dispatches, actual.dispatches),
        ];
        for (field, expected, actual) in counts {
            if expected != actual {
                return Err(ReplayMismatch::Count {
                    field,
                    expected,
                    actual,
                });
            }
        }

        let reasons = self.drops.keys().chain(actual.drops.keys());
        for reason in reasons {
            let expected = self.drops.get(reason).copied().unwrap_or(0);
            let count = actual.drops.get(reason).copied().unwrap_or(0);
            if expected != count {
                return Err(ReplayMismatch::Drops {
                    reason: *reason,
                    expected,
                    actual: count,
                });
            }
        }

        if self.fingerprint != actual.fingerprint {
            return Err(ReplayMismatch::Fingerprint {
                expected: self.fingerprint.clone(),
                actual: actual.fingerprint,
            });
        }
        Ok(())
    }
}
