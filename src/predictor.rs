//! Dynamic branch prediction
//!
//! Eleven predictor flavours share one predict/update contract: two
//! static policies (never-taken and backward-taken/forward-not-taken),
//! bimodal tables of 2-bit saturating counters at four sizes, gshare
//! tables of the same sizes with a global history register, and a
//! disabled variant. The simulator drives update() once per retired
//! conditional branch; the update recomputes the prediction from the
//! current state before mutating it, so a single call per branch is
//! enough to collect misprediction statistics.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::utils::mask;

/// Counters start weakly taken
const WEAKLY_TAKEN: u8 = 2;
const COUNTER_MAX: u8 = 3;

/// The predictor flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    /// Predict not-taken, no dynamic state
    None,
    /// Never taken
    Nt,
    /// Backward taken, forward not taken
    Btfnt,
    Bimodal256,
    Bimodal1k,
    Bimodal4k,
    Bimodal16k,
    Gshare256,
    Gshare1k,
    Gshare4k,
    Gshare16k,
}

impl PredictorKind {
    fn table_entries(&self) -> usize {
        match self {
            Self::Bimodal256 | Self::Gshare256 => 256,
            Self::Bimodal1k | Self::Gshare1k => 1024,
            Self::Bimodal4k | Self::Gshare4k => 4096,
            Self::Bimodal16k | Self::Gshare16k => 16384,
            _ => 0,
        }
    }

    fn uses_global_history(&self) -> bool {
        matches!(
            self,
            Self::Gshare256 | Self::Gshare1k | Self::Gshare4k | Self::Gshare16k
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Nt => "NT (Never Taken)",
            Self::Btfnt => "BTFNT (Backward Taken, Forward Not Taken)",
            Self::Bimodal256 => "Bimodal (256 entries)",
            Self::Bimodal1k => "Bimodal (1024 entries)",
            Self::Bimodal4k => "Bimodal (4096 entries)",
            Self::Bimodal16k => "Bimodal (16384 entries)",
            Self::Gshare256 => "gShare (256 entries)",
            Self::Gshare1k => "gShare (1024 entries)",
            Self::Gshare4k => "gShare (4096 entries)",
            Self::Gshare16k => "gShare (16384 entries)",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown predictor type {0:?}")]
pub struct ParsePredictorError(String);

impl FromStr for PredictorKind {
    type Err = ParsePredictorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NT" => Ok(Self::Nt),
            "BTFNT" => Ok(Self::Btfnt),
            "bimodal-256" => Ok(Self::Bimodal256),
            "bimodal-1K" => Ok(Self::Bimodal1k),
            "bimodal-4K" => Ok(Self::Bimodal4k),
            "bimodal-16K" => Ok(Self::Bimodal16k),
            "gshare-256" => Ok(Self::Gshare256),
            "gshare-1K" => Ok(Self::Gshare1k),
            "gshare-4K" => Ok(Self::Gshare4k),
            "gshare-16K" => Ok(Self::Gshare16k),
            _ => Err(ParsePredictorError(s.to_string())),
        }
    }
}

/// A branch predictor with its misprediction statistics
#[derive(Debug, Clone)]
pub struct BranchPredictor {
    kind: PredictorKind,
    /// 2-bit saturating counters; empty for the static flavours
    table: Vec<u8>,
    global_history: u32,
    history_bits: u32,
    total_branches: u64,
    mispredictions: u64,
}

impl BranchPredictor {
    pub fn new(kind: PredictorKind) -> Self {
        let entries = kind.table_entries();
        let history_bits = if kind.uses_global_history() {
            entries.trailing_zeros()
        } else {
            0
        };
        Self {
            kind,
            table: vec![WEAKLY_TAKEN; entries],
            global_history: 0,
            history_bits,
            total_branches: 0,
            mispredictions: 0,
        }
    }

    pub fn kind(&self) -> PredictorKind {
        self.kind
    }

    fn table_index(&self, pc: u32) -> usize {
        if self.kind.uses_global_history() {
            let index_mask: u32 = mask(self.history_bits);
            let pc_bits = (pc >> 2) & index_mask;
            let history_bits = self.global_history & index_mask;
            (pc_bits ^ history_bits) as usize % self.table.len()
        } else {
            pc as usize % self.table.len()
        }
    }

    /// Pure query: the direction the current state predicts for a
    /// branch at pc with the given target
    pub fn predict(&self, pc: u32, target: u32) -> bool {
        match self.kind {
            PredictorKind::None | PredictorKind::Nt => false,
            PredictorKind::Btfnt => target < pc,
            _ => self.table[self.table_index(pc)] >= WEAKLY_TAKEN,
        }
    }

    /// Record a retired branch. The order is fixed: sample the
    /// prediction from the current state, bump the statistics, update
    /// the counter, then shift the history register.
    pub fn update(&mut self, pc: u32, target: u32, taken: bool) {
        let prediction = self.predict(pc, target);

        self.total_branches += 1;
        if prediction != taken {
            self.mispredictions += 1;
        }

        if !self.table.is_empty() {
            let idx = self.table_index(pc);
            let counter = &mut self.table[idx];
            if taken {
                if *counter < COUNTER_MAX {
                    *counter += 1;
                }
            } else if *counter > 0 {
                *counter -= 1;
            }
        }

        if self.kind.uses_global_history() {
            let index_mask: u32 = mask(self.history_bits);
            self.global_history = ((self.global_history << 1) | u32::from(taken)) & index_mask;
        }
    }

    pub fn report(&self) -> PredictorStats {
        PredictorStats {
            name: self.kind.name(),
            total_branches: self.total_branches,
            mispredictions: self.mispredictions,
        }
    }
}

/// Statistics block printed at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorStats {
    pub name: &'static str,
    pub total_branches: u64,
    pub mispredictions: u64,
}

impl PredictorStats {
    /// Misprediction rate in percent, or None when no branches were
    /// observed
    pub fn misprediction_rate(&self) -> Option<f64> {
        if self.total_branches > 0 {
            Some(self.mispredictions as f64 / self.total_branches as f64 * 100.0)
        } else {
            None
        }
    }
}

impl fmt::Display for PredictorStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "=== Branch Predictor Statistics ===")?;
        writeln!(f, "Predictor: {}", self.name)?;
        writeln!(f, "Total branches: {}", self.total_branches)?;
        writeln!(f, "Mispredictions: {}", self.mispredictions)?;
        match self.misprediction_rate() {
            Some(rate) => writeln!(f, "Misprediction rate: {rate:.2}%")?,
            None => writeln!(f, "Misprediction rate: N/A (no branches)")?,
        }
        write!(f, "===================================")
    }
}
