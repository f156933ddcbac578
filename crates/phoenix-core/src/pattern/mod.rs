//! Hammer pattern assembly.
//!
//! A pattern places four double-sided aggressor pairs in a bank and assigns every read
//! a [`TrefiSlot`]: the tREFI window of the pattern period it is issued in and its
//! position within that window. [`PatternBuilder`] assembles patterns for one bank and
//! merges them across banks with a per-bank tREFI offset.

mod assemble;
mod schedule;

pub use self::assemble::{BankAddr, PatternBuilder, PatternParams, Targets, sync_rows};
pub use self::schedule::{PatternSchedule, Phase};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::DramAddr;

/// Aggressor pairs per bank.
pub const AGGRESSOR_PAIRS: usize = 4;

/// Errors raised while assembling patterns or loading schedules.
#[derive(Debug, Error)]
pub enum PatternError {
    /// No bank selected
    #[error("no target banks selected")]
    EmptyTargets,
    /// A bank coordinate exceeds the DIMM geometry
    #[error("{field} {index} out of range ({count} available)")]
    IndexOutOfRange {
        /// Coordinate name
        field: &'static str,
        /// Requested index
        index: usize,
        /// Number available
        count: usize,
    },
    /// A row of the pattern exceeds the bank
    #[error("row {row} out of range ({rows} rows)")]
    RowOutOfRange {
        /// Requested row
        row: usize,
        /// Rows per bank
        rows: usize,
    },
    /// Zero reads per tREFI
    #[error("reads per tREFI must be greater than 0")]
    ZeroReads,
    /// Zero aggressor spacing
    #[error("aggressor spacing must be greater than 0")]
    ZeroSpacing,
    /// Schedule phase without tREFIs
    #[error("schedule phase {0} is empty")]
    EmptyPhase(usize),
    /// Schedule phase naming a pair that does not exist
    #[error("schedule phase {phase} hammers pair {pair}, only {max} pairs exist", max = AGGRESSOR_PAIRS)]
    InvalidPair {
        /// Phase index
        phase: usize,
        /// Requested pair
        pair: usize,
    },
    /// Schedule length differs from the pattern period
    #[error("{algorithm} schedule covers {found} tREFIs, expected {expected}")]
    PeriodMismatch {
        /// Pattern algorithm
        algorithm: PatternAlgorithm,
        /// Period of the algorithm
        expected: usize,
        /// Period of the schedule
        found: usize,
    },
    /// Reading a schedule file failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A schedule file is not valid JSON
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Pattern families, identified by their period in tREFIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternAlgorithm {
    /// 128 tREFI period
    SkhMod128,
    /// 2608 tREFI period
    SkhMod2608,
}

impl PatternAlgorithm {
    /// Period in tREFIs.
    pub const fn period(&self) -> usize {
        match self {
            PatternAlgorithm::SkhMod128 => 128,
            PatternAlgorithm::SkhMod2608 => 2608,
        }
    }

    /// Name used on the command line and in schedule files.
    pub const fn name(&self) -> &'static str {
        match self {
            PatternAlgorithm::SkhMod128 => "skh_mod128",
            PatternAlgorithm::SkhMod2608 => "skh_mod2608",
        }
    }
}

impl std::fmt::Display for PatternAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Role of an address in a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Role {
    /// Row that is read
    Aggressor,
    /// Row checked for flips
    Victim,
}

/// Position of a read within the pattern period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrefiSlot {
    /// tREFI window within the period
    pub trefi: usize,
    /// Issue order within the window
    pub ordinal: usize,
}

/// One address of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PatternEntry {
    /// DRAM address
    pub addr: DramAddr,
    /// Whether the address is read or checked
    pub role: Role,
    /// When the address is read; for victims, the first read of their pair
    pub slot: TrefiSlot,
}

/// An assembled pattern. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HammerPattern {
    entries: Vec<PatternEntry>,
    period: usize,
    reads_per_trefi: usize,
    banks: usize,
}

impl HammerPattern {
    pub(crate) fn new(
        entries: Vec<PatternEntry>,
        period: usize,
        reads_per_trefi: usize,
        banks: usize,
    ) -> Self {
        HammerPattern {
            entries,
            period,
            reads_per_trefi,
            banks,
        }
    }

    /// All entries: aggressors ordered by slot, followed by victims.
    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pattern has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Period in tREFIs.
    pub fn period(&self) -> usize {
        self.period
    }

    /// Reads per tREFI and bank.
    pub fn reads_per_trefi(&self) -> usize {
        self.reads_per_trefi
    }

    /// Number of banks the pattern spans.
    pub fn banks(&self) -> usize {
        self.banks
    }

    /// Aggressor entries in issue order.
    pub fn aggressors(&self) -> impl Iterator<Item = &PatternEntry> {
        self.entries.iter().filter(|e| e.role == Role::Aggressor)
    }

    /// Victim entries.
    pub fn victims(&self) -> impl Iterator<Item = &PatternEntry> {
        self.entries.iter().filter(|e| e.role == Role::Victim)
    }

    /// Distinct aggressor rows (column 0), in order of first use.
    pub fn aggressor_rows(&self) -> Vec<DramAddr> {
        self.aggressors().map(|e| e.addr.row_start()).unique().collect()
    }

    /// Distinct victim rows (column 0).
    pub fn victim_rows(&self) -> Vec<DramAddr> {
        self.victims().map(|e| e.addr.row_start()).unique().collect()
    }

    /// Aggressor addresses grouped by tREFI window, each in issue order.
    pub fn trefi_schedule(&self) -> Vec<Vec<DramAddr>> {
        let mut schedule = vec![vec![]; self.period];
        for e in self.aggressors() {
            schedule[e.slot.trefi % self.period].push(e.addr);
        }
        schedule
    }
}
