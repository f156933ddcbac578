use std::collections::HashSet;

use itertools::iproduct;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::memory::{DramAddr, MemConfiguration};
use crate::pattern::{
    AGGRESSOR_PAIRS, HammerPattern, PatternAlgorithm, PatternEntry, PatternError,
    PatternSchedule, Role, TrefiSlot,
};

/// A bank, addressed down to the bank within its bank group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BankAddr {
    /// Subchannel number
    pub subchannel: usize,
    /// Rank number
    pub rank: usize,
    /// Bank group number
    pub bank_group: usize,
    /// Bank number within the bank group
    pub bank: usize,
}

impl BankAddr {
    /// Address of `row` and `column` in this bank.
    pub fn at(&self, row: usize, column: usize) -> DramAddr {
        DramAddr::new(
            self.subchannel,
            self.rank,
            self.bank_group,
            self.bank,
            row,
            column,
        )
    }
}

/// Bank coordinates to hammer; the banks are their Cartesian product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targets {
    /// Subchannels
    pub subchannels: Vec<usize>,
    /// Ranks
    pub ranks: Vec<usize>,
    /// Bank groups
    pub bank_groups: Vec<usize>,
    /// Banks within each bank group
    pub banks: Vec<usize>,
}

impl Targets {
    /// Targeted banks, ordered subchannel, rank, bank group, bank (last varies fastest).
    pub fn bank_addrs(&self) -> impl Iterator<Item = BankAddr> + '_ {
        iproduct!(
            self.subchannels.iter(),
            self.ranks.iter(),
            self.bank_groups.iter(),
            self.banks.iter()
        )
        .map(|(&subchannel, &rank, &bank_group, &bank)| BankAddr {
            subchannel,
            rank,
            bank_group,
            bank,
        })
    }

    /// Number of targeted banks.
    pub fn len(&self) -> usize {
        self.subchannels.len() * self.ranks.len() * self.bank_groups.len() * self.banks.len()
    }

    /// Whether no bank is targeted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that at least one bank is targeted and every index exists on the DIMM.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::EmptyTargets`] or [`PatternError::IndexOutOfRange`].
    pub fn validate(&self, mem_config: &MemConfiguration) -> Result<(), PatternError> {
        if self.is_empty() {
            return Err(PatternError::EmptyTargets);
        }
        let fields: [(&'static str, &[usize], usize); 4] = [
            ("subchannel", &self.subchannels, mem_config.subchannels()),
            ("rank", &self.ranks, mem_config.ranks()),
            ("bank group", &self.bank_groups, mem_config.bank_groups()),
            ("bank", &self.banks, mem_config.banks()),
        ];
        for (field, indices, count) in fields {
            if let Some(&index) = indices.iter().find(|&&i| i >= count) {
                return Err(PatternError::IndexOutOfRange {
                    field,
                    index,
                    count,
                });
            }
        }
        Ok(())
    }
}

/// Placement parameters of one pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatternParams {
    /// Lower aggressor row of the first pair
    pub base_row: usize,
    /// Reads per tREFI and bank
    pub reads_per_trefi: usize,
    /// Column distance between consecutive reads of the same row, in bytes
    pub column_stride: usize,
    /// Row distance between consecutive aggressor pairs
    pub aggressor_spacing: usize,
    /// tREFI shift between consecutive banks of a multi-bank pattern
    pub trefi_offset_per_bank: usize,
}

impl PatternParams {
    /// Highest row touched by a pattern, or `None` on overflow.
    pub fn top_row(&self) -> Option<usize> {
        self.aggressor_spacing
            .checked_mul(AGGRESSOR_PAIRS - 1)?
            .checked_add(self.base_row)?
            .checked_add(3)
    }

    fn validate(&self, mem_config: &MemConfiguration) -> Result<(), PatternError> {
        if self.reads_per_trefi == 0 {
            return Err(PatternError::ZeroReads);
        }
        if self.aggressor_spacing == 0 {
            return Err(PatternError::ZeroSpacing);
        }
        match self.top_row() {
            Some(row) if row < mem_config.rows() => Ok(()),
            row => Err(PatternError::RowOutOfRange {
                row: row.unwrap_or(usize::MAX),
                rows: mem_config.rows(),
            }),
        }
    }

    fn pair_row(&self, pair: usize) -> usize {
        self.base_row + pair * self.aggressor_spacing
    }
}

/// Assembles patterns of one [`PatternAlgorithm`].
#[derive(Debug, Clone)]
pub struct PatternBuilder {
    schedule: PatternSchedule,
    slots: Vec<Option<usize>>,
}

impl PatternBuilder {
    /// Builder using the built-in schedule of `algorithm`.
    pub fn new(algorithm: PatternAlgorithm) -> Self {
        let schedule = PatternSchedule::default_for(algorithm);
        let slots = schedule.slots();
        PatternBuilder { schedule, slots }
    }

    /// Builder using a calibrated schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule is invalid for its algorithm.
    pub fn with_schedule(schedule: PatternSchedule) -> Result<Self, PatternError> {
        schedule.validate()?;
        let slots = schedule.slots();
        Ok(PatternBuilder { schedule, slots })
    }

    /// The pattern family.
    pub fn algorithm(&self) -> PatternAlgorithm {
        self.schedule.algorithm
    }

    /// The interleaving schedule.
    pub fn schedule(&self) -> &PatternSchedule {
        &self.schedule
    }

    /// Pattern period in tREFIs.
    pub fn period(&self) -> usize {
        self.slots.len()
    }

    /// Assembles the pattern for a single bank.
    ///
    /// Pair `p` hammers rows `base_row + p * aggressor_spacing` and two rows above it.
    /// In every tREFI of a phase hammering pair `p`, read `k` goes to the lower row for
    /// even `k` and the upper row for odd `k`, at column `(k / 2) * column_stride` modulo
    /// the row size. Victims are the rows adjacent to an aggressor that are not aggressors
    /// themselves, each listed once, with the slot of the first read of their pair.
    ///
    /// # Errors
    ///
    /// Fails if the bank or any row lies outside the DIMM, or on zero reads or spacing.
    pub fn assemble_single_bank_pattern(
        &self,
        mem_config: &MemConfiguration,
        bank: BankAddr,
        params: &PatternParams,
    ) -> Result<HammerPattern, PatternError> {
        Targets {
            subchannels: vec![bank.subchannel],
            ranks: vec![bank.rank],
            bank_groups: vec![bank.bank_group],
            banks: vec![bank.bank],
        }
        .validate(mem_config)?;
        params.validate(mem_config)?;

        let row_bytes = mem_config.row_bytes();
        let mut entries = vec![];
        let mut first_slot: [Option<TrefiSlot>; AGGRESSOR_PAIRS] = [None; AGGRESSOR_PAIRS];
        for (trefi, pair) in self.slots.iter().enumerate() {
            let Some(pair) = *pair else { continue };
            first_slot[pair].get_or_insert(TrefiSlot { trefi, ordinal: 0 });
            let lower = params.pair_row(pair);
            for k in 0..params.reads_per_trefi {
                let row = lower + (k % 2) * 2;
                let column = ((k / 2) * params.column_stride) % row_bytes;
                entries.push(PatternEntry {
                    addr: bank.at(row, column),
                    role: Role::Aggressor,
                    slot: TrefiSlot { trefi, ordinal: k },
                });
            }
        }

        let active = || (0..AGGRESSOR_PAIRS).filter_map(|p| first_slot[p].map(|s| (p, s)));
        let aggressor_rows: HashSet<usize> = active()
            .flat_map(|(p, _)| [params.pair_row(p), params.pair_row(p) + 2])
            .collect();
        let mut seen = HashSet::new();
        for (pair, slot) in active() {
            let lower = params.pair_row(pair);
            for row in [lower.checked_sub(1), Some(lower + 1), Some(lower + 3)]
                .into_iter()
                .flatten()
            {
                if aggressor_rows.contains(&row) || !seen.insert(row) {
                    continue;
                }
                entries.push(PatternEntry {
                    addr: bank.at(row, 0),
                    role: Role::Victim,
                    slot,
                });
            }
        }
        trace!(
            "Bank ({}, {}, {}, {}): {} entries, aggressor rows {:?}",
            bank.subchannel,
            bank.rank,
            bank.bank_group,
            bank.bank,
            entries.len(),
            aggressor_rows
        );
        Ok(HammerPattern::new(
            entries,
            self.period(),
            params.reads_per_trefi,
            1,
        ))
    }

    /// Assembles the pattern for every targeted bank and merges them.
    ///
    /// Bank `i` (in [`Targets::bank_addrs`] order) is shifted by
    /// `i * trefi_offset_per_bank` tREFIs modulo the period, and its reads are interleaved
    /// with the other banks' within each tREFI: local read `k` becomes ordinal `k * N + i`
    /// for `N` banks. Aggressors are ordered by slot, victims follow.
    ///
    /// # Errors
    ///
    /// Fails on an empty target set or for the reasons of
    /// [`PatternBuilder::assemble_single_bank_pattern`].
    pub fn assemble_multi_bank_pattern(
        &self,
        mem_config: &MemConfiguration,
        targets: &Targets,
        params: &PatternParams,
    ) -> Result<HammerPattern, PatternError> {
        targets.validate(mem_config)?;
        let n = targets.len();
        let period = self.period();
        let mut aggressors = vec![];
        let mut victims = vec![];
        for (i, bank) in targets.bank_addrs().enumerate() {
            let single = self.assemble_single_bank_pattern(mem_config, bank, params)?;
            let shift = (i * params.trefi_offset_per_bank) % period;
            for e in single.entries() {
                let entry = PatternEntry {
                    slot: TrefiSlot {
                        trefi: (e.slot.trefi + shift) % period,
                        ordinal: e.slot.ordinal * n + i,
                    },
                    ..*e
                };
                match e.role {
                    Role::Aggressor => aggressors.push(entry),
                    Role::Victim => victims.push(entry),
                }
            }
        }
        aggressors.sort_by_key(|e| e.slot);
        victims.sort_by_key(|e| e.slot);
        aggressors.append(&mut victims);
        Ok(HammerPattern::new(
            aggressors,
            period,
            params.reads_per_trefi,
            n,
        ))
    }
}

/// Reserved rows probed for refresh detection.
///
/// Starting at `start_row`, takes column 0 of every targeted bank row by row until
/// `count` addresses are collected.
pub fn sync_rows(targets: &Targets, start_row: usize, count: usize) -> Vec<DramAddr> {
    if targets.is_empty() {
        return vec![];
    }
    let mut addrs = Vec::with_capacity(count + targets.len());
    let mut row = start_row;
    while addrs.len() < count {
        addrs.extend(targets.bank_addrs().map(|b| b.at(row, 0)));
        row += 1;
    }
    addrs.truncate(count);
    addrs
}
