//! Hammering traits and the resolved per-iteration hammer job.
//!
//! A [`HammerJob`] is built once per fuzz iteration from a [`HammerPattern`]. It holds the
//! virtual addresses to read in every tREFI window of the pattern period, the sync rows
//! probed to detect refresh commands and the timing parameters. [`Hammering`]
//! implementations execute it and report [`SyncStats`].

use serde::Serialize;

use crate::memory::{AggressorPtr, DramAddr, MappedDimm, MemoryError};
use crate::pattern::HammerPattern;

/// Trait for implementing Rowhammer hammering techniques.
///
/// # Associated Types
///
/// * `Error` - The error type returned by hammering operations. Must implement [`std::error::Error`].
pub trait Hammering {
    /// The error type returned by hammering operations.
    type Error: std::error::Error;

    /// Executes `job`.
    ///
    /// Missed refreshes are not errors; they are counted in the returned statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be executed at all, e.g. without sync rows.
    fn hammer(&self, job: &HammerJob) -> Result<SyncStats, Self::Error>;
}

/// Timing parameters of a hammer job. All times are CPU cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncParams {
    /// Access latency above which a sync-row read is taken as a refresh
    pub ref_threshold: u64,
    /// Number of tREFI windows to hammer
    pub pattern_repetitions: usize,
    /// Longest a self-synchronizing hammerer waits for a refresh before correcting
    pub self_sync_threshold: u64,
}

/// Refresh synchronization state of a hammering loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    /// Probing sync rows until a refresh is observed
    WaitingForRef,
    /// A refresh was observed; the next window is aligned to it
    Synced,
    /// No refresh was observed in time; the anchor was corrected
    DriftDetected,
}

/// Statistics of one hammer job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// tREFI windows executed
    pub windows: usize,
    /// Refresh commands observed on the sync rows
    pub refreshes_detected: usize,
    /// Sync attempts that gave up, leaving the next window unsynchronized
    pub missed_refreshes: usize,
    /// Windows that ended with a drift correction
    pub drift_corrections: usize,
    /// Timed sync-row probes
    pub probes: usize,
    /// Pattern reads issued
    pub accesses: usize,
    /// Cycles spent in the job
    pub cycles: u64,
}

impl SyncStats {
    /// Adds `other` to these statistics.
    pub fn merge(&mut self, other: &SyncStats) {
        self.windows += other.windows;
        self.refreshes_detected += other.refreshes_detected;
        self.missed_refreshes += other.missed_refreshes;
        self.drift_corrections += other.drift_corrections;
        self.probes += other.probes;
        self.accesses += other.accesses;
        self.cycles += other.cycles;
    }
}

/// A pattern resolved to virtual addresses, ready to hammer.
#[derive(Debug, Clone)]
pub struct HammerJob {
    schedule: Vec<Vec<AggressorPtr>>,
    sync_rows: Vec<AggressorPtr>,
    params: SyncParams,
}

impl HammerJob {
    /// Creates a job from already resolved addresses.
    ///
    /// `schedule[t]` holds the reads of tREFI `t` of the pattern period, in issue order.
    pub fn new(
        schedule: Vec<Vec<AggressorPtr>>,
        sync_rows: Vec<AggressorPtr>,
        params: SyncParams,
    ) -> Self {
        HammerJob {
            schedule,
            sync_rows,
            params,
        }
    }

    /// Resolves the aggressor schedule of `pattern` and the `sync_rows` in `dimm`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] for the first address not backed by the allocation.
    pub fn resolve(
        pattern: &HammerPattern,
        sync_rows: &[DramAddr],
        dimm: &MappedDimm,
        params: SyncParams,
    ) -> Result<Self, MemoryError> {
        let schedule = pattern
            .trefi_schedule()
            .into_iter()
            .map(|reads| {
                reads
                    .iter()
                    .map(|a| dimm.resolve(a).map(|p| p as AggressorPtr))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sync_rows = sync_rows
            .iter()
            .map(|a| dimm.resolve(a).map(|p| p as AggressorPtr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HammerJob::new(schedule, sync_rows, params))
    }

    /// Reads of the given window; windows wrap around the pattern period.
    pub fn trefi(&self, window: usize) -> &[AggressorPtr] {
        match self.schedule.len() {
            0 => &[],
            period => &self.schedule[window % period],
        }
    }

    /// Pattern period in tREFIs.
    pub fn period(&self) -> usize {
        self.schedule.len()
    }

    /// Addresses probed to detect refreshes.
    pub fn sync_rows(&self) -> &[AggressorPtr] {
        &self.sync_rows
    }

    /// Timing parameters.
    pub fn params(&self) -> &SyncParams {
        &self.params
    }

    /// Replaces the timing parameters, keeping the resolved addresses.
    pub fn set_params(&mut self, params: SyncParams) {
        self.params = params;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_wrap_around_the_period() {
        let a = 0x1000 as AggressorPtr;
        let b = 0x2000 as AggressorPtr;
        let params = SyncParams {
            ref_threshold: 1150,
            pattern_repetitions: 8,
            self_sync_threshold: 25_000,
        };
        let job = HammerJob::new(vec![vec![a], vec![], vec![b, a]], vec![b], params);
        assert_eq!(job.period(), 3);
        assert_eq!(job.trefi(0), &[a]);
        assert!(job.trefi(4).is_empty());
        assert_eq!(job.trefi(5), &[b, a]);
        assert!(HammerJob::new(vec![], vec![], params).trefi(3).is_empty());
    }

    #[test]
    fn stats_merge_adds_up() {
        let mut total = SyncStats::default();
        let one = SyncStats {
            windows: 2,
            refreshes_detected: 1,
            missed_refreshes: 1,
            drift_corrections: 0,
            probes: 10,
            accesses: 176,
            cycles: 7800,
        };
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.windows, 4);
        assert_eq!(total.accesses, 352);
        assert_eq!(total.cycles, 15600);
    }
}
