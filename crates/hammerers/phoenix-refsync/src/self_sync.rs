use log::{debug, trace};
use phoenix_core::hammerer::{HammerJob, Hammering, SyncState, SyncStats};
use phoenix_core::memory::AccessTimer;

use crate::probe::wait_for_refresh;
use crate::{DEFAULT_MAX_SYNC_PROBES, SyncError};

/// Configuration of [`SelfSync`].
#[derive(Debug, Clone, Copy)]
pub struct SelfSyncConfig {
    /// Cycles the anchor is moved back when no refresh shows up in time
    pub drift_correction: u64,
    /// Sync-row reads spent waiting for a single refresh, initially and after every window
    pub max_sync_probes: usize,
}

impl Default for SelfSyncConfig {
    fn default() -> Self {
        SelfSyncConfig {
            drift_correction: 0,
            max_sync_probes: DEFAULT_MAX_SYNC_PROBES,
        }
    }
}

/// Synchronizes once, then hammers window after window.
///
/// After every window the sync rows are probed until either a refresh is observed, which
/// re-anchors the timeline, or the self-sync threshold has passed since the anchor. In
/// the latter case, or once `max_sync_probes` reads stay below the refresh threshold, the
/// refresh is assumed to be missed and the anchor is set to `now - drift_correction`, so
/// that the next check fires earlier.
pub struct SelfSync<T: AccessTimer> {
    timer: T,
    config: SelfSyncConfig,
}

impl<T: AccessTimer> SelfSync<T> {
    /// Creates the hammerer.
    pub fn new(timer: T, config: SelfSyncConfig) -> Self {
        SelfSync { timer, config }
    }
}

impl<T: AccessTimer> Hammering for SelfSync<T> {
    type Error = SyncError;

    fn hammer(&self, job: &HammerJob) -> Result<SyncStats, Self::Error> {
        let sync_rows = job.sync_rows();
        if sync_rows.is_empty() {
            return Err(SyncError::NoSyncRows);
        }
        let params = job.params();
        let threshold = params.self_sync_threshold;
        let start = self.timer.now();
        let mut stats = SyncStats::default();

        if wait_for_refresh(
            &self.timer,
            sync_rows,
            params.ref_threshold,
            self.config.max_sync_probes,
            &mut stats,
        ) {
            stats.refreshes_detected += 1;
        } else {
            stats.missed_refreshes += 1;
        }
        let mut anchor = self.timer.now();

        for window in 0..params.pattern_repetitions {
            for &ptr in job.trefi(window) {
                unsafe { self.timer.access(ptr) };
            }
            stats.accesses += job.trefi(window).len();

            let mut state = SyncState::WaitingForRef;
            for &row in sync_rows.iter().cycle().take(self.config.max_sync_probes) {
                let latency = unsafe { self.timer.timed_access(row) };
                stats.probes += 1;
                let now = self.timer.now();
                if latency > params.ref_threshold {
                    anchor = now;
                    stats.refreshes_detected += 1;
                    state = SyncState::Synced;
                    break;
                }
                if now.saturating_sub(anchor) > threshold {
                    anchor = now.saturating_sub(self.config.drift_correction.min(threshold));
                    stats.drift_corrections += 1;
                    state = SyncState::DriftDetected;
                    break;
                }
            }
            if state == SyncState::WaitingForRef {
                let now = self.timer.now();
                anchor = now.saturating_sub(self.config.drift_correction.min(threshold));
                stats.drift_corrections += 1;
                state = SyncState::DriftDetected;
            }
            trace!("window {}: {:?}", window, state);
            stats.windows += 1;
        }
        stats.cycles = self.timer.now().saturating_sub(start);
        debug!(
            "self_sync: {} windows, {} refreshes, {} drift corrections",
            stats.windows, stats.refreshes_detected, stats.drift_corrections
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Event, SimDram};
    use phoenix_core::hammerer::SyncParams;
    use phoenix_core::memory::AggressorPtr;

    fn job(repetitions: usize, self_sync_threshold: u64) -> HammerJob {
        let reads = (1..=8).map(|a| (a * 0x100) as AggressorPtr).collect();
        HammerJob::new(
            vec![reads],
            vec![0x1000 as AggressorPtr, 0x2000 as AggressorPtr],
            SyncParams {
                ref_threshold: 1150,
                pattern_repetitions: repetitions,
                self_sync_threshold,
            },
        )
    }

    #[test]
    fn refreshes_keep_the_loop_in_sync() {
        let dram = SimDram::new(Some(1000));
        let hammerer = SelfSync::new(&dram, SelfSyncConfig::default());
        let stats = hammerer.hammer(&job(20, 5000)).expect("sync rows present");
        assert_eq!(stats.windows, 20);
        assert_eq!(stats.refreshes_detected, 21);
        assert_eq!(stats.drift_corrections, 0);
        assert_eq!(stats.accesses, 20 * 8);
        let refreshes = dram
            .events
            .borrow()
            .iter()
            .filter(|e| **e == Event::Refresh)
            .count();
        assert_eq!(refreshes, 21);
    }

    #[test]
    fn silent_dram_is_corrected_every_window() {
        let dram = SimDram::new(None);
        let hammerer = SelfSync::new(
            &dram,
            SelfSyncConfig {
                drift_correction: 0,
                max_sync_probes: 128,
            },
        );
        let stats = hammerer.hammer(&job(5, 5000)).expect("sync rows present");
        assert_eq!(stats.windows, 5);
        assert_eq!(stats.missed_refreshes, 1);
        assert_eq!(stats.refreshes_detected, 0);
        assert_eq!(stats.drift_corrections, 5);
        assert_eq!(stats.accesses, 5 * 8);
    }

    #[test]
    fn drift_correction_shortens_the_wait() {
        let run = |drift_correction| {
            let dram = SimDram::new(None);
            let hammerer = SelfSync::new(
                &dram,
                SelfSyncConfig {
                    drift_correction,
                    max_sync_probes: 128,
                },
            );
            hammerer.hammer(&job(4, 5000)).expect("sync rows present")
        };
        let plain = run(0);
        let corrected = run(2000);
        assert_eq!(plain.drift_corrections, 4);
        assert_eq!(corrected.drift_corrections, 4);
        assert!(corrected.probes < plain.probes);
        assert!(corrected.cycles < plain.cycles);

        // corrections never move the anchor back by more than the threshold
        let clamped = run(u64::MAX);
        assert_eq!(clamped.drift_corrections, 4);
    }

    #[test]
    fn unreachable_threshold_is_bounded_per_window() {
        let dram = SimDram::new(None);
        let hammerer = SelfSync::new(
            &dram,
            SelfSyncConfig {
                drift_correction: 0,
                max_sync_probes: 16,
            },
        );
        let stats = hammerer.hammer(&job(3, u64::MAX)).expect("sync rows present");
        assert_eq!(stats.windows, 3);
        assert_eq!(stats.missed_refreshes, 1);
        assert_eq!(stats.refreshes_detected, 0);
        assert_eq!(stats.drift_corrections, 3);
        assert_eq!(stats.probes, 16 * 4);
    }

    #[test]
    fn sync_rows_are_required() {
        let dram = SimDram::new(Some(1000));
        let hammerer = SelfSync::new(&dram, SelfSyncConfig::default());
        let job = HammerJob::new(vec![vec![]], vec![], *job(1, 5000).params());
        assert!(matches!(hammerer.hammer(&job), Err(SyncError::NoSyncRows)));
    }
}
