use log::{debug, trace};
use phoenix_core::hammerer::{HammerJob, Hammering, SyncState, SyncStats};
use phoenix_core::memory::AccessTimer;

use crate::probe::wait_for_refresh;
use crate::{DEFAULT_MAX_SYNC_PROBES, SyncError};

/// Configuration of [`SeqSync`].
#[derive(Debug, Clone, Copy)]
pub struct SeqSyncConfig {
    /// Probes spent waiting for one refresh before hammering the window unsynchronized
    pub max_sync_probes: usize,
}

impl Default for SeqSyncConfig {
    fn default() -> Self {
        SeqSyncConfig {
            max_sync_probes: DEFAULT_MAX_SYNC_PROBES,
        }
    }
}

/// Waits for a refresh before every tREFI window, then issues the window's reads.
pub struct SeqSync<T: AccessTimer> {
    timer: T,
    config: SeqSyncConfig,
}

impl<T: AccessTimer> SeqSync<T> {
    /// Creates the hammerer.
    pub fn new(timer: T, config: SeqSyncConfig) -> Self {
        SeqSync { timer, config }
    }
}

impl<T: AccessTimer> Hammering for SeqSync<T> {
    type Error = SyncError;

    fn hammer(&self, job: &HammerJob) -> Result<SyncStats, Self::Error> {
        if job.sync_rows().is_empty() {
            return Err(SyncError::NoSyncRows);
        }
        let params = job.params();
        let start = self.timer.now();
        let mut stats = SyncStats::default();
        for window in 0..params.pattern_repetitions {
            let mut state = SyncState::WaitingForRef;
            if wait_for_refresh(
                &self.timer,
                job.sync_rows(),
                params.ref_threshold,
                self.config.max_sync_probes,
                &mut stats,
            ) {
                stats.refreshes_detected += 1;
                state = SyncState::Synced;
            } else {
                stats.missed_refreshes += 1;
            }
            trace!("window {}: {:?}", window, state);
            for &ptr in job.trefi(window) {
                unsafe { self.timer.access(ptr) };
            }
            stats.accesses += job.trefi(window).len();
            stats.windows += 1;
        }
        stats.cycles = self.timer.now().saturating_sub(start);
        debug!(
            "seq_sync: {} windows, {} refreshes, {} missed",
            stats.windows, stats.refreshes_detected, stats.missed_refreshes
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

    fn job(repetitions: usize, sync_rows: Vec<AggressorPtr>) -> HammerJob {
        let ptr = |a: usize| a as AggressorPtr;
        HammerJob::new(
            vec![
                vec![ptr(0x100), ptr(0x200), ptr(0x100), ptr(0x200)],
                vec![ptr(0x300), ptr(0x400)],
                vec![],
            ],
            sync_rows,
            SyncParams {
                ref_threshold: 1150,
                pattern_repetitions: repetitions,
                self_sync_threshold: 25_000,
            },
        )
    }

    #[test]
    fn one_window_per_refresh() {
        let dram = SimDram::new(Some(1000));
        let hammerer = SeqSync::new(&dram, SeqSyncConfig::default());
        let job = job(7, vec![0x1000 as AggressorPtr]);
        let stats = hammerer.hammer(&job).expect("sync rows present");

        assert_eq!(stats.windows, 7);
        assert_eq!(stats.refreshes_detected, 7);
        assert_eq!(stats.missed_refreshes, 0);
        assert_eq!(stats.accesses, 4 + 2 + 0 + 4 + 2 + 0 + 4);

        let events = dram.events.borrow();
        let windows: Vec<Vec<usize>> = events
            .split(|e| *e == Event::Refresh)
            .skip(1)
            .map(|w| {
                w.iter()
                    .map(|e| match e {
                        Event::Access(a) => *a,
                        Event::Refresh => unreachable!(),
                    })
                    .collect()
            })
            .collect();
        assert_eq!(windows.len(), 7);
        for (w, reads) in windows.iter().enumerate() {
            let expected: Vec<usize> = job.trefi(w).iter().map(|&p| p as usize).collect();
            assert_eq!(reads, &expected, "window {}", w);
        }
    }

    #[test]
    fn missed_refreshes_are_counted() {
        let dram = SimDram::new(None);
        let hammerer = SeqSync::new(&dram, SeqSyncConfig { max_sync_probes: 16 });
        let stats = hammerer
            .hammer(&job(3, vec![0x1000 as AggressorPtr]))
            .expect("sync rows present");
        assert_eq!(stats.windows, 3);
        assert_eq!(stats.refreshes_detected, 0);
        assert_eq!(stats.missed_refreshes, 3);
        assert_eq!(stats.probes, 48);
        assert_eq!(stats.accesses, 6);
    }

    #[test]
    fn sync_rows_are_required() {
        let dram = SimDram::new(Some(1000));
        let hammerer = SeqSync::new(&dram, SeqSyncConfig::default());
        assert!(matches!(
            hammerer.hammer(&job(1, vec![])),
            Err(SyncError::NoSyncRows)
        ));
    }
}
