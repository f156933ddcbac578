use log::trace;
use phoenix_core::hammerer::SyncStats;
use phoenix_core::memory::{AccessTimer, AggressorPtr};

/// Probes `sync_rows` round robin until one read takes longer than `ref_threshold`.
///
/// Gives up after `max_probes` reads. Returns whether a refresh was observed.
pub(crate) fn wait_for_refresh<T: AccessTimer>(
    timer: &T,
    sync_rows: &[AggressorPtr],
    ref_threshold: u64,
    max_probes: usize,
    stats: &mut SyncStats,
) -> bool {
    for &row in sync_rows.iter().cycle().take(max_probes) {
        let latency = unsafe { timer.timed_access(row) };
        stats.probes += 1;
        if latency > ref_threshold {
            trace!("REF after {} cycles on {:p}", latency, row);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDram;

    #[test]
    fn probing_stops_at_the_first_refresh() {
        let dram = SimDram::new(Some(1000));
        let rows = [0x1000 as AggressorPtr, 0x2000 as AggressorPtr];
        let mut stats = SyncStats::default();
        assert!(wait_for_refresh(&&dram, &rows, 1150, 64, &mut stats));
        assert_eq!(stats.probes, 10);
    }

    #[test]
    fn probing_is_bounded() {
        let dram = SimDram::new(None);
        let rows = [0x1000 as AggressorPtr];
        let mut stats = SyncStats::default();
        assert!(!wait_for_refresh(&&dram, &rows, 1150, 64, &mut stats));
        assert_eq!(stats.probes, 64);
    }
}
