use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use phoenix_core::bit_flips::BitFlip;
use phoenix_core::observer::{FuzzPoint, HammerObserver};
use phoenix_core::util::NamedProgress;

/// Progress bar over all fuzz iterations, showing the current point and flip counts.
pub struct ProgressObserver {
    bar: ProgressBar,
    total: usize,
    done: usize,
    last_flips: usize,
    total_flips: usize,
}

impl ProgressObserver {
    /// Adds a bar for `total` iterations to `progress`.
    pub fn new(progress: &MultiProgress, total: usize) -> Self {
        let bar = progress.add(ProgressBar::new(total as u64));
        bar.set_style(ProgressStyle::named_bar("Fuzzing"));
        ProgressObserver {
            bar,
            total,
            done: 0,
            last_flips: 0,
            total_flips: 0,
        }
    }

    fn message(&self, point: &FuzzPoint) -> String {
        format!(
            "it={}/{} | len={} | agg_base_row={} | sync={} | r/tREFI={} | BF+ {} | BFΣ {}",
            self.done,
            self.total,
            point.pattern.len(),
            point.agg_base_row,
            point.self_sync_threshold,
            point.reads_per_trefi,
            self.last_flips,
            self.total_flips
        )
    }
}

impl HammerObserver for ProgressObserver {
    fn on_pre_iteration(&mut self, point: &FuzzPoint) {
        self.bar.set_message(self.message(point));
    }

    fn on_post_iteration(&mut self, point: &FuzzPoint, flips: &[BitFlip]) {
        self.done += 1;
        self.last_flips = flips.len();
        self.total_flips += flips.len();
        self.bar.set_message(self.message(point));
        self.bar.inc(1);
    }
}

impl Drop for ProgressObserver {
    fn drop(&mut self) {
        self.bar.finish();
    }
}
