//! Refresh-synchronized hammerers.
//!
//! DDR5 DIMMs run their in-DRAM mitigation when a refresh command arrives. Phoenix aligns
//! every tREFI worth of aggressor reads with the refresh commands issued by the memory
//! controller. Refreshes are observed as a latency spike when timing a read of a row in
//! one of the targeted banks (a *sync row*).
//!
//! Two strategies implement [`phoenix_core::hammerer::Hammering`]:
//!
//! - [`SeqSync`] waits for a refresh before every tREFI window.
//! - [`SelfSync`] synchronizes once and then checks for a refresh after every window. If
//!   none shows up within the self-sync threshold, it assumes one was missed and corrects
//!   its anchor instead of stalling.
//!
//! [`RefSync`] wraps both, selected at startup by a [`HammerStrategy`].

#![warn(missing_docs)]

mod probe;
mod self_sync;
mod seq_sync;

use phoenix_core::hammerer::{HammerJob, Hammering, SyncStats};
use phoenix_core::memory::AccessTimer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self_sync::{SelfSync, SelfSyncConfig};
pub use seq_sync::{SeqSync, SeqSyncConfig};

/// Default bound on the probes spent waiting for a single refresh.
pub const DEFAULT_MAX_SYNC_PROBES: usize = 4096;

/// Errors preventing a job from running.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The job has no rows to detect refreshes on
    #[error("no sync rows given, cannot detect refresh commands")]
    NoSyncRows,
}

/// Available synchronization strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HammerStrategy {
    /// [`SelfSync`]
    SelfSync,
    /// [`SeqSync`]
    SeqSync,
}

/// A hammerer chosen by [`HammerStrategy`].
pub enum RefSync<T: AccessTimer> {
    /// Self-synchronizing hammerer
    SelfSync(SelfSync<T>),
    /// Sequentially synchronizing hammerer
    SeqSync(SeqSync<T>),
}

impl<T: AccessTimer> RefSync<T> {
    /// Creates the hammerer for `strategy`.
    ///
    /// `drift_correction` only applies to [`HammerStrategy::SelfSync`].
    pub fn new(
        strategy: HammerStrategy,
        timer: T,
        drift_correction: u64,
        max_sync_probes: usize,
    ) -> Self {
        match strategy {
            HammerStrategy::SelfSync => RefSync::SelfSync(SelfSync::new(
                timer,
                SelfSyncConfig {
                    drift_correction,
                    max_sync_probes,
                },
            )),
            HammerStrategy::SeqSync => {
                RefSync::SeqSync(SeqSync::new(timer, SeqSyncConfig { max_sync_probes }))
            }
        }
    }

    /// The strategy of this hammerer.
    pub fn strategy(&self) -> HammerStrategy {
        match self {
            RefSync::SelfSync(_) => HammerStrategy::SelfSync,
            RefSync::SeqSync(_) => HammerStrategy::SeqSync,
        }
    }
}

impl<T: AccessTimer> Hammering for RefSync<T> {
    type Error = SyncError;

    fn hammer(&self, job: &HammerJob) -> Result<SyncStats, Self::Error> {
        match self {
            RefSync::SelfSync(h) => h.hammer(job),
            RefSync::SeqSync(h) => h.hammer(job),
        }
    }
}

/// A simulated DIMM for driving the hammerers without hardware.
#[cfg(test)]
pub(crate) mod sim {
    use std::cell::{Cell, RefCell};

    use phoenix_core::memory::{AccessTimer, AggressorPtr};

    pub(crate) const ACCESS_CYCLES: u64 = 50;
    pub(crate) const PROBE_CYCLES: u64 = 100;
    pub(crate) const REFRESH_LATENCY: u64 = 2000;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Event {
        Access(usize),
        Refresh,
    }

    /// Issues a refresh every `period` cycles, or never.
    pub(crate) struct SimDram {
        clock: Cell<u64>,
        period: Option<u64>,
        next_refresh: Cell<u64>,
        pub(crate) events: RefCell<Vec<Event>>,
    }

    impl SimDram {
        pub(crate) fn new(period: Option<u64>) -> Self {
            SimDram {
                clock: Cell::new(0),
                period,
                next_refresh: Cell::new(period.unwrap_or(u64::MAX)),
                events: RefCell::new(vec![]),
            }
        }

        fn tick(&self, cycles: u64) -> u64 {
            self.clock.set(self.clock.get() + cycles);
            self.clock.get()
        }
    }

    impl AccessTimer for &SimDram {
        fn now(&self) -> u64 {
            self.clock.get()
        }

        unsafe fn access(&self, ptr: AggressorPtr) {
            self.tick(ACCESS_CYCLES);
            self.events.borrow_mut().push(Event::Access(ptr as usize));
        }

        unsafe fn timed_access(&self, _ptr: AggressorPtr) -> u64 {
            let now = self.tick(PROBE_CYCLES);
            let Some(period) = self.period else {
                return PROBE_CYCLES;
            };
            if now < self.next_refresh.get() {
                return PROBE_CYCLES;
            }
            self.next_refresh.set((now / period + 1) * period);
            self.events.borrow_mut().push(Event::Refresh);
            REFRESH_LATENCY
        }
    }
}
