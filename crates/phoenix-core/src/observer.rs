//! Hooks notified around every fuzz iteration.

use crate::bit_flips::BitFlip;
use crate::pattern::HammerPattern;

/// The parameters of one fuzz iteration.
#[derive(Debug, Clone, Copy)]
pub struct FuzzPoint<'a> {
    /// Zero-based iteration index
    pub iteration: usize,
    /// Total iterations of the run
    pub total_iterations: usize,
    /// Reads per tREFI and bank
    pub reads_per_trefi: usize,
    /// Self-sync threshold in cycles
    pub self_sync_threshold: u64,
    /// Base row of the first aggressor pair
    pub agg_base_row: usize,
    /// The assembled pattern
    pub pattern: &'a HammerPattern,
}

/// Receives iteration events from [`crate::fuzz::Phoenix`].
///
/// Observers cannot fail the run; implementations log their own errors.
pub trait HammerObserver {
    /// Called after the pattern is assembled and initialized, before hammering.
    fn on_pre_iteration(&mut self, _point: &FuzzPoint) {}

    /// Called with the flips collected after hammering.
    fn on_post_iteration(&mut self, _point: &FuzzPoint, _flips: &[BitFlip]) {}
}

/// Forwards events to every registered observer, in registration order.
#[derive(Default)]
pub struct FanOutObserver {
    observers: Vec<Box<dyn HammerObserver>>,
}

impl FanOutObserver {
    /// An observer without sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` after the existing ones.
    pub fn add(&mut self, observer: Box<dyn HammerObserver>) {
        self.observers.push(observer);
    }

    /// Builder-style [`FanOutObserver::add`].
    pub fn with(mut self, observer: impl HammerObserver + 'static) -> Self {
        self.add(Box::new(observer));
        self
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl HammerObserver for FanOutObserver {
    fn on_pre_iteration(&mut self, point: &FuzzPoint) {
        for o in self.observers.iter_mut() {
            o.on_pre_iteration(point);
        }
    }

    fn on_post_iteration(&mut self, point: &FuzzPoint, flips: &[BitFlip]) {
        for o in self.observers.iter_mut() {
            o.on_post_iteration(point, flips);
        }
    }
}
