//! The fuzzing loop.
//!
//! [`Phoenix`] sweeps aggressor base rows, reads per tREFI and self-sync thresholds. Every
//! combination is one iteration: assemble the pattern, fill aggressors and victims,
//! hammer, collect flips and report them to the observers.

use std::ops::Range;
use std::time::Instant;

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use crate::bit_flips::{Checkable, DataPattern, Initializable};
use crate::hammerer::{HammerJob, Hammering, SyncParams, SyncStats};
use crate::memory::{DramAddr, MappedDimm, MemoryError};
use crate::observer::{FanOutObserver, FuzzPoint, HammerObserver};
use crate::pattern::{PatternBuilder, PatternError, PatternParams, Targets, sync_rows};

/// Sweep and placement parameters of a fuzz run.
#[derive(Debug, Clone, Serialize)]
pub struct FuzzConfig {
    /// Banks hammered in every iteration
    pub targets: Targets,
    /// Base rows of the first aggressor pair, end exclusive
    pub aggressor_rows: Range<usize>,
    /// Row distance between aggressor pairs
    pub aggressor_spacing: usize,
    /// Column distance between reads of a row, in bytes
    pub column_stride: usize,
    /// tREFI shift between consecutive banks
    pub trefi_offset_per_bank: usize,
    /// Reads per tREFI to sweep
    pub reads_per_trefi: Vec<usize>,
    /// Self-sync thresholds to sweep, in cycles
    pub self_sync_thresholds: Vec<u64>,
    /// Sync-row latency indicating a refresh, in cycles
    pub ref_threshold: u64,
    /// tREFI windows hammered per iteration
    pub pattern_repetitions: usize,
    /// First sync row
    pub sync_row_start: usize,
    /// Number of sync addresses
    pub sync_row_count: usize,
    /// Fill of the aggressor rows
    pub aggressor_fill: DataPattern,
    /// Fill of the victim rows, and the value flips are checked against
    pub victim_fill: DataPattern,
}

/// Invalid [`FuzzConfig`].
#[derive(Debug, Error)]
pub enum FuzzConfigError {
    /// A sweep has no values
    #[error("the {0} sweep is empty")]
    EmptySweep(&'static str),
    /// The aggressor row range is empty
    #[error("aggressor row range {start}..{end} is empty")]
    EmptyRowRange {
        /// First base row
        start: usize,
        /// End of the range
        end: usize,
    },
    /// Zero tREFI windows per iteration
    #[error("pattern repetitions must be greater than 0")]
    ZeroRepetitions,
    /// No sync rows requested
    #[error("at least one sync row is required")]
    NoSyncRows,
    /// A pattern or sync row is not backed by the allocation
    #[error("row {row} is not backed by the allocation, which backs rows 0..{backed_rows}")]
    UnbackedRow {
        /// First unbacked row
        row: usize,
        /// Rows backed by the allocation
        backed_rows: usize,
    },
    /// The pattern cannot be placed
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

impl FuzzConfig {
    /// Checks the sweeps and that every pattern and sync row is backed by `dimm`.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self, dimm: &MappedDimm) -> Result<(), FuzzConfigError> {
        let mem_config = dimm.config();
        if self.reads_per_trefi.is_empty() {
            return Err(FuzzConfigError::EmptySweep("reads per tREFI"));
        }
        if self.self_sync_thresholds.is_empty() {
            return Err(FuzzConfigError::EmptySweep("self-sync threshold"));
        }
        if self.aggressor_rows.is_empty() {
            return Err(FuzzConfigError::EmptyRowRange {
                start: self.aggressor_rows.start,
                end: self.aggressor_rows.end,
            });
        }
        if self.pattern_repetitions == 0 {
            return Err(FuzzConfigError::ZeroRepetitions);
        }
        if self.sync_row_count == 0 {
            return Err(FuzzConfigError::NoSyncRows);
        }
        self.targets.validate(mem_config)?;
        if self.reads_per_trefi.contains(&0) {
            return Err(PatternError::ZeroReads.into());
        }
        if self.aggressor_spacing == 0 {
            return Err(PatternError::ZeroSpacing.into());
        }
        let rows = mem_config.rows();
        let last = self.params(self.aggressor_rows.end - 1, 1);
        match last.top_row() {
            Some(row) if row < rows => {}
            row => {
                return Err(PatternError::RowOutOfRange {
                    row: row.unwrap_or(usize::MAX),
                    rows,
                }
                .into());
            }
        }
        if let Some(last_sync) = self.sync_rows().last().filter(|a| a.row >= rows) {
            return Err(PatternError::RowOutOfRange {
                row: last_sync.row,
                rows,
            }
            .into());
        }

        // victims reach one row below the first base row and up to the top row
        let first = self.aggressor_rows.start.saturating_sub(1);
        let top = last.top_row().unwrap_or(usize::MAX);
        let pattern_rows = self
            .targets
            .bank_addrs()
            .flat_map(|bank| (first..=top).map(move |row| bank.at(row, 0)));
        for addr in pattern_rows.chain(self.sync_rows()) {
            let row_end = addr.with_column(mem_config.row_bytes() - 1);
            if dimm.to_virt(&addr).is_none() || dimm.to_virt(&row_end).is_none() {
                return Err(FuzzConfigError::UnbackedRow {
                    row: addr.row,
                    backed_rows: dimm.backed_rows(),
                });
            }
        }
        Ok(())
    }

    /// Number of iterations of a run.
    pub fn total_iterations(&self) -> usize {
        self.aggressor_rows.len() * self.reads_per_trefi.len() * self.self_sync_thresholds.len()
    }

    /// Sync addresses probed in every iteration.
    pub fn sync_rows(&self) -> Vec<DramAddr> {
        sync_rows(&self.targets, self.sync_row_start, self.sync_row_count)
    }

    fn params(&self, base_row: usize, reads_per_trefi: usize) -> PatternParams {
        PatternParams {
            base_row,
            reads_per_trefi,
            column_stride: self.column_stride,
            aggressor_spacing: self.aggressor_spacing,
            trefi_offset_per_bank: self.trefi_offset_per_bank,
        }
    }
}

/// Errors aborting a fuzz run.
#[derive(Debug, Error)]
pub enum FuzzError<HE: std::error::Error> {
    /// Pattern assembly failed
    #[error(transparent)]
    Pattern(#[from] PatternError),
    /// A pattern address is not backed by the allocation
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// The hammerer failed
    #[error("hammering failed: {0}")]
    Hammering(HE),
}

/// Outcome of a completed run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FuzzSummary {
    /// Iterations executed
    pub iterations: usize,
    /// Flipped bytes over all iterations
    pub total_flips: usize,
    /// Sync statistics of every iteration
    pub stats: Vec<SyncStats>,
}

impl FuzzSummary {
    /// Sync statistics summed over all iterations.
    pub fn total_stats(&self) -> SyncStats {
        let mut total = SyncStats::default();
        for s in &self.stats {
            total.merge(s);
        }
        total
    }
}

/// Drives a fuzz run over a mapped DIMM.
///
/// Use [`Phoenix::builder()`] to construct an instance.
pub struct Phoenix<'a, H: Hammering> {
    dimm: &'a MappedDimm,
    hammerer: H,
    pattern_builder: PatternBuilder,
    observer: FanOutObserver,
    config: FuzzConfig,
}

impl<'a, H: Hammering> Phoenix<'a, H> {
    /// Creates a new builder.
    pub fn builder() -> PhoenixBuilder<'a, H> {
        PhoenixBuilder::default()
    }

    /// The run configuration.
    pub fn config(&self) -> &FuzzConfig {
        &self.config
    }

    /// Runs every iteration of the sweep.
    ///
    /// Iterations are ordered by base row, then reads per tREFI, then self-sync threshold.
    ///
    /// # Errors
    ///
    /// Assembly, resolution and hammering errors abort the run.
    pub fn run(&mut self) -> Result<FuzzSummary, FuzzError<H::Error>> {
        let config = &self.config;
        let mem_config = self.dimm.config();
        let total_iterations = config.total_iterations();
        let sync_rows = config.sync_rows();
        info!(
            "Fuzzing {} iteration(s) of {} over {} bank(s)",
            total_iterations,
            self.pattern_builder.algorithm(),
            config.targets.len()
        );
        let start = Instant::now();
        let mut summary = FuzzSummary::default();
        for base_row in config.aggressor_rows.clone() {
            for &reads_per_trefi in &config.reads_per_trefi {
                let pattern = self.pattern_builder.assemble_multi_bank_pattern(
                    mem_config,
                    &config.targets,
                    &config.params(base_row, reads_per_trefi),
                )?;
                let aggressors = pattern.aggressor_rows();
                let victims = pattern.victim_rows();
                let mut job = HammerJob::resolve(
                    &pattern,
                    &sync_rows,
                    self.dimm,
                    SyncParams {
                        ref_threshold: config.ref_threshold,
                        pattern_repetitions: config.pattern_repetitions,
                        self_sync_threshold: 0,
                    },
                )?;
                for &self_sync_threshold in &config.self_sync_thresholds {
                    let point = FuzzPoint {
                        iteration: summary.iterations,
                        total_iterations,
                        reads_per_trefi,
                        self_sync_threshold,
                        agg_base_row: base_row,
                        pattern: &pattern,
                    };
                    debug!(
                        "Iteration {}/{}: base row {}, {} reads/tREFI, sync threshold {}",
                        point.iteration + 1,
                        total_iterations,
                        base_row,
                        reads_per_trefi,
                        self_sync_threshold
                    );
                    self.dimm
                        .initialize_data_pattern(&aggressors, config.aggressor_fill)?;
                    self.dimm
                        .initialize_data_pattern(&victims, config.victim_fill)?;
                    self.observer.on_pre_iteration(&point);

                    job.set_params(SyncParams {
                        self_sync_threshold,
                        ..*job.params()
                    });
                    let stats = self.hammerer.hammer(&job).map_err(FuzzError::Hammering)?;
                    debug!("Sync: {:?}", stats);

                    let flips = self.dimm.collect_bit_flips(&victims, config.victim_fill)?;
                    self.observer.on_post_iteration(&point, &flips);

                    summary.iterations += 1;
                    summary.total_flips += flips.len();
                    summary.stats.push(stats);
                }
            }
        }
        info!(
            "Fuzzing finished after {:?}: {} iteration(s), {} flipped byte(s)",
            start.elapsed(),
            summary.iterations,
            summary.total_flips
        );
        Ok(summary)
    }
}

/// Builder for [`Phoenix`].
pub struct PhoenixBuilder<'a, H: Hammering> {
    dimm: Option<&'a MappedDimm>,
    hammerer: Option<H>,
    pattern_builder: Option<PatternBuilder>,
    observer: FanOutObserver,
    config: Option<FuzzConfig>,
}

impl<H: Hammering> Default for PhoenixBuilder<'_, H> {
    fn default() -> Self {
        PhoenixBuilder {
            dimm: None,
            hammerer: None,
            pattern_builder: None,
            observer: FanOutObserver::new(),
            config: None,
        }
    }
}

impl<'a, H: Hammering> PhoenixBuilder<'a, H> {
    /// The memory to hammer.
    pub fn dimm(mut self, dimm: &'a MappedDimm) -> Self {
        self.dimm = Some(dimm);
        self
    }

    /// The hammering strategy.
    pub fn hammerer(mut self, hammerer: H) -> Self {
        self.hammerer = Some(hammerer);
        self
    }

    /// The pattern family and schedule.
    pub fn pattern_builder(mut self, pattern_builder: PatternBuilder) -> Self {
        self.pattern_builder = Some(pattern_builder);
        self
    }

    /// Adds an observer; observers are notified in the order they are added.
    pub fn observer(mut self, observer: impl HammerObserver + 'static) -> Self {
        self.observer.add(Box::new(observer));
        self
    }

    /// The sweep parameters.
    pub fn config(mut self, config: FuzzConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Validates the configuration against the DIMM and builds the driver.
    ///
    /// # Errors
    ///
    /// Fails if a component is missing or the configuration does not fit the DIMM.
    pub fn build(self) -> Result<Phoenix<'a, H>, BuildError> {
        let dimm = self.dimm.ok_or(BuildError::Dimm)?;
        let config = self.config.ok_or(BuildError::Config)?;
        config.validate(dimm)?;
        Ok(Phoenix {
            dimm,
            hammerer: self.hammerer.ok_or(BuildError::Hammerer)?,
            pattern_builder: self.pattern_builder.ok_or(BuildError::PatternBuilder)?,
            observer: self.observer,
            config,
        })
    }
}

/// Errors of [`PhoenixBuilder::build`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// No DIMM was set.
    #[error("No DIMM specified")]
    Dimm,
    /// No hammerer was set.
    #[error("No hammerer specified")]
    Hammerer,
    /// No pattern builder was set.
    #[error("No pattern builder specified")]
    PatternBuilder,
    /// No fuzz config was set.
    #[error("No fuzz config specified")]
    Config,
    /// The fuzz config does not fit the DIMM.
    #[error("Invalid config: {0}")]
    InvalidConfig(#[from] FuzzConfigError),
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::bit_flips::BitFlip;
    use crate::memory::test_util::{example_config, example_dimm};
    use crate::memory::{Allocation, PhysAddr};
    use crate::pattern::PatternAlgorithm;
    use crate::util::Size;

    fn config() -> FuzzConfig {
        FuzzConfig {
            targets: Targets {
                subchannels: vec![0],
                ranks: vec![0],
                bank_groups: vec![0, 1],
                banks: vec![0],
            },
            aggressor_rows: 0..2,
            aggressor_spacing: 8,
            column_stride: 512,
            trefi_offset_per_bank: 16,
            reads_per_trefi: vec![4, 6],
            self_sync_thresholds: vec![23_000, 24_000, 25_000],
            ref_threshold: 1150,
            pattern_repetitions: 4,
            sync_row_start: 512,
            sync_row_count: 8,
            aggressor_fill: DataPattern::AGGRESSOR,
            victim_fill: DataPattern::VICTIM,
        }
    }

    /// Records the jobs it is given and flips one victim byte per job.
    struct Recording<'a> {
        dimm: &'a MappedDimm,
        jobs: Rc<RefCell<Vec<(usize, u64)>>>,
    }

    impl Hammering for Recording<'_> {
        type Error = std::convert::Infallible;

        fn hammer(&self, job: &HammerJob) -> Result<SyncStats, Self::Error> {
            self.jobs
                .borrow_mut()
                .push((job.trefi(0).len(), job.params().self_sync_threshold));
            let victim = self
                .dimm
                .to_virt(&DramAddr::new(0, 0, 1, 0, 0, 0))
                .expect("backed");
            unsafe { *victim ^= 1 };
            Ok(SyncStats {
                windows: job.params().pattern_repetitions,
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct Points(Rc<RefCell<Vec<(usize, usize, usize, u64, usize)>>>);

    impl HammerObserver for Points {
        fn on_post_iteration(&mut self, point: &FuzzPoint, flips: &[BitFlip]) {
            self.0.borrow_mut().push((
                point.iteration,
                point.agg_base_row,
                point.reads_per_trefi,
                point.self_sync_threshold,
                flips.len(),
            ));
        }
    }

    #[test]
    fn sweep_runs_rows_then_reads_then_thresholds() -> anyhow::Result<()> {
        let dimm = example_dimm()?;
        let jobs = Rc::new(RefCell::new(vec![]));
        let points = Points::default();
        let seen = points.0.clone();
        let mut phoenix = Phoenix::builder()
            .dimm(&dimm)
            .hammerer(Recording {
                dimm: &dimm,
                jobs: jobs.clone(),
            })
            .pattern_builder(PatternBuilder::new(PatternAlgorithm::SkhMod128))
            .observer(points)
            .config(config())
            .build()?;
        assert_eq!(phoenix.config().total_iterations(), 12);
        let summary = phoenix.run()?;

        assert_eq!(summary.iterations, 12);
        // base row 1 hammers row 1 of bank group 1, whose row 0 is a victim
        assert_eq!(summary.total_flips, 6);
        assert_eq!(summary.total_stats().windows, 48);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 12);
        assert_eq!(seen[0], (0, 0, 4, 23_000, 0));
        assert_eq!(seen[2], (2, 0, 4, 25_000, 0));
        assert_eq!(seen[3], (3, 0, 6, 23_000, 0));
        assert_eq!(seen[6], (6, 1, 4, 23_000, 1));
        assert!(seen[..6].iter().all(|p| p.4 == 0));
        assert!(seen[6..].iter().all(|p| p.4 == 1));

        let jobs = jobs.borrow();
        assert_eq!(jobs[0], (4 * 2, 23_000));
        assert_eq!(jobs[4], (6 * 2, 24_000));
        Ok(())
    }

    #[test]
    fn invalid_configs_fail_the_build() -> anyhow::Result<()> {
        let dimm = example_dimm()?;
        let build = |config: FuzzConfig| {
            Phoenix::builder()
                .dimm(&dimm)
                .hammerer(Recording {
                    dimm: &dimm,
                    jobs: Rc::default(),
                })
                .pattern_builder(PatternBuilder::new(PatternAlgorithm::SkhMod128))
                .config(config)
                .build()
                .err()
        };

        let mut c = config();
        c.reads_per_trefi.clear();
        assert!(matches!(
            build(c),
            Some(BuildError::InvalidConfig(FuzzConfigError::EmptySweep(_)))
        ));

        let mut c = config();
        c.aggressor_rows = 4..4;
        assert!(matches!(
            build(c),
            Some(BuildError::InvalidConfig(FuzzConfigError::EmptyRowRange { .. }))
        ));

        let mut c = config();
        c.targets.banks = vec![4];
        assert!(matches!(
            build(c),
            Some(BuildError::InvalidConfig(FuzzConfigError::Pattern(
                PatternError::IndexOutOfRange { .. }
            )))
        ));

        let mut c = config();
        c.aggressor_rows = 0..dimm.config().rows();
        assert!(matches!(
            build(c),
            Some(BuildError::InvalidConfig(FuzzConfigError::Pattern(
                PatternError::RowOutOfRange { .. }
            )))
        ));

        let mut c = config();
        c.sync_row_count = 0;
        assert!(matches!(
            build(c),
            Some(BuildError::InvalidConfig(FuzzConfigError::NoSyncRows))
        ));

        assert!(matches!(
            Phoenix::<Recording>::builder().config(config()).build().err(),
            Some(BuildError::Dimm)
        ));
        Ok(())
    }

    #[test]
    fn unbacked_rows_fail_the_build() -> anyhow::Result<()> {
        let dimm = example_dimm()?;
        let build = |config: FuzzConfig| {
            Phoenix::builder()
                .dimm(&dimm)
                .hammerer(Recording {
                    dimm: &dimm,
                    jobs: Rc::default(),
                })
                .pattern_builder(PatternBuilder::new(PatternAlgorithm::SkhMod128))
                .config(config)
                .build()
                .err()
        };

        // the victim below the first base row is checked too
        let mut c = config();
        c.aggressor_rows = 4000..4001;
        assert!(matches!(
            build(c),
            Some(BuildError::InvalidConfig(FuzzConfigError::UnbackedRow {
                row: 3999,
                backed_rows: 2048
            }))
        ));

        // the top pair of base row 2030 reaches row 2057
        let mut c = config();
        c.aggressor_rows = 2000..2031;
        assert!(matches!(
            build(c),
            Some(BuildError::InvalidConfig(FuzzConfigError::UnbackedRow { row: 2048, .. }))
        ));

        let mut c = config();
        c.sync_row_start = 2047;
        c.sync_row_count = 4;
        assert!(matches!(
            build(c),
            Some(BuildError::InvalidConfig(FuzzConfigError::UnbackedRow { row: 2048, .. }))
        ));
        Ok(())
    }

    #[test]
    fn rows_are_relative_to_a_high_frame() -> anyhow::Result<()> {
        let alloc = Allocation::anonymous(1, PhysAddr::new(5 << 30))?;
        let dimm = MappedDimm::new(example_config(), alloc, 1, Size::GiB(16))?;
        let config = FuzzConfig {
            targets: Targets {
                subchannels: vec![0],
                ranks: vec![0],
                bank_groups: vec![0, 1, 2, 3],
                banks: vec![0],
            },
            aggressor_rows: 0..8,
            reads_per_trefi: vec![88],
            self_sync_thresholds: vec![25_000],
            pattern_repetitions: 2,
            ..config()
        };
        let mut phoenix = Phoenix::builder()
            .dimm(&dimm)
            .hammerer(Recording {
                dimm: &dimm,
                jobs: Rc::default(),
            })
            .pattern_builder(PatternBuilder::new(PatternAlgorithm::SkhMod128))
            .config(config)
            .build()?;
        let summary = phoenix.run()?;
        assert_eq!(summary.iterations, 8);
        // row 0 of bank group 1 is a victim only for base row 1
        assert_eq!(summary.total_flips, 1);
        Ok(())
    }
}
