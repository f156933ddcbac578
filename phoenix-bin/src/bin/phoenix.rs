use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use phoenix_bin::dimm;
use phoenix_bin::init_logging_with_progress;
use phoenix_bin::observer::{CsvWriterObserver, ProgressObserver};
use phoenix_bin::range::SweepRange;
use phoenix_core::allocator::alloc_memory;
use phoenix_core::bit_flips::DataPattern;
use phoenix_core::memory::{DefaultAccessTimer, DimmConfig, MappedDimm};
use phoenix_core::pattern::{PatternAlgorithm, PatternBuilder, PatternSchedule, Targets};
use phoenix_core::util::{Size, elevate_to_max_priority, is_root, pin_to_core};
use phoenix_core::{FuzzConfig, Phoenix};
use phoenix_hugepage::HugepageAllocator;
use phoenix_refsync::{HammerStrategy, RefSync};
use serde::Serialize;

/// Hammer function names accepted by `--hammer-fn`.
#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
enum HammerFn {
    #[value(name = "self_sync")]
    SelfSync,
    #[value(name = "seq_sync")]
    SeqSync,
}

impl From<HammerFn> for HammerStrategy {
    fn from(f: HammerFn) -> Self {
        match f {
            HammerFn::SelfSync => HammerStrategy::SelfSync,
            HammerFn::SeqSync => HammerStrategy::SeqSync,
        }
    }
}

/// Pattern names accepted by `--pattern`.
#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
enum PatternId {
    #[value(name = "skh_mod128")]
    SkhMod128,
    #[value(name = "skh_mod2608")]
    SkhMod2608,
}

impl From<PatternId> for PatternAlgorithm {
    fn from(p: PatternId) -> Self {
        match p {
            PatternId::SkhMod128 => PatternAlgorithm::SkhMod128,
            PatternId::SkhMod2608 => PatternAlgorithm::SkhMod2608,
        }
    }
}

/// CLI arguments for the `phoenix` binary.
#[derive(Debug, Parser, Serialize, Clone)]
#[clap(about = "Refresh-synchronized, self-correcting Rowhammer fuzzer for DDR5")]
struct CliArgs {
    /// CPU core to pin the hammering thread to.
    #[clap(long = "core", short = 'c', default_value = "5")]
    core: usize,
    /// Number of sync addresses probed to detect refresh commands.
    #[clap(long = "sync-rows", default_value = "8")]
    sync_rows: usize,
    /// First row used for sync addresses, relative to the allocation.
    #[clap(long = "sync-row-start", default_value = "512")]
    sync_row_start: usize,
    /// Self-sync thresholds in cycles (N or start:end:step, end inclusive).
    #[clap(long = "self-sync-cycles", default_value = "23000:26000:1000")]
    self_sync_cycles: SweepRange,
    /// Reads per tREFI and bank (N or start:end:step, end inclusive).
    #[clap(long = "reads-per-trefi", default_value = "86:92:2")]
    reads_per_trefi: SweepRange,
    /// Number of tREFI windows hammered per iteration.
    #[clap(long = "trefi-repeat", default_value = "2048000")]
    trefi_repeat: usize,
    /// Sync-row latency in cycles above which a refresh is assumed.
    #[clap(long = "ref-threshold", default_value = "1150")]
    ref_threshold: u64,
    /// Refresh synchronization strategy.
    #[clap(long = "hammer-fn", value_enum, default_value = "self_sync")]
    hammer_fn: HammerFn,
    /// Hammer pattern.
    #[clap(long = "pattern", short = 'p', value_enum, default_value = "skh_mod128")]
    pattern: PatternId,
    /// First base row of the first aggressor pair, relative to the allocation.
    #[clap(long = "aggressor-row-start", default_value = "0")]
    aggressor_row_start: usize,
    /// Base row at which the sweep stops (exclusive).
    #[clap(long = "aggressor-row-end", default_value = "8")]
    aggressor_row_end: usize,
    /// Row distance between the four aggressor pairs.
    #[clap(long = "aggressor-spacing", default_value = "8")]
    aggressor_spacing: usize,
    /// Column distance in bytes between reads of the same row.
    #[clap(long = "column-stride", default_value = "512")]
    column_stride: usize,
    /// tREFI offset of the pattern per additional bank.
    #[clap(long = "pattern-trefi-offset-per-bank", default_value = "16")]
    pattern_trefi_offset_per_bank: usize,
    /// Target subchannels.
    #[clap(long = "target-subch", short = 'S', num_args = 1.., default_values_t = [0])]
    target_subch: Vec<usize>,
    /// Target ranks.
    #[clap(long = "target-ranks", short = 'R', num_args = 1.., default_values_t = [0])]
    target_ranks: Vec<usize>,
    /// Target bank groups.
    #[clap(long = "target-bg", short = 'G', num_args = 1.., default_values_t = [0, 1, 2, 3])]
    target_bg: Vec<usize>,
    /// Target banks within each bank group.
    #[clap(long = "target-banks", short = 'B', num_args = 1.., default_values_t = [0])]
    target_banks: Vec<usize>,
    /// Output CSV file for bit flips.
    #[clap(long = "csv", default_value = "results/bit_flips.csv")]
    csv: String,
    /// The DIMM address mapping.
    #[clap(long = "dimm-config", default_value = "config/dimm-config.json")]
    dimm_config: String,
    /// Rank count of the DIMM, detected with dmidecode if omitted.
    #[clap(long = "dimm-ranks")]
    dimm_ranks: Option<usize>,
    /// Size of the DIMM in GiB, detected with dmidecode if omitted.
    #[clap(long = "dimm-size-gib")]
    dimm_size_gib: Option<usize>,
    /// Calibrated interleaving schedule (JSON) replacing the built-in one.
    #[clap(long = "schedule")]
    schedule: Option<String>,
    /// Cycles the self-sync anchor is moved back after a missed refresh.
    #[clap(long = "drift-correction", default_value = "0")]
    drift_correction: u64,
    /// Probes spent waiting for a single refresh.
    #[clap(long = "max-sync-probes", default_value = "4096")]
    max_sync_probes: usize,
}

fn cpu_model() -> Option<String> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, model)| model.trim().to_owned())
}

fn main() -> anyhow::Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();

    match cpu_model() {
        Some(model) => info!("CPU model: {}", model),
        None => warn!("Failed to detect CPU model"),
    }
    if !is_root() {
        bail!("This program must be run with sudo/root privileges");
    }
    match elevate_to_max_priority() {
        Ok(priority) => info!("Running with SCHED_FIFO priority {}", priority),
        Err(e) => warn!("Running without elevated priority: {}", e),
    }
    info!("CLI args: {}", serde_json::to_string(&args)?);

    let (ranks, size_gib) = match (args.dimm_ranks, args.dimm_size_gib) {
        (Some(ranks), Some(size_gib)) => (ranks, size_gib),
        (ranks, size_gib) => {
            let (detected_ranks, detected_gib) = dimm::detect()?;
            (
                ranks.unwrap_or(detected_ranks),
                size_gib.unwrap_or(detected_gib),
            )
        }
    };
    info!("Using DIMM with {} rank(s), {} GiB", ranks, size_gib);

    let dimm_config = DimmConfig::from_jsonfile(&args.dimm_config)
        .with_context(|| format!("Failed to load {}", args.dimm_config))?;
    info!("Using address mapping {}", dimm_config.name);
    let mem_config = dimm_config.mem_configuration()?;

    let mut allocator = HugepageAllocator::new();
    let allocation = alloc_memory(&mut allocator, 1)?;
    let dimm = MappedDimm::new(mem_config, allocation, ranks, Size::GiB(size_gib))?;

    let hammerer = RefSync::new(
        args.hammer_fn.into(),
        DefaultAccessTimer::new()?,
        args.drift_correction,
        args.max_sync_probes,
    );
    let algorithm = PatternAlgorithm::from(args.pattern);
    let pattern_builder = match &args.schedule {
        Some(path) => {
            let schedule = PatternSchedule::from_jsonfile(path)
                .with_context(|| format!("Failed to load schedule {}", path))?;
            if schedule.algorithm != algorithm {
                bail!(
                    "Schedule {} is for {}, but pattern {} was selected",
                    path,
                    schedule.algorithm,
                    algorithm
                );
            }
            PatternBuilder::with_schedule(schedule)?
        }
        None => PatternBuilder::new(algorithm),
    };
    info!(
        "Using {:?} hammerer with pattern {}",
        hammerer.strategy(),
        pattern_builder.algorithm()
    );

    let config = FuzzConfig {
        targets: Targets {
            subchannels: args.target_subch.clone(),
            ranks: args.target_ranks.clone(),
            bank_groups: args.target_bg.clone(),
            banks: args.target_banks.clone(),
        },
        aggressor_rows: args.aggressor_row_start..args.aggressor_row_end,
        aggressor_spacing: args.aggressor_spacing,
        column_stride: args.column_stride,
        trefi_offset_per_bank: args.pattern_trefi_offset_per_bank,
        reads_per_trefi: args.reads_per_trefi.values_usize(),
        self_sync_thresholds: args.self_sync_cycles.values(),
        ref_threshold: args.ref_threshold,
        pattern_repetitions: args.trefi_repeat,
        sync_row_start: args.sync_row_start,
        sync_row_count: args.sync_rows,
        aggressor_fill: DataPattern::AGGRESSOR,
        victim_fill: DataPattern::VICTIM,
    };
    let total_iterations = config.total_iterations();
    let csv = CsvWriterObserver::new(&args.csv)?;
    let ui = ProgressObserver::new(&progress, total_iterations);

    let mut phoenix = Phoenix::builder()
        .dimm(&dimm)
        .hammerer(hammerer)
        .pattern_builder(pattern_builder)
        .observer(ui)
        .observer(csv)
        .config(config)
        .build()?;

    pin_to_core(args.core).with_context(|| format!("Failed to pin to core {}", args.core))?;

    info!("Sync rows:");
    for row in phoenix.config().sync_rows() {
        info!("  {}", row);
    }

    let summary = phoenix.run()?;
    let stats = summary.total_stats();
    info!(
        "Done: {} iteration(s), {} flipped byte(s), {} refreshes detected, {} missed, {} drift corrections",
        summary.iterations,
        summary.total_flips,
        stats.refreshes_detected,
        stats.missed_refreshes,
        stats.drift_corrections
    );
    info!("Bit flips written to {}", args.csv);
    Ok(())
}
