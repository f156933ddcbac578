use phoenix::bit_flips::{Checkable, DataPattern, Initializable};
use phoenix::memory::{Allocation, DimmConfig, DramAddr, MappedDimm, PhysAddr};
use phoenix::pattern::{PatternAlgorithm, PatternBuilder, PatternParams, Targets};
use phoenix::util::Size::GiB;
use phoenix::{FuzzConfig, Phoenix};
use phoenix_dummy::Dummy;

const CONFIG_FILE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dimm-config.example.json");

fn mapped_dimm() -> anyhow::Result<MappedDimm> {
    let config = DimmConfig::from_jsonfile(CONFIG_FILE)?;
    let mem_config = config.mem_configuration()?;
    let allocation = Allocation::anonymous(1, PhysAddr::new(0))?;
    Ok(MappedDimm::new(mem_config, allocation, config.ranks, GiB(config.size_gib))?)
}

#[test]
fn test_mapping_round_trip() -> anyhow::Result<()> {
    let config = DimmConfig::from_jsonfile(CONFIG_FILE)?;
    let mem_config = config.mem_configuration()?;
    assert_eq!(mem_config.subchannels(), 2);
    assert_eq!(mem_config.bank_groups(), 8);
    assert_eq!(mem_config.banks(), 4);
    assert_eq!(mem_config.capacity().gib(), 16);

    for addr in [
        DramAddr::new(0, 0, 0, 0, 0, 0),
        DramAddr::new(1, 0, 7, 3, 2047, 8191),
        DramAddr::new(0, 0, 5, 2, 32767, 4096),
    ] {
        let phys = addr.to_phys(&mem_config);
        assert_eq!(DramAddr::from_phys(phys, &mem_config), addr);
    }
    Ok(())
}

#[test]
fn test_unhammered_victims_hold_their_fill() -> anyhow::Result<()> {
    let dimm = mapped_dimm()?;
    let targets = Targets {
        subchannels: vec![0],
        ranks: vec![0],
        bank_groups: vec![0, 1, 2, 3],
        banks: vec![0],
    };
    let builder = PatternBuilder::new(PatternAlgorithm::SkhMod128);
    let pattern = builder.assemble_multi_bank_pattern(
        dimm.config(),
        &targets,
        &PatternParams {
            base_row: 0,
            reads_per_trefi: 88,
            column_stride: 512,
            aggressor_spacing: 8,
            trefi_offset_per_bank: 16,
        },
    )?;

    dimm.initialize_data_pattern(&pattern.aggressor_rows(), DataPattern::AGGRESSOR)?;
    dimm.initialize_data_pattern(&pattern.victim_rows(), DataPattern::VICTIM)?;
    let flips = dimm.collect_bit_flips(&pattern.victim_rows(), DataPattern::VICTIM)?;
    assert!(flips.is_empty());
    Ok(())
}

#[test]
fn test_fuzz_with_dummy_hammerer() -> anyhow::Result<()> {
    let dimm = mapped_dimm()?;
    // row 1 is a victim of the pattern based at row 0
    let victim = DramAddr::new(0, 0, 0, 0, 1, 0);
    let flip_addr = dimm.resolve(&victim)?;

    let config = FuzzConfig {
        targets: Targets {
            subchannels: vec![0],
            ranks: vec![0],
            bank_groups: vec![0],
            banks: vec![0],
        },
        aggressor_rows: 0..1,
        aggressor_spacing: 8,
        column_stride: 512,
        trefi_offset_per_bank: 16,
        reads_per_trefi: vec![86, 88],
        self_sync_thresholds: vec![23_000, 24_000],
        ref_threshold: 1150,
        pattern_repetitions: 16,
        sync_row_start: 512,
        sync_row_count: 8,
        aggressor_fill: DataPattern::AGGRESSOR,
        victim_fill: DataPattern::VICTIM,
    };
    let mut phoenix = Phoenix::builder()
        .dimm(&dimm)
        .hammerer(Dummy::new(flip_addr))
        .pattern_builder(PatternBuilder::new(PatternAlgorithm::SkhMod128))
        .config(config)
        .build()?;
    let summary = phoenix.run()?;

    assert_eq!(summary.iterations, 4);
    assert_eq!(summary.total_flips, 4);
    assert_eq!(summary.total_stats().windows, 4 * 16);
    Ok(())
}
