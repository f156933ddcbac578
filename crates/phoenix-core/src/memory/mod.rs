//! The `memory` module maps between virtual addresses and DRAM coordinates.
//!
//! - [`DramAddr`]: a DDR5 coordinate (subchannel, rank, bank group, bank, row, column).
//! - [`MemConfiguration`]: the XOR address functions of a DIMM and their inverse.
//! - [`DimmConfig`]: the JSON form of the address functions.
//! - [`Allocation`]: a locked superpage mapping with its physical frames.
//! - [`MappedDimm`]: an allocation bound to a mapping, translating in both directions.
//! - [`AccessTimer`]: uncached, timed DRAM accesses used by the hammerers.
//! - [`LinuxPageMap`]: virtual to physical translation through `/proc/self/pagemap`.
mod allocation;
mod dimm_config;
mod dram_addr;
mod mapped_dimm;
mod mem_configuration;
mod timer;
mod virt_to_phys;

pub use self::allocation::Allocation;
pub use self::dimm_config::{BitDef, DimmConfig};
pub use self::dram_addr::DramAddr;
pub use self::mapped_dimm::{MappedDimm, MemoryError};
pub use self::mem_configuration::{ConfigError, MemConfiguration};
#[cfg(target_arch = "x86_64")]
pub use self::timer::DefaultAccessTimer;
pub use self::timer::{AccessTimer, TimerError};
pub use self::virt_to_phys::{LinuxPageMap, LinuxPageMapError, PhysAddr, VirtToPhysResolver};

/// Pointer type for addresses read by the hammering loops.
pub type AggressorPtr = *const u8;

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::util::Size;

    /// Single-rank 16 GiB DDR5 mapping. Rows below 2048 live in the first GiB.
    pub(crate) const EXAMPLE_DIMM: &str = r#"{
        "name": "example 16 GiB 1Rx8",
        "ranks": 1,
        "size_gib": 16,
        "subchannel_bits": [[6, 24, 31]],
        "bank_group_bits": [[13, 19, 26], [15, 20, 27], [16, 21, 28]],
        "bank_bits": [[17, 22, 29], [18, 23, 30]],
        "row_bits": [33, 32, 31, 30, 29, 28, 27, 26, 25, 24, 23, 22, 21, 20, 19],
        "col_bits": [14, 12, 11, 10, 9, 8, 7, 5, 4, 3, 2, 1, 0]
    }"#;

    pub(crate) fn example_config() -> MemConfiguration {
        let dimm: DimmConfig = serde_json::from_str(EXAMPLE_DIMM).expect("valid json");
        dimm.mem_configuration().expect("valid mapping")
    }

    pub(crate) fn example_dimm() -> anyhow::Result<MappedDimm> {
        let alloc = Allocation::anonymous(1, PhysAddr::new(0))?;
        Ok(MappedDimm::new(example_config(), alloc, 1, Size::GiB(16))?)
    }
}
