use crate::memory::{MemConfiguration, PhysAddr};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// DDR5 address with subchannel, rank, bank group, bank, row and column.
///
/// Columns are byte granular. Addresses order lexicographically in field order,
/// which is the order flips are reported in.
///
/// The codec itself works on absolute rows. Addresses handed to or returned by a
/// [`MappedDimm`](crate::memory::MappedDimm) carry rows relative to its allocation.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct DramAddr {
    /// Subchannel number
    pub subchannel: usize,
    /// Rank number
    pub rank: usize,
    /// Bank group number
    pub bank_group: usize,
    /// Bank number within the bank group
    pub bank: usize,
    /// Row number
    pub row: usize,
    /// Byte column within the row
    pub column: usize,
}

impl Display for DramAddr {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(
            fmt,
            "({}, {}, {}, {}, {}, {})",
            self.subchannel, self.rank, self.bank_group, self.bank, self.row, self.column
        )
    }
}

impl DramAddr {
    /// Creates a new DRAM address.
    pub fn new(
        subchannel: usize,
        rank: usize,
        bank_group: usize,
        bank: usize,
        row: usize,
        column: usize,
    ) -> Self {
        DramAddr {
            subchannel,
            rank,
            bank_group,
            bank,
            row,
            column,
        }
    }

    /// Decodes a physical address.
    ///
    /// Bits above the configured address width are ignored.
    pub fn from_phys(phys: PhysAddr, mem_config: &MemConfiguration) -> DramAddr {
        let p = phys.as_usize();
        let mut res = 0;
        for &i in mem_config.dram_mtx.iter() {
            res <<= 1;
            res |= (p & i).count_ones() as usize & 1;
        }
        DramAddr {
            subchannel: (res >> mem_config.sc_shift) & mem_config.sc_mask,
            rank: (res >> mem_config.rk_shift) & mem_config.rk_mask,
            bank_group: (res >> mem_config.bg_shift) & mem_config.bg_mask,
            bank: (res >> mem_config.bk_shift) & mem_config.bk_mask,
            row: (res >> mem_config.row_shift) & mem_config.row_mask,
            column: (res >> mem_config.col_shift) & mem_config.col_mask,
        }
    }

    /// Packs the fields into the linearized DRAM value, masking each to its width.
    pub fn linearize(&self, mem_config: &MemConfiguration) -> usize {
        ((self.subchannel & mem_config.sc_mask) << mem_config.sc_shift)
            | ((self.rank & mem_config.rk_mask) << mem_config.rk_shift)
            | ((self.bank_group & mem_config.bg_mask) << mem_config.bg_shift)
            | ((self.bank & mem_config.bk_mask) << mem_config.bk_shift)
            | ((self.row & mem_config.row_mask) << mem_config.row_shift)
            | ((self.column & mem_config.col_mask) << mem_config.col_shift)
    }

    /// Encodes this address as a physical address.
    pub fn to_phys(&self, mem_config: &MemConfiguration) -> PhysAddr {
        let l = self.linearize(mem_config);
        let mut res = 0;
        for &i in mem_config.addr_mtx.iter() {
            res <<= 1;
            res |= (l & i).count_ones() as usize & 1;
        }
        PhysAddr::new(res)
    }

    /// Whether every field lies within the geometry of `mem_config`.
    pub fn is_valid(&self, mem_config: &MemConfiguration) -> bool {
        self.subchannel < mem_config.subchannels()
            && self.rank < mem_config.ranks()
            && self.bank_group < mem_config.bank_groups()
            && self.bank < mem_config.banks()
            && self.row < mem_config.rows()
            && self.column < mem_config.row_bytes()
    }
}

impl DramAddr {
    /// The same bank and column in another row.
    pub fn with_row(&self, row: usize) -> DramAddr {
        DramAddr { row, ..*self }
    }

    /// The same row in another column.
    pub fn with_column(&self, column: usize) -> DramAddr {
        DramAddr { column, ..*self }
    }

    /// Start of the row, i.e. column 0.
    pub fn row_start(&self) -> DramAddr {
        self.with_column(0)
    }

    /// Every byte address of this row, in column order.
    pub fn whole_row(&self, mem_config: &MemConfiguration) -> impl Iterator<Item = DramAddr> {
        self.row_offsets(mem_config, 0, 1)
    }

    /// Addresses of this row at columns `offset, offset + stride, ...`.
    ///
    /// A zero stride is treated as 1.
    pub fn row_offsets(
        &self,
        mem_config: &MemConfiguration,
        offset: usize,
        stride: usize,
    ) -> impl Iterator<Item = DramAddr> {
        let base = *self;
        (offset..mem_config.row_bytes())
            .step_by(stride.max(1))
            .map(move |column| base.with_column(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_util::example_config;
    use rand::Rng;

    #[test]
    fn phys_round_trip() {
        let cfg = example_config();
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            let phys = PhysAddr::new(rng.random_range(0..(1usize << cfg.addr_bits)));
            let addr = DramAddr::from_phys(phys, &cfg);
            assert!(addr.is_valid(&cfg));
            assert_eq!(addr.to_phys(&cfg), phys, "{}", addr);
        }
    }

    #[test]
    fn coordinate_round_trip() {
        let cfg = example_config();
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            let addr = DramAddr::new(
                rng.random_range(0..cfg.subchannels()),
                rng.random_range(0..cfg.ranks()),
                rng.random_range(0..cfg.bank_groups()),
                rng.random_range(0..cfg.banks()),
                rng.random_range(0..cfg.rows()),
                rng.random_range(0..cfg.row_bytes()),
            );
            assert_eq!(DramAddr::from_phys(addr.to_phys(&cfg), &cfg), addr);
        }
    }

    #[test]
    fn whole_row_covers_every_column_once() {
        let cfg = example_config();
        let addr = DramAddr::new(1, 0, 3, 2, 77, 123);
        let row: Vec<_> = addr.whole_row(&cfg).collect();
        assert_eq!(row.len(), cfg.row_bytes());
        assert!(row.iter().enumerate().all(|(i, a)| a.column == i));
        assert!(row.iter().all(|a| a.row_start() == addr.row_start()));
    }

    #[test]
    fn row_offsets_step_through_the_row() {
        let cfg = example_config();
        let cols: Vec<_> = DramAddr::default()
            .row_offsets(&cfg, 8, 2048)
            .map(|a| a.column)
            .collect();
        assert_eq!(cols, vec![8, 2056, 4104, 6152]);
    }

    #[test]
    fn addresses_order_by_field() {
        let a = DramAddr::new(0, 0, 1, 0, 0, 0);
        let b = DramAddr::new(0, 0, 0, 3, 9, 9);
        let c = DramAddr::new(1, 0, 0, 0, 0, 0);
        let mut v = vec![c, a, b];
        v.sort();
        assert_eq!(v, vec![b, a, c]);
        assert_eq!(a.to_string(), "(0, 0, 1, 0, 0, 0)");
    }
}
