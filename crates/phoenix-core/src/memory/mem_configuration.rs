use serde::Serialize;
use thiserror::Error;

use crate::memory::BitDef;
use crate::util::Size;

/// Errors in the DRAM addressing configuration or its fit to the installed DIMM.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A required field has no address functions
    #[error("no address functions given for {0}")]
    EmptyField(&'static str),
    /// The mapping spans more bits than fit into an address
    #[error("address width of {0} bits exceeds the machine word")]
    AddressTooWide(usize),
    /// A function references a physical bit outside the address width
    #[error("{field} function references bit {bit}, outside the {width}-bit address space")]
    BitOutOfRange {
        /// Field the function belongs to
        field: &'static str,
        /// Offending physical bit
        bit: u64,
        /// Address width in bits
        width: usize,
    },
    /// The functions do not describe a bijection
    #[error("DRAM address functions are not invertible")]
    NotInvertible,
    /// Rank count of the mapping differs from the DIMM
    #[error("address mapping covers {config} rank(s) but the DIMM has {dimm}")]
    RankMismatch {
        /// Ranks described by the mapping
        config: usize,
        /// Ranks of the DIMM
        dimm: usize,
    },
    /// Capacity of the mapping differs from the DIMM
    #[error("address mapping covers {config} but the DIMM has {dimm}")]
    SizeMismatch {
        /// Capacity described by the mapping
        config: Size,
        /// Capacity of the DIMM
        dimm: Size,
    },
}

/// DRAM addressing configuration.
///
/// Maps physical addresses to linearized DRAM coordinates and back. The linearized value
/// holds, from most to least significant, subchannel, rank, bank group, bank, row and column.
/// `dram_mtx[i]` is the parity mask producing linearized bit `addr_bits - 1 - i`;
/// `addr_mtx` is its inverse over GF(2).
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MemConfiguration {
    /// Bit shift for subchannel extraction
    pub sc_shift: usize,
    /// Bit mask for subchannel extraction
    pub sc_mask: usize,
    /// Bit shift for rank extraction
    pub rk_shift: usize,
    /// Bit mask for rank extraction
    pub rk_mask: usize,
    /// Bit shift for bank group extraction
    pub bg_shift: usize,
    /// Bit mask for bank group extraction
    pub bg_mask: usize,
    /// Bit shift for bank extraction
    pub bk_shift: usize,
    /// Bit mask for bank extraction
    pub bk_mask: usize,
    /// Bit shift for row extraction
    pub row_shift: usize,
    /// Bit mask for row extraction
    pub row_mask: usize,
    /// Bit shift for column extraction
    pub col_shift: usize,
    /// Bit mask for column extraction
    pub col_mask: usize,
    /// DRAM addressing matrix (physical to DRAM)
    pub dram_mtx: Vec<usize>,
    /// Address reconstruction matrix (DRAM to physical)
    pub addr_mtx: Vec<usize>,
    /// Width of the physical address space in bits
    pub addr_bits: usize,
}

fn field_mask(len: usize) -> usize {
    1usize.checked_shl(len as u32).map_or(usize::MAX, |v| v - 1)
}

impl MemConfiguration {
    /// Builds a configuration from per-field bit functions.
    ///
    /// # Errors
    ///
    /// Fails if row or column functions are missing, a function references a bit outside
    /// the address width, or the functions are not invertible.
    pub fn from_bitdefs(
        subchannel_bits: &[BitDef],
        rank_bits: &[BitDef],
        bank_group_bits: &[BitDef],
        bank_bits: &[BitDef],
        row_bits: &[BitDef],
        col_bits: &[BitDef],
    ) -> Result<Self, ConfigError> {
        if row_bits.is_empty() {
            return Err(ConfigError::EmptyField("row"));
        }
        if col_bits.is_empty() {
            return Err(ConfigError::EmptyField("column"));
        }
        let fields: [(&'static str, &[BitDef]); 6] = [
            ("subchannel", subchannel_bits),
            ("rank", rank_bits),
            ("bank group", bank_group_bits),
            ("bank", bank_bits),
            ("row", row_bits),
            ("column", col_bits),
        ];
        let addr_bits: usize = fields.iter().map(|(_, defs)| defs.len()).sum();
        if addr_bits >= usize::BITS as usize {
            return Err(ConfigError::AddressTooWide(addr_bits));
        }
        for (field, defs) in fields {
            for def in defs {
                if let Some(&bit) = def.bits().iter().find(|&&b| b >= addr_bits as u64) {
                    return Err(ConfigError::BitOutOfRange {
                        field,
                        bit,
                        width: addr_bits,
                    });
                }
            }
        }

        let col_shift = 0;
        let row_shift = col_shift + col_bits.len();
        let bk_shift = row_shift + row_bits.len();
        let bg_shift = bk_shift + bank_bits.len();
        let rk_shift = bg_shift + bank_group_bits.len();
        let sc_shift = rk_shift + rank_bits.len();

        let dram_mtx: Vec<usize> = fields
            .iter()
            .flat_map(|(_, defs)| defs.iter().map(BitDef::to_bitstr))
            .collect();
        let addr_mtx = invert_gf2(&dram_mtx).ok_or(ConfigError::NotInvertible)?;

        Ok(MemConfiguration {
            sc_shift,
            sc_mask: field_mask(subchannel_bits.len()),
            rk_shift,
            rk_mask: field_mask(rank_bits.len()),
            bg_shift,
            bg_mask: field_mask(bank_group_bits.len()),
            bk_shift,
            bk_mask: field_mask(bank_bits.len()),
            row_shift,
            row_mask: field_mask(row_bits.len()),
            col_shift,
            col_mask: field_mask(col_bits.len()),
            dram_mtx,
            addr_mtx,
            addr_bits,
        })
    }
}

/// Inverts a square GF(2) matrix given as parity masks, most significant output bit first.
///
/// Each row is an equation `out_l = parity(x & row)`. Gauss-Jordan elimination keeps a
/// second mask per row recording which outputs were combined, so that once the left side
/// is reduced to a single input bit the right side is that bit's parity mask over the outputs.
fn invert_gf2(mtx: &[usize]) -> Option<Vec<usize>> {
    let n = mtx.len();
    let mut rows: Vec<(usize, usize)> = mtx
        .iter()
        .enumerate()
        .map(|(i, &m)| (m, 1 << (n - 1 - i)))
        .collect();
    for r in 0..n {
        let bit = n - 1 - r;
        let pivot = (r..n).find(|&k| (rows[k].0 >> bit) & 1 == 1)?;
        rows.swap(r, pivot);
        let (coef, comb) = rows[r];
        for (k, row) in rows.iter_mut().enumerate() {
            if k != r && (row.0 >> bit) & 1 == 1 {
                row.0 ^= coef;
                row.1 ^= comb;
            }
        }
    }
    Some(rows.into_iter().map(|(_, comb)| comb).collect())
}

impl MemConfiguration {
    /// Number of subchannels.
    pub fn subchannels(&self) -> usize {
        self.sc_mask + 1
    }

    /// Number of ranks.
    pub fn ranks(&self) -> usize {
        self.rk_mask + 1
    }

    /// Number of bank groups per rank.
    pub fn bank_groups(&self) -> usize {
        self.bg_mask + 1
    }

    /// Number of banks per bank group.
    pub fn banks(&self) -> usize {
        self.bk_mask + 1
    }

    /// Number of rows per bank.
    pub fn rows(&self) -> usize {
        self.row_mask + 1
    }

    /// Number of byte columns per row, i.e. the row size in bytes.
    pub fn row_bytes(&self) -> usize {
        self.col_mask + 1
    }

    /// Capacity covered by the mapping.
    pub fn capacity(&self) -> Size {
        match self.addr_bits {
            30.. => Size::GiB(1 << (self.addr_bits - 30)),
            bits => Size::B(1 << bits),
        }
    }

    /// Checks the mapping against the geometry of the installed DIMM.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RankMismatch`] or [`ConfigError::SizeMismatch`].
    pub fn check_dimm(&self, ranks: usize, size: Size) -> Result<(), ConfigError> {
        if self.ranks() != ranks {
            return Err(ConfigError::RankMismatch {
                config: self.ranks(),
                dimm: ranks,
            });
        }
        if self.capacity() != size {
            return Err(ConfigError::SizeMismatch {
                config: self.capacity(),
                dimm: size,
            });
        }
        Ok(())
    }
}
