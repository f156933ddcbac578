use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::memory::{ConfigError, MemConfiguration};
use crate::util::Size;

/// One DRAM address bit expressed as a function of physical address bits.
///
/// Either a single physical bit or the XOR of several.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BitDef {
    /// Single physical address bit
    Single(u64),
    /// XOR of multiple physical address bits
    Multi(Vec<u64>),
}

impl BitDef {
    /// Physical address bits this function reads.
    pub fn bits(&self) -> &[u64] {
        match self {
            BitDef::Single(bit) => std::slice::from_ref(bit),
            BitDef::Multi(bits) => bits,
        }
    }

    /// Bitmask with every referenced physical bit set.
    ///
    /// Bits beyond the machine word are ignored; callers validate widths first.
    pub fn to_bitstr(&self) -> usize {
        self.bits()
            .iter()
            .filter(|&&bit| bit < usize::BITS as u64)
            .fold(0, |acc, &bit| acc | (1 << bit))
    }
}

/// Reverse-engineered addressing functions of a DIMM.
///
/// Within every list the first entry describes the most significant bit of the field.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DimmConfig {
    /// Human readable DIMM identifier
    #[serde(default)]
    pub name: String,
    /// Number of ranks the functions were recovered for
    pub ranks: usize,
    /// DIMM capacity in GiB
    pub size_gib: usize,
    /// Subchannel functions (DDR5 has two independent subchannels per DIMM)
    #[serde(default)]
    pub subchannel_bits: Vec<BitDef>,
    /// Rank functions, empty for single-rank DIMMs
    #[serde(default)]
    pub rank_bits: Vec<BitDef>,
    /// Bank group functions
    pub bank_group_bits: Vec<BitDef>,
    /// Bank functions
    pub bank_bits: Vec<BitDef>,
    /// Row functions
    pub row_bits: Vec<BitDef>,
    /// Column functions, byte granular
    pub col_bits: Vec<BitDef>,
}

impl DimmConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_jsonfile(path: impl AsRef<Path>) -> Result<DimmConfig, ConfigError> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Builds the address mapping and checks it against the declared geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the functions are invalid or disagree with `ranks`/`size_gib`.
    pub fn mem_configuration(&self) -> Result<MemConfiguration, ConfigError> {
        let config = MemConfiguration::from_bitdefs(
            &self.subchannel_bits,
            &self.rank_bits,
            &self.bank_group_bits,
            &self.bank_bits,
            &self.row_bits,
            &self.col_bits,
        )?;
        config.check_dimm(self.ranks, Size::GiB(self.size_gib))?;
        Ok(config)
    }
}
