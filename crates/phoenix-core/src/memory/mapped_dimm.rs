use log::info;
use thiserror::Error;

use crate::memory::{Allocation, ConfigError, DramAddr, MemConfiguration};
use crate::util::{SUPERPAGE_SIZE, Size};

/// Errors raised when touching memory through DRAM coordinates.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The DRAM address is not backed by the allocation
    #[error("DRAM address {0} lies outside the allocation")]
    OutOfBounds(DramAddr),
    /// The virtual address is not part of the allocation
    #[error("virtual address {0:#x} lies outside the allocation")]
    VirtOutOfBounds(usize),
}

/// A superpage allocation together with the DIMM's address mapping.
///
/// Rows are numbered relative to the allocation: row 0 is the lowest DRAM row of the
/// first superpage's physical frame, and [`MappedDimm::backed_rows`] rows from there
/// on are backed in every bank. All other fields are absolute. Translation in both
/// directions only succeeds for addresses backed by the allocation.
///
/// Constructed once at startup and shared by reference.
#[derive(Debug)]
pub struct MappedDimm {
    config: MemConfiguration,
    allocation: Allocation,
    row_base: usize,
    backed_rows: usize,
}

impl MappedDimm {
    /// Binds `allocation` to `config` after checking the mapping against the DIMM.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping's rank count or capacity differs from the detected DIMM.
    pub fn new(
        config: MemConfiguration,
        allocation: Allocation,
        ranks: usize,
        dimm_size: Size,
    ) -> Result<MappedDimm, ConfigError> {
        config.check_dimm(ranks, dimm_size)?;
        let (row_base, backed_rows) = match allocation.frames().first() {
            Some(&frame) => {
                let first = DramAddr::from_phys(frame, &config).row;
                let last = DramAddr::from_phys(frame + (SUPERPAGE_SIZE - 1), &config).row;
                (first, last.saturating_sub(first) + 1)
            }
            None => (0, 0),
        };
        info!(
            "DIMM: {} rank(s), {}, {} subchannel(s) x {} bank group(s) x {} bank(s), {} rows of {} bytes",
            config.ranks(),
            dimm_size,
            config.subchannels(),
            config.bank_groups(),
            config.banks(),
            config.rows(),
            config.row_bytes()
        );
        info!(
            "Allocation backs DRAM rows {}..{}, addressed as rows 0..{}",
            row_base,
            row_base + backed_rows,
            backed_rows
        );
        Ok(MappedDimm {
            config,
            allocation,
            row_base,
            backed_rows,
        })
    }

    /// The address mapping.
    pub fn config(&self) -> &MemConfiguration {
        &self.config
    }

    /// The backing allocation.
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    /// Absolute DRAM row that relative row 0 stands for.
    pub fn row_base(&self) -> usize {
        self.row_base
    }

    /// Number of relative rows, starting at 0, backed in every bank.
    pub fn backed_rows(&self) -> usize {
        self.backed_rows
    }

    /// Virtual address of `addr`, or `None` if it is not backed by the allocation.
    pub fn to_virt(&self, addr: &DramAddr) -> Option<*mut u8> {
        let absolute = addr.with_row(addr.row.checked_add(self.row_base)?);
        if !absolute.is_valid(&self.config) {
            return None;
        }
        self.allocation.phys_to_virt(absolute.to_phys(&self.config))
    }

    /// DRAM address of `virt`, or `None` outside the allocation.
    pub fn from_virt(&self, virt: *const u8) -> Option<DramAddr> {
        let absolute = DramAddr::from_phys(self.allocation.virt_to_phys(virt)?, &self.config);
        Some(absolute.with_row(absolute.row.checked_sub(self.row_base)?))
    }

    /// Like [`MappedDimm::to_virt`], but reports unbacked addresses as an error.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`].
    pub fn resolve(&self, addr: &DramAddr) -> Result<*mut u8, MemoryError> {
        self.to_virt(addr).ok_or(MemoryError::OutOfBounds(*addr))
    }

    /// Virtual addresses of every byte in the row of `addr`, in column order.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if any byte of the row is not backed.
    pub fn vaddrs_whole_row(&self, addr: &DramAddr) -> Result<Vec<*mut u8>, MemoryError> {
        addr.whole_row(&self.config)
            .map(|a| self.resolve(&a))
            .collect()
    }

    /// Virtual addresses of the row of `addr` at columns `offset, offset + stride, ...`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if any of the addresses is not backed.
    pub fn vaddrs_at_offset(
        &self,
        addr: &DramAddr,
        offset: usize,
        stride: usize,
    ) -> Result<Vec<*mut u8>, MemoryError> {
        addr.row_offsets(&self.config, offset, stride)
            .map(|a| self.resolve(&a))
            .collect()
    }
}
