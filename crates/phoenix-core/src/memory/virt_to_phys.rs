use std::fmt::{Debug, Formatter};
use std::ops::Add;

use crate::util::{PAGE_MASK, PAGE_SHIFT};
use log::warn;
use pagemap2::{PageMapError, VirtualMemoryArea};
use serde::Serialize;
use thiserror::Error;

#[repr(transparent)]
#[derive(Clone, Copy, Default, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Physical memory address.
pub struct PhysAddr(usize);

impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl std::fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl PhysAddr {
    /// Creates a new physical address.
    pub const fn new(addr: usize) -> Self {
        PhysAddr(addr)
    }

    /// Returns the address as a usize.
    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

impl From<PhysAddr> for usize {
    fn from(addr: PhysAddr) -> usize {
        addr.0
    }
}

impl Add<usize> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, rhs: usize) -> Self::Output {
        PhysAddr(self.0 + rhs)
    }
}

/// Translates virtual addresses of the current process to physical addresses.
pub trait VirtToPhysResolver {
    /// Errors that can occur during resolution
    type Error;

    /// Translates a virtual address to a physical address.
    ///
    /// # Errors
    ///
    /// Returns an error if the translation interface cannot be queried.
    fn get_phys(&mut self, virt: u64) -> Result<PhysAddr, Self::Error>;
}

/// Errors that can happen during pagemap lookups.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct LinuxPageMapError(#[from] PageMapError);

/// Virtual to physical address translator backed by `/proc/self/pagemap`.
///
/// Physical frame numbers are only reported to privileged processes; otherwise
/// the kernel answers with PFN 0.
pub struct LinuxPageMap {
    pagemap_wrapper: pagemap2::PageMap,
}

impl LinuxPageMap {
    /// Opens the pagemap of the current process.
    ///
    /// # Errors
    ///
    /// Returns an error if opening `/proc/self/pagemap` fails.
    pub fn new() -> Result<LinuxPageMap, LinuxPageMapError> {
        Ok(LinuxPageMap {
            pagemap_wrapper: pagemap2::PageMap::new(std::process::id() as u64)?,
        })
    }
}

impl VirtToPhysResolver for LinuxPageMap {
    type Error = LinuxPageMapError;

    fn get_phys(&mut self, virt: u64) -> Result<PhysAddr, Self::Error> {
        let page = virt & !(PAGE_MASK as u64);
        let area = VirtualMemoryArea::from((page, page + PAGE_MASK as u64));
        let entries = self.pagemap_wrapper.pagemap_vma(&area)?;
        let pfn = match entries.first() {
            Some(entry) => entry.pfn()?,
            None => 0,
        };
        if pfn == 0 {
            warn!("Got PFN 0 for virtual address {:#x}. Are we root?", virt);
        }
        Ok(PhysAddr(
            ((pfn << PAGE_SHIFT) | (virt & PAGE_MASK as u64)) as usize,
        ))
    }
}
