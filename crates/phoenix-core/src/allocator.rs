//! Superpage allocation.
//!
//! This module defines the [`SuperpageAllocator`] trait and the [`alloc_memory`] entry point
//! used to obtain the locked, physically resolved memory the attack runs in.

use crate::memory::{Allocation, LinuxPageMapError};
use crate::util::{Size, compact_mem};
use log::{info, warn};
use thiserror::Error;

/// Errors that can occur while mapping memory.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Zero superpages were requested
    #[error("cannot allocate zero superpages")]
    ZeroSize,
    /// `mmap` failed
    #[error("mmap failed: {0}")]
    Mmap(std::io::Error),
    /// `mlock` failed
    #[error("mlock failed: {0}")]
    Mlock(std::io::Error),
    /// The pagemap could not be read
    #[error(transparent)]
    PageMap(#[from] LinuxPageMapError),
    /// The pagemap reported no frame for a superpage
    #[error("no physical frame for the superpage at {0:#x}, are we root?")]
    UnresolvedFrame(usize),
}

/// Strategy for obtaining superpage-backed memory.
///
/// Implementations return an [`Allocation`] whose physical frames are recorded and
/// stay valid for its lifetime.
pub trait SuperpageAllocator {
    /// The error type returned by allocation operations.
    type Error: std::error::Error + From<AllocationError>;

    /// Size of one superpage handed out by this allocator.
    fn superpage_size(&self) -> Size;

    /// Maps `count` superpages.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory cannot be mapped, locked or resolved.
    fn alloc_superpages(&mut self, count: usize) -> Result<Allocation, Self::Error>;
}

/// Allocates `count` superpages using `allocator`.
///
/// Compacts memory first to raise the chance of free superpages.
///
/// # Errors
///
/// A zero `count` is rejected before any system call; otherwise the allocator's error is returned.
pub fn alloc_memory<E: std::error::Error + From<AllocationError>>(
    allocator: &mut dyn SuperpageAllocator<Error = E>,
    count: usize,
) -> Result<Allocation, E> {
    if count == 0 {
        return Err(AllocationError::ZeroSize.into());
    }
    if let Err(e) = compact_mem() {
        warn!("Memory compaction failed: {:?}", e);
    }
    let allocation = allocator.alloc_superpages(count)?;
    info!(
        "Mapped {} superpage(s) of {} at {:p}, frames {:x?}",
        count,
        allocator.superpage_size(),
        allocation.ptr(),
        allocation.frames()
    );
    Ok(allocation)
}
