use std::fs;

use lazy_static::lazy_static;
use libc::{MAP_HUGE_1GB, MAP_HUGETLB, MAP_POPULATE};
use log::{debug, warn};
use phoenix_core::allocator::{AllocationError, SuperpageAllocator};
use phoenix_core::memory::{Allocation, LinuxPageMap};
use phoenix_core::util::{BASE_MSB, Size};
use thiserror::Error;

// https://www.kernel.org/doc/Documentation/vm/hugetlbpage.txt
//
// Per-size counters live in /sys/kernel/mm/hugepages/hugepages-<size>kB/.
const FREE_1G_PATH: &str = "/sys/kernel/mm/hugepages/hugepages-1048576kB/free_hugepages";
const MEMINFO_PATH: &str = "/proc/meminfo";
const TOKEN: &str = "Hugepagesize:";

lazy_static! {
    /// Default hugepage size of the system in bytes, if `/proc/meminfo` reports one.
    static ref DEFAULT_HUGEPAGE_SIZE: Option<usize> = fs::read_to_string(MEMINFO_PATH)
        .ok()
        .and_then(|s| parse_hugepage_size(&s));
}

fn parse_hugepage_size(s: &str) -> Option<usize> {
    let line = s.lines().find(|line| line.starts_with(TOKEN))?;
    let mut parts = line.strip_prefix(TOKEN)?.split_whitespace();
    let size = parts.next()?.parse::<usize>().ok()?;
    match parts.next() {
        Some("kB") => Some(size * 1024),
        Some(_) => None,
        None => Some(size),
    }
}

/// Parses the content of a `free_hugepages` counter.
pub fn parse_free_hugepages(s: &str) -> Option<usize> {
    s.trim().parse().ok()
}

/// Number of free 1 GiB hugepages, if the kernel exposes the counter.
pub fn free_hugepages() -> Option<usize> {
    fs::read_to_string(FREE_1G_PATH)
        .ok()
        .and_then(|s| parse_free_hugepages(&s))
}

/// Errors of the [`HugepageAllocator`].
#[derive(Debug, Error)]
pub enum HugepageError {
    /// Mapping, locking or resolving failed
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Allocator mapping anonymous 1 GiB hugepages.
///
/// The mapping is placed at [`BASE_MSB`] if the kernel honors the hint, populated,
/// locked and its physical frames are resolved through `/proc/self/pagemap`.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default, Copy, Clone)]
pub struct HugepageAllocator {}

#[cfg(target_arch = "x86_64")]
impl HugepageAllocator {
    /// Creates the allocator.
    pub fn new() -> Self {
        HugepageAllocator {}
    }
}

#[cfg(target_arch = "x86_64")]
impl SuperpageAllocator for HugepageAllocator {
    type Error = HugepageError;

    fn superpage_size(&self) -> Size {
        Size::GiB(1)
    }

    fn alloc_superpages(&mut self, count: usize) -> Result<Allocation, Self::Error> {
        match *DEFAULT_HUGEPAGE_SIZE {
            Some(size) => debug!("Default hugepage size is {}", Size::B(size)),
            None => debug!("Could not read the default hugepage size"),
        }
        match free_hugepages() {
            Some(free) if free < count => warn!(
                "Only {} free 1 GiB hugepage(s), {} requested; mmap will likely fail",
                free, count
            ),
            Some(free) => debug!("{} free 1 GiB hugepage(s)", free),
            None => warn!("Cannot read {}, are 1 GiB hugepages supported?", FREE_1G_PATH),
        }
        let mut allocation =
            Allocation::map(count, BASE_MSB, MAP_POPULATE | MAP_HUGETLB | MAP_HUGE_1GB)?;
        allocation.lock()?;
        let mut pagemap = LinuxPageMap::new().map_err(AllocationError::from)?;
        allocation.resolve_frames(&mut pagemap)?;
        Ok(allocation)
    }
}
