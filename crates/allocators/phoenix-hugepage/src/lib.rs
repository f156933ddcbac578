//! Hugepage-based memory allocator for Rowhammer attacks.
//!
//! This crate maps anonymous 1 GiB hugepages (`MAP_HUGETLB | MAP_HUGE_1GB`), locks them
//! and resolves their physical frames, so that every DRAM coordinate inside a superpage
//! has a known virtual address.
//!
//! Implements the [`phoenix_core::allocator::SuperpageAllocator`] trait.
//!
//! # Platform Requirements
//!
//! - x86_64 Linux with 1 GiB hugepage support
//! - Hugepages reserved via kernel boot parameters (`hugepagesz=1G hugepages=N`) or
//!   `/sys/kernel/mm/hugepages/hugepages-1048576kB/nr_hugepages`
//! - Root privileges to read physical frame numbers from `/proc/self/pagemap`

#![warn(missing_docs)]

mod hugepage;

pub use hugepage::*;
