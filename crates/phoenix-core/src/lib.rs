//! # Phoenix Core
//!
//! `phoenix-core` holds the building blocks of the Phoenix DDR5 Rowhammer fuzzer.
//!
//! ## Architecture Overview
//!
//! The fuzzer is assembled from two traits:
//!
//! - [`allocator::SuperpageAllocator`] - obtains locked superpage memory together with
//!   its physical frames, so that DRAM coordinates can be mapped to virtual addresses.
//!
//! - [`hammerer::Hammering`] - executes a resolved [`hammerer::HammerJob`], synchronizing
//!   the aggressor reads with the DIMM's refresh commands.
//!
//! ## Main Components
//!
//! - [`memory`] - the XOR address codec ([`memory::MemConfiguration`]), DRAM coordinates
//!   ([`memory::DramAddr`]) and the superpage allocation bound to a mapping
//!   ([`memory::MappedDimm`]).
//!
//! - [`pattern`] - assembly of the refresh-synchronized multi-bank hammer patterns.
//!
//! - [`bit_flips`] - victim initialization and bit-flip collection.
//!
//! - [`Phoenix`] - the fuzz driver sweeping aggressor rows, reads per tREFI and
//!   self-sync thresholds, reporting every iteration to [`observer::HammerObserver`]s.
//!
//! ## Platform Support
//!
//! Hammering requires x86_64 Linux, root privileges (for `/proc/self/pagemap`) and
//! 1 GiB huge pages.

#![warn(missing_docs)]

pub mod allocator;
pub mod bit_flips;
pub mod fuzz;
pub mod hammerer;
pub mod memory;
pub mod observer;
pub mod pattern;
pub mod util;

pub use crate::fuzz::{BuildError, FuzzConfig, FuzzError, FuzzSummary, Phoenix};
