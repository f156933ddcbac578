//! Dummy hammerer for testing.
//!
//! This crate provides a hammerer that flips bits at a given address instead of hammering.
//! Useful for testing the fuzzing pipeline and the observers without DDR5 hardware.
//!
//! Implements the [`phoenix_core::hammerer::Hammering`] trait.

#![warn(missing_docs)]

mod dummy;

pub use dummy::{Dummy, FlipAddr, Never};
