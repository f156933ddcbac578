//! Utility types and helpers shared by the Phoenix crates.
//!
//! - [`Size`] for memory sizes as reported by the allocator and the DIMM
//! - address constants ([`PAGE_SIZE`], [`SUPERPAGE_SIZE`], [`CL_SIZE`], ...)
//! - [`NamedProgress`] for uniformly labelled progress bars
//! - scheduling helpers to pin the hammering thread and raise its priority

mod alloc_util;
mod constants;
mod named_progress;
mod sched;
mod size;

pub use self::alloc_util::*;
pub use self::constants::*;
pub use self::named_progress::NamedProgress;
pub use self::sched::{elevate_to_max_priority, is_root, pin_to_core};
pub use self::size::Size;
