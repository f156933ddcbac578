//! Refresh-synchronized, self-correcting Rowhammer for DDR5.
//!
//! Re-exports [`phoenix_core`] and the allocator and hammerer crates enabled by features.

pub use phoenix_core::*;

#[cfg(feature = "dummy")]
pub use phoenix_dummy as dummy;
#[cfg(feature = "hugepage")]
pub use phoenix_hugepage as hugepage;
#[cfg(feature = "refsync")]
pub use phoenix_refsync as refsync;
