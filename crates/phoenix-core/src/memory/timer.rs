//! Cycle-accurate, uncached memory accesses.

use thiserror::Error;

use crate::memory::AggressorPtr;

/// Errors when setting up the access timer.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The CPU lacks a required instruction
    #[error("CPU does not support {0}")]
    Unsupported(&'static str),
}

/// Source of time and uncached DRAM accesses for the hammering loops.
///
/// All times are CPU cycles.
pub trait AccessTimer {
    /// Current cycle count.
    fn now(&self) -> u64;

    /// Reads `ptr` from DRAM and evicts it from the cache again.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads.
    unsafe fn access(&self, ptr: AggressorPtr);

    /// Like [`AccessTimer::access`], returning the latency of the read in cycles.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads.
    unsafe fn timed_access(&self, ptr: AggressorPtr) -> u64;
}

/// [`AccessTimer`] based on `rdtscp`, `clflush` and `mfence`.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy)]
pub struct DefaultAccessTimer {
    _private: (),
}

#[cfg(target_arch = "x86_64")]
impl DefaultAccessTimer {
    /// Creates the timer after checking CPU support.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Unsupported`] if `rdtscp` or `clflush` is unavailable.
    pub fn new() -> Result<Self, TimerError> {
        if !has_rdtscp() {
            return Err(TimerError::Unsupported("rdtscp"));
        }
        if !std::arch::is_x86_feature_detected!("sse2") {
            return Err(TimerError::Unsupported("clflush"));
        }
        Ok(DefaultAccessTimer { _private: () })
    }
}

/// `rdtscp` is reported in bit 27 of EDX in extended leaf 0x8000_0001.
#[cfg(target_arch = "x86_64")]
fn has_rdtscp() -> bool {
    use std::arch::x86_64::__cpuid;
    #[allow(unused_unsafe)]
    let max_extended = unsafe { __cpuid(0x8000_0000) }.eax;
    if max_extended < 0x8000_0001 {
        return false;
    }
    #[allow(unused_unsafe)]
    let edx = unsafe { __cpuid(0x8000_0001) }.edx;
    edx & (1 << 27) != 0
}

#[cfg(target_arch = "x86_64")]
impl AccessTimer for DefaultAccessTimer {
    #[inline(always)]
    fn now(&self) -> u64 {
        let mut aux = 0;
        unsafe { std::arch::x86_64::__rdtscp(&mut aux) }
    }

    #[inline(always)]
    unsafe fn access(&self, ptr: AggressorPtr) {
        unsafe {
            std::ptr::read_volatile(ptr);
            std::arch::x86_64::_mm_clflush(ptr);
        }
    }

    #[inline(always)]
    unsafe fn timed_access(&self, ptr: AggressorPtr) -> u64 {
        use std::arch::x86_64::{__rdtscp, _mm_clflush, _mm_mfence};
        let mut aux = 0;
        unsafe {
            _mm_mfence();
            let start = __rdtscp(&mut aux);
            std::ptr::read_volatile(ptr);
            let end = __rdtscp(&mut aux);
            _mm_clflush(ptr);
            end.saturating_sub(start)
        }
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[test]
    fn timer_advances() -> anyhow::Result<()> {
        let timer = DefaultAccessTimer::new()?;
        let value = 0xAAu8;
        let start = timer.now();
        let latency = unsafe { timer.timed_access(&value) };
        assert!(timer.now() > start);
        assert!(latency > 0);
        Ok(())
    }

    #[test]
    fn construction_follows_cpuid() {
        assert_eq!(DefaultAccessTimer::new().is_ok(), has_rdtscp());
    }
}
