//! Victim initialization and bit-flip collection.
//!
//! Rows are filled with a repeating 64-bit word. Collection rereads every word from
//! DRAM, reports each differing byte and writes the expected word back, so that no
//! flip survives into the next round.

use itertools::Itertools;
use log::{debug, trace};
use serde::Serialize;

use crate::memory::{DramAddr, MappedDimm, MemoryError};
use crate::util::WORD_SIZE;

/// A 64-bit fill word, stored little-endian in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct DataPattern(pub u64);

impl DataPattern {
    /// Fill for aggressor rows.
    pub const AGGRESSOR: DataPattern = DataPattern(0x0068_0005_5555_5FD3);
    /// Fill for victim rows.
    pub const VICTIM: DataPattern = DataPattern(0x0068_000A_AAAA_AFD3);

    /// The bytes of the word in memory order.
    pub fn bytes(&self) -> [u8; WORD_SIZE] {
        self.0.to_le_bytes()
    }
}

impl std::fmt::Display for DataPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// One byte that read back differently from what was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BitFlip {
    /// DRAM location of the byte
    pub addr: DramAddr,
    /// Virtual address of the byte
    pub virt: usize,
    /// Value written
    pub expected: u8,
    /// Value read back
    pub actual: u8,
}

impl BitFlip {
    /// Bits that changed.
    pub fn bitmask(&self) -> u8 {
        self.expected ^ self.actual
    }
}

/// Memory whose rows can be filled with a [`DataPattern`].
pub trait Initializable {
    /// Writes `fill` to every word of every distinct row in `rows`, then fences.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if a row is not backed by the allocation.
    /// Nothing is written in that case.
    fn initialize_data_pattern(&self, rows: &[DramAddr], fill: DataPattern)
    -> Result<(), MemoryError>;
}

/// Memory whose rows can be checked against a [`DataPattern`].
pub trait Checkable {
    /// Rereads the rows of `victims` from DRAM and reports every byte differing from `expected`.
    ///
    /// Every examined word holds `expected` again on return.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if a row is not backed by the allocation.
    /// Nothing is read in that case.
    fn collect_bit_flips(
        &self,
        victims: &[DramAddr],
        expected: DataPattern,
    ) -> Result<Vec<BitFlip>, MemoryError>;
}

/// Evicts the cache line holding `word`.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
unsafe fn flush(word: *const u64) {
    unsafe { std::arch::x86_64::_mm_clflush(word as *const u8) }
}

/// Cache maintenance is x86_64 only; elsewhere words stay cached.
#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
unsafe fn flush(_word: *const u64) {}

/// Orders preceding stores and flushes.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn fence() {
    unsafe { std::arch::x86_64::_mm_mfence() }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn fence() {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

impl MappedDimm {
    /// Word-aligned virtual addresses of the distinct rows of `addrs`, first occurrence first.
    fn row_words(&self, addrs: &[DramAddr]) -> Result<Vec<*mut u64>, MemoryError> {
        let mut words = vec![];
        for row in addrs.iter().map(DramAddr::row_start).unique() {
            for v in self.vaddrs_whole_row(&row)? {
                if (v as usize).is_multiple_of(WORD_SIZE) {
                    words.push(v as *mut u64);
                }
            }
        }
        Ok(words.into_iter().unique().collect())
    }
}

impl Initializable for MappedDimm {
    fn initialize_data_pattern(
        &self,
        rows: &[DramAddr],
        fill: DataPattern,
    ) -> Result<(), MemoryError> {
        let words = self.row_words(rows)?;
        debug!("Initializing {} words with {}", words.len(), fill);
        for word in words {
            unsafe {
                std::ptr::write_volatile(word, fill.0);
                flush(word);
            }
        }
        fence();
        Ok(())
    }
}

impl Checkable for MappedDimm {
    fn collect_bit_flips(
        &self,
        victims: &[DramAddr],
        expected: DataPattern,
    ) -> Result<Vec<BitFlip>, MemoryError> {
        let words = self.row_words(victims)?;
        let expected_bytes = expected.bytes();
        let mut flips = vec![];
        for word in words {
            let actual = unsafe {
                flush(word);
                fence();
                std::ptr::read_volatile(word)
            };
            if actual == expected.0 {
                continue;
            }
            for (i, (&exp, act)) in expected_bytes
                .iter()
                .zip(actual.to_le_bytes())
                .enumerate()
            {
                if exp == act {
                    continue;
                }
                let virt = word as usize + i;
                let addr = self
                    .from_virt(virt as *const u8)
                    .ok_or(MemoryError::VirtOutOfBounds(virt))?;
                trace!("Flip at {} ({:#x}): {:#04x} -> {:#04x}", addr, virt, exp, act);
                flips.push(BitFlip {
                    addr,
                    virt,
                    expected: exp,
                    actual: act,
                });
            }
            unsafe {
                std::ptr::write_volatile(word, expected.0);
                flush(word);
            }
        }
        if !flips.is_empty() {
            debug!("Collected {} flipped byte(s)", flips.len());
        }
        Ok(flips)
    }
}
