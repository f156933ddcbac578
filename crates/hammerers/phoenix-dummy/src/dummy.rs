use log::debug;
use phoenix_core::hammerer::{HammerJob, Hammering, SyncStats};
use thiserror::Error;

/// A memory address to flip.
#[derive(Clone, Copy, Debug)]
pub struct FlipAddr(*mut u8);

/// Dummy hammerer that inverts one byte per job.
///
/// The job's reads are ignored. The reported statistics count the windows as executed
/// and nothing else.
pub struct Dummy {
    flip_addr: FlipAddr,
    mask: u8,
}

impl Dummy {
    /// Creates a dummy inverting every bit of the byte at `flip_addr`.
    pub fn new(flip_addr: impl Into<FlipAddr>) -> Self {
        Self::with_mask(flip_addr, 0xFF)
    }

    /// Creates a dummy flipping only the bits set in `mask`.
    pub fn with_mask(flip_addr: impl Into<FlipAddr>, mask: u8) -> Self {
        Dummy {
            flip_addr: flip_addr.into(),
            mask,
        }
    }
}

/// Error type that can never occur.
#[derive(Debug, Error)]
pub enum Never {}

impl Hammering for Dummy {
    type Error = Never;

    fn hammer(&self, job: &HammerJob) -> Result<SyncStats, Self::Error> {
        let ptr = self.flip_addr.0;
        unsafe {
            let before = std::ptr::read_volatile(ptr);
            let after = before ^ self.mask;
            debug!("Flip address {:#x} from {:#04x} to {:#04x}", ptr as usize, before, after);
            std::ptr::write_volatile(ptr, after);
        }
        Ok(SyncStats {
            windows: job.params().pattern_repetitions,
            ..Default::default()
        })
    }
}

impl From<*mut u8> for FlipAddr {
    fn from(value: *mut u8) -> Self {
        FlipAddr(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_core::hammerer::SyncParams;

    #[test]
    fn flips_the_masked_bits() {
        let mut byte = 0xAAu8;
        let job = HammerJob::new(
            vec![],
            vec![],
            SyncParams {
                ref_threshold: 1150,
                pattern_repetitions: 3,
                self_sync_threshold: 25_000,
            },
        );
        let stats = {
            let dummy = Dummy::with_mask(&mut byte as *mut u8, 0x01);
            let stats = dummy.hammer(&job).expect("infallible");
            dummy.hammer(&job).expect("infallible");
            dummy.hammer(&job).expect("infallible");
            stats
        };
        assert_eq!(byte, 0xAB);
        assert_eq!(stats.windows, 3);
    }
}
