use log::{debug, warn};
use rand::Rng as _;

use crate::allocator::AllocationError;
use crate::memory::{LinuxPageMap, PhysAddr, VirtToPhysResolver};
use crate::util::{SUPERPAGE_MASK, SUPERPAGE_SIZE};

/// A mapped region of one or more 1 GiB superpages.
///
/// The allocation records the physical frame of every superpage once, at mapping
/// time, and answers virtual/physical lookups for addresses it contains. It owns the
/// mapping: dropping it unlocks and unmaps the memory.
#[derive(Debug)]
pub struct Allocation {
    ptr: *mut u8,
    len: usize,
    locked: bool,
    frames: Vec<PhysAddr>,
}

impl Allocation {
    /// Maps `superpages` superpages of anonymous private memory.
    ///
    /// `hint` is a preferred virtual address and `flags` are OR-ed into
    /// `MAP_PRIVATE | MAP_ANONYMOUS`. The mapping has no physical frames recorded yet;
    /// see [`Allocation::resolve_frames`] and [`Allocation::assume_frames`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::ZeroSize`] for zero superpages and
    /// [`AllocationError::Mmap`] if the kernel refuses the mapping.
    pub fn map(
        superpages: usize,
        hint: *mut libc::c_void,
        flags: libc::c_int,
    ) -> Result<Allocation, AllocationError> {
        if superpages == 0 {
            return Err(AllocationError::ZeroSize);
        }
        let len = superpages * SUPERPAGE_SIZE;
        let p = unsafe {
            libc::mmap(
                hint,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | flags,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(AllocationError::Mmap(std::io::Error::last_os_error()));
        }
        debug!("Mapped {:#x} bytes at {:p}", len, p);
        Ok(Allocation {
            ptr: p as *mut u8,
            len,
            locked: false,
            frames: vec![],
        })
    }

    /// Maps ordinary, lazily backed memory and declares it to start at `phys_base`.
    ///
    /// The physical addresses are synthetic: the superpages are assumed to be
    /// contiguous from `phys_base`. Useful wherever the DRAM mapping must be exercised
    /// without privileges or huge pages.
    ///
    /// # Errors
    ///
    /// See [`Allocation::map`].
    pub fn anonymous(superpages: usize, phys_base: PhysAddr) -> Result<Allocation, AllocationError> {
        let mut allocation = Allocation::map(superpages, std::ptr::null_mut(), libc::MAP_NORESERVE)?;
        allocation.assume_frames(phys_base);
        Ok(allocation)
    }

    /// Locks the mapping into RAM.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Mlock`] if `mlock` fails.
    pub fn lock(&mut self) -> Result<(), AllocationError> {
        if unsafe { libc::mlock(self.ptr as *const libc::c_void, self.len) } != 0 {
            return Err(AllocationError::Mlock(std::io::Error::last_os_error()));
        }
        self.locked = true;
        Ok(())
    }

    /// Records the physical frame of every superpage using `resolver`.
    ///
    /// # Errors
    ///
    /// Fails if the pagemap cannot be read or reports no frame.
    pub fn resolve_frames(&mut self, resolver: &mut LinuxPageMap) -> Result<(), AllocationError> {
        let mut frames = Vec::with_capacity(self.superpages());
        for offset in (0..self.len).step_by(SUPERPAGE_SIZE) {
            let virt = self.ptr as usize + offset;
            let phys = resolver.get_phys(virt as u64)?;
            if phys.as_usize() == 0 {
                return Err(AllocationError::UnresolvedFrame(virt));
            }
            if phys.as_usize() & SUPERPAGE_MASK != 0 {
                warn!("Superpage at {:#x} maps to unaligned {:?}", virt, phys);
            }
            frames.push(phys);
        }
        self.frames = frames;
        Ok(())
    }

    /// Declares the superpages physically contiguous from `phys_base`.
    pub fn assume_frames(&mut self, phys_base: PhysAddr) {
        self.frames = (0..self.superpages())
            .map(|i| phys_base + i * SUPERPAGE_SIZE)
            .collect();
    }
}

impl Allocation {
    /// Start of the mapping.
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty. Never true for a successfully mapped allocation.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of superpages.
    pub fn superpages(&self) -> usize {
        self.len / SUPERPAGE_SIZE
    }

    /// Physical frames of the superpages, in virtual order.
    pub fn frames(&self) -> &[PhysAddr] {
        &self.frames
    }

    /// Whether `virt` lies inside the mapping.
    pub fn contains(&self, virt: *const u8) -> bool {
        (virt as usize)
            .checked_sub(self.ptr as usize)
            .is_some_and(|offset| offset < self.len)
    }

    /// Physical address of `virt`, or `None` outside the allocation.
    pub fn virt_to_phys(&self, virt: *const u8) -> Option<PhysAddr> {
        let offset = (virt as usize).checked_sub(self.ptr as usize)?;
        let frame = self.frames.get(offset / SUPERPAGE_SIZE)?;
        Some(*frame + (offset & SUPERPAGE_MASK))
    }

    /// Virtual address of `phys`, or `None` if no superpage of the allocation holds it.
    pub fn phys_to_virt(&self, phys: PhysAddr) -> Option<*mut u8> {
        let base = phys.as_usize() & !SUPERPAGE_MASK;
        let page = self.frames.iter().position(|f| f.as_usize() == base)?;
        Some(unsafe {
            self.ptr
                .add(page * SUPERPAGE_SIZE + (phys.as_usize() & SUPERPAGE_MASK))
        })
    }

    /// A uniformly random address inside the allocation.
    pub fn random_addr(&self) -> *mut u8 {
        let offset = rand::rng().random_range(0..self.len);
        unsafe { self.ptr.add(offset) }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        unsafe {
            if self.locked && libc::munlock(self.ptr as *const libc::c_void, self.len) != 0 {
                warn!("munlock: {}", std::io::Error::last_os_error());
            }
            if libc::munmap(self.ptr as *mut libc::c_void, self.len) != 0 {
                warn!("munmap: {}", std::io::Error::last_os_error());
            }
        }
        debug!("Released {:#x} bytes at {:p}", self.len, self.ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_superpages_are_rejected() {
        let err = Allocation::anonymous(0, PhysAddr::new(0)).unwrap_err();
        assert!(matches!(err, AllocationError::ZeroSize));
    }

    #[test]
    fn lookups_are_bounded() -> anyhow::Result<()> {
        let base = PhysAddr::new(5 * SUPERPAGE_SIZE);
        let alloc = Allocation::anonymous(1, base)?;
        let p = unsafe { alloc.ptr().add(0x1234) };
        assert_eq!(alloc.virt_to_phys(p), Some(base + 0x1234));
        assert_eq!(alloc.phys_to_virt(base + 0x1234), Some(p));

        let past_end = unsafe { alloc.ptr().add(alloc.len()) };
        assert!(!alloc.contains(past_end));
        assert_eq!(alloc.virt_to_phys(past_end), None);
        assert_eq!(alloc.virt_to_phys(std::ptr::null()), None);
        assert_eq!(alloc.phys_to_virt(PhysAddr::new(0x1234)), None);
        Ok(())
    }

    #[test]
    fn random_addresses_stay_inside() -> anyhow::Result<()> {
        let alloc = Allocation::anonymous(1, PhysAddr::new(0))?;
        for _ in 0..1000 {
            assert!(alloc.contains(alloc.random_addr()));
        }
        Ok(())
    }
}
