/// Page shift value (12 bits) for 4 KiB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Mask for extracting the page offset
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Superpage shift value (30 bits) for 1 GiB huge pages
pub const SUPERPAGE_SHIFT: usize = 30;
/// Size of one superpage (1 GiB)
pub const SUPERPAGE_SIZE: usize = 1 << SUPERPAGE_SHIFT;
/// Mask for extracting the superpage offset
pub const SUPERPAGE_MASK: usize = SUPERPAGE_SIZE - 1;

/// Cache line size (64 bytes) for x86_64
pub const CL_SIZE: usize = 64;

/// Granularity of the data pattern written to and checked in DRAM rows
pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

/// Preferred virtual base address for superpage mappings
pub const BASE_MSB: *mut libc::c_void = SUPERPAGE_SIZE as *mut libc::c_void;
