/// Asks the kernel to compact memory so that free superpages become available.
///
/// # Errors
///
/// Returns an error if `/proc/sys/vm/compact_memory` cannot be written, which is the
/// case without root.
pub fn compact_mem() -> std::io::Result<()> {
    std::fs::write("/proc/sys/vm/compact_memory", b"1")
}
