//! Scheduling control for the hammering thread.

use log::debug;

/// Pins the calling thread to `core`.
///
/// # Errors
///
/// Returns the OS error if `sched_setaffinity` fails, e.g. for a core that does not exist.
pub fn pin_to_core(core: usize) -> std::io::Result<()> {
    if core >= libc::CPU_SETSIZE as usize {
        return Err(std::io::Error::from(std::io::ErrorKind::InvalidInput));
    }
    let ret = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    debug!("Pinned to core {}", core);
    Ok(())
}

/// Switches the calling process to `SCHED_FIFO` with the highest available priority.
///
/// # Errors
///
/// Returns the OS error if the priority cannot be queried or the scheduler cannot be set.
pub fn elevate_to_max_priority() -> std::io::Result<i32> {
    let priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if priority == -1 {
        return Err(std::io::Error::last_os_error());
    }
    let param = libc::sched_param {
        sched_priority: priority,
    };
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(priority)
}

/// Whether the effective user is root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
