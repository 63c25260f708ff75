//! CPU core pinning.
//!
//! Hard affinity is only available on Linux; elsewhere `pin_to_core` is a
//! no-op and the OS scheduler is trusted.

use std::io;

#[cfg(target_os = "linux")]
pub fn pin_to_core(core: usize) -> io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        if core >= libc::CPU_SETSIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("core {} out of range", core),
            ));
        }
        libc::CPU_SET(core, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(_core: usize) -> io::Result<()> {
    Ok(())
}

/// Number of logical cores on this host.
pub fn num_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_cores_positive() {
        assert!(num_cores() >= 1);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pin_to_current_core() {
        // pinning to core 0 should always be possible
        pin_to_core(0).unwrap();
    }
}
