//! Scheduling priority of the calling thread.

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPriority {
    /// Real-time scheduling. Usually needs elevated privileges.
    TimeCritical,
    /// Higher than normal, still time-shared.
    High,
}

#[cfg(unix)]
pub fn set_current_thread_priority(priority: ThreadPriority) -> Result<()> {
    use anyhow::bail;
    use std::io;

    match priority {
        ThreadPriority::TimeCritical => {
            // SAFETY: sched_param is plain data, and pthread_self() is always
            // a valid handle for the calling thread.
            let ret = unsafe {
                let mut param: libc::sched_param = std::mem::zeroed();
                param.sched_priority = libc::sched_get_priority_max(libc::SCHED_RR);
                libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param)
            };
            if ret != 0 {
                bail!(
                    "pthread_setschedparam failed: {}",
                    io::Error::from_raw_os_error(ret)
                );
            }
        }
        ThreadPriority::High => {
            // On Linux, PRIO_PROCESS with 0 targets the calling thread only.
            // SAFETY: plain syscall wrapper.
            let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -10) };
            if ret != 0 {
                bail!("setpriority failed: {}", io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_current_thread_priority(priority: ThreadPriority) -> Result<()> {
    anyhow::bail!("Setting {priority:?} thread priority is not supported on this platform")
}

/// Tries each priority in order, keeping the first one that works.
/// Returns the priority that was applied, if any.
pub fn raise_current_thread_priority(candidates: &[ThreadPriority]) -> Option<ThreadPriority> {
    for &priority in candidates {
        match set_current_thread_priority(priority) {
            Ok(()) => {
                tracing::debug!("Thread priority set to {:?}", priority);
                return Some(priority);
            }
            Err(e) => tracing::debug!("Could not set {:?} thread priority: {:#}", priority, e),
        }
    }
    None
}
