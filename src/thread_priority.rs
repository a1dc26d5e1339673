//! Real-time scheduling for the ALSA polling thread.
//!
//! Same shape as the teacher's `AudioThreadPriority` helper: best-effort,
//! never a hard requirement for the audio path to function. Failing to get
//! `SCHED_FIFO` or a Windows MMCSS class just means worse jitter, not a
//! broken stream, so every call here returns a `Result` the caller logs
//! and discards rather than propagates.

use crate::error::{Result, RtError};

pub struct AudioThreadPriority;

impl AudioThreadPriority {
    /// Ask the OS scheduler for real-time priority on the calling thread.
    #[cfg(all(unix, feature = "audio-optimizations"))]
    pub fn set_realtime() -> Result<()> {
        // SAFETY: sched_param is a plain-old-data struct; sched_setscheduler
        // only inspects the fields the manpage documents.
        unsafe {
            let mut param: libc::sched_param = std::mem::zeroed();
            param.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
            let rc = libc::sched_setscheduler(0, libc::SCHED_FIFO, &param);
            if rc != 0 {
                return Err(RtError::op_fail(
                    "sched_setscheduler(SCHED_FIFO)",
                    std::io::Error::last_os_error(),
                ));
            }
        }
        Ok(())
    }

    #[cfg(all(windows, feature = "audio-optimizations"))]
    pub fn set_realtime() -> Result<()> {
        use windows::Win32::System::Threading::{
            GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
        };
        // SAFETY: GetCurrentThread never fails; SetThreadPriority takes a
        // valid pseudo-handle and a documented priority constant.
        unsafe {
            let handle = GetCurrentThread();
            SetThreadPriority(handle, THREAD_PRIORITY_TIME_CRITICAL).map_err(|e| {
                RtError::op_fail(
                    "SetThreadPriority",
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                )
            })?;
        }
        Ok(())
    }

    #[cfg(not(feature = "audio-optimizations"))]
    pub fn set_realtime() -> Result<()> {
        Ok(())
    }

    /// Pin the calling thread to a single CPU core, isolating it from
    /// scheduling contention with the rest of the process.
    #[cfg(all(unix, feature = "audio-optimizations"))]
    pub fn pin_to_core(core: usize) -> Result<()> {
        // SAFETY: cpu_set_t is zero-initialized by CPU_ZERO, then only
        // touched through libc's own CPU_SET accessor.
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(core, &mut set);
            let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
            if rc != 0 {
                return Err(RtError::op_fail(
                    "sched_setaffinity",
                    std::io::Error::last_os_error(),
                ));
            }
        }
        Ok(())
    }

    #[cfg(not(all(unix, feature = "audio-optimizations")))]
    pub fn pin_to_core(_core: usize) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_to_core_on_unsupported_config_is_noop_ok() {
        #[cfg(not(all(unix, feature = "audio-optimizations")))]
        assert!(AudioThreadPriority::pin_to_core(0).is_ok());
    }
}
