use crate::error::Error;

use super::{TimeSource, NANOS_IN_SEC};

/// `CLOCK_REALTIME` in nanoseconds. Subject to NTP steps, which is accepted
/// since a run is short and only compares its own readings.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    _probed: (),
}

impl WallClock {
    /// Probes the clock once so the hot-path read can stay infallible.
    pub fn new() -> Result<Self, Error> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid, writable timespec.
        let ret = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        if ret != 0 {
            return Err(Error::TimeSource(format!(
                "clock_gettime(CLOCK_REALTIME) failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self { _probed: () })
    }
}

impl TimeSource for WallClock {
    #[inline(always)]
    fn now(&self) -> i64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid, writable timespec; CLOCK_REALTIME was
        // probed in new().
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
        }
        ts.tv_sec as i64 * NANOS_IN_SEC + ts.tv_nsec as i64
    }
}
