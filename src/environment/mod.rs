//! Real-time preparation of the process before a measurement.
//!
//! [`Environment::prepare`] pins the thread, locks memory and maps the sample
//! buffers; [`Environment::suppress_interrupts`] hands out the guard that
//! masks interrupts for the measurement pass. Everything is undone in `Drop`,
//! so teardown happens on error paths too.

mod buffer;

pub use buffer::SampleBuffer;

use crate::arch;
use crate::config::RunConfig;
use crate::error::Error;
use crate::sample::Sample;

/// Restricts the calling thread to `cpu`.
pub fn pin_to_cpu(cpu: usize) -> Result<(), Error> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(Error::Affinity(format!(
            "cpu {} is beyond the kernel cpu set size ({})",
            cpu,
            libc::CPU_SETSIZE
        )));
    }

    // SAFETY: the set is zero-initialized and cpu < CPU_SETSIZE.
    let result = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if result != 0 {
        return Err(Error::Affinity(format!(
            "could not pin to cpu {}: {}",
            cpu,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// The CPU the calling thread is running on right now.
pub fn current_cpu() -> Option<usize> {
    // SAFETY: no arguments, returns -1 on failure.
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        None
    } else {
        Some(cpu as usize)
    }
}

/// First kernel that emulates `iopl(3)` for port I/O only. `cli` faults
/// from there on even when the call succeeds.
const IOPL_EMULATION_SINCE: (u32, u32) = (5, 5);

fn kernel_release() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .ok()
        .map(|s| s.trim().to_string())
}

/// `(major, minor)` of a release string such as `6.18.44-fc-v139`.
fn parse_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Refuses interrupt suppression on kernels where `cli` cannot work, so
/// the run fails here instead of dying with SIGSEGV mid-measurement.
fn check_interrupt_control(release: Option<&str>) -> Result<(), Error> {
    let Some(release) = release else {
        return Ok(());
    };
    match parse_release(release) {
        Some(version) if version >= IOPL_EMULATION_SINCE => Err(Error::Privilege(format!(
            "kernel {} does not allow disabling interrupts from user space (needs < {}.{}), run without --disable-irqs",
            release, IOPL_EMULATION_SINCE.0, IOPL_EMULATION_SINCE.1
        ))),
        _ => Ok(()),
    }
}

/// `mlockall(MCL_CURRENT | MCL_FUTURE)`.
fn lock_memory() -> std::io::Result<()> {
    // SAFETY: plain flags argument.
    let ret = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Armed execution context for one run.
#[derive(Debug)]
pub struct Environment {
    cpu: Option<usize>,
    memory_locked: bool,
    io_privileged: bool,
    warmup: SampleBuffer,
    samples: SampleBuffer,
}

impl Environment {
    /// Applies pinning, memory locking and buffer pre-faulting, in that
    /// order, and acquires the privilege needed for interrupt suppression.
    pub fn prepare(config: &RunConfig) -> Result<Self, Error> {
        if let Some(cpu) = config.target_cpu {
            pin_to_cpu(cpu)?;
            match current_cpu() {
                Some(now) if now != cpu => {
                    log::warn!("pinned to cpu {} but still running on cpu {}", cpu, now)
                }
                _ => log::info!("pinned to cpu {}", cpu),
            }
        }

        let memory_locked = match lock_memory() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("mlockall() failed: {}. This may impact the results", e);
                false
            }
        };

        let warmup = SampleBuffer::allocate(config.warmup.capacity())?;
        let samples = SampleBuffer::allocate(config.measurement().capacity())?;
        log::info!(
            "mapped {} KB for data ({} samples{})",
            samples.mapped_bytes() / 1024,
            samples.capacity(),
            if samples.is_locked() { ", locked" } else { "" }
        );

        let mut env = Self {
            cpu: config.target_cpu,
            memory_locked,
            io_privileged: false,
            warmup,
            samples,
        };

        if config.suppress_interrupts {
            // validate() guarantees a target cpu here
            log::info!(
                "interrupts on cpu {} will be disabled during measurement (this requires root)",
                env.cpu.map_or(-1, |c| c as i64)
            );
            check_interrupt_control(kernel_release().as_deref())?;
            arch::set_io_privilege(3).map_err(|e| {
                Error::Privilege(format!(
                    "error while changing privilege level with iopl(): {}",
                    e
                ))
            })?;
            env.io_privileged = true;
        }

        Ok(env)
    }

    /// Masks interrupts on the pinned CPU until the returned guard drops.
    /// Returns `None` when suppression was not requested.
    pub fn suppress_interrupts(&self) -> Option<IrqGuard> {
        if !self.io_privileged {
            return None;
        }
        // SAFETY: io_privileged means iopl(3) succeeded in prepare(); the
        // guard re-enables interrupts when dropped.
        unsafe { arch::disable_interrupts() };
        Some(IrqGuard { _private: () })
    }

    pub fn cpu(&self) -> Option<usize> {
        self.cpu
    }

    pub fn memory_locked(&self) -> bool {
        self.memory_locked
    }

    /// Scratch buffer for the discarded warm-up pass.
    pub fn warmup_buffer(&mut self) -> &mut SampleBuffer {
        &mut self.warmup
    }

    pub fn sample_buffer(&mut self) -> &mut SampleBuffer {
        &mut self.samples
    }

    /// The measured samples, read-only.
    pub fn samples(&self) -> &[Sample] {
        self.samples.as_slice()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.io_privileged {
            if let Err(e) = arch::set_io_privilege(0) {
                log::warn!("could not drop I/O privilege level: {}", e);
            }
        }
        if self.memory_locked {
            // SAFETY: no arguments.
            unsafe {
                libc::munlockall();
            }
        }
        // buffers unmap themselves
    }
}

/// Interrupts stay masked on the current CPU while this is alive.
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct IrqGuard {
    _private: (),
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        // SAFETY: only constructed after a successful iopl(3).
        unsafe { arch::enable_interrupts() };
    }
}
