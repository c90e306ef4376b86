//! Privileged and cycle-accurate CPU instructions.
//!
//! Everything that needs inline assembly lives here: the cycle counter reads
//! (`rdtsc`, `rdtscp`), feature detection (`cpuid`) and local interrupt
//! control (`cli`/`sti`). Only x86_64 is supported; on other targets the
//! feature probes report absence and the privileged calls fail.

use std::io;

// ---------------------------------------------------------------------------
// x86_64 implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86_64")]
mod x86 {
    use core::arch::asm;
    use core::sync::atomic::{AtomicU8, Ordering};

    // 0 = unchecked, 1 = absent, 2 = present
    static RDTSCP_SUPPORT: AtomicU8 = AtomicU8::new(0);

    /// Checks CPUID leaf 0x80000001, EDX bit 27 for RDTSCP support.
    pub fn has_rdtscp() -> bool {
        let cached = RDTSCP_SUPPORT.load(Ordering::Relaxed);
        if cached != 0 {
            return cached == 2;
        }

        // SAFETY: CPUID is always available on x86_64.
        let max_extended: u32;
        unsafe {
            asm!(
                "push rbx",
                "mov eax, 0x80000000",
                "cpuid",
                "mov {out:e}, eax",
                "pop rbx",
                out = out(reg) max_extended,
                out("eax") _,
                out("ecx") _,
                out("edx") _,
            );
        }

        if max_extended < 0x8000_0001 {
            RDTSCP_SUPPORT.store(1, Ordering::Relaxed);
            return false;
        }

        let edx: u32;
        unsafe {
            asm!(
                "push rbx",
                "mov eax, 0x80000001",
                "xor ecx, ecx",
                "cpuid",
                "mov {edx:e}, edx",
                "pop rbx",
                edx = out(reg) edx,
                out("eax") _,
                out("ecx") _,
                out("edx") _,
            );
        }

        let present = (edx >> 27) & 1 == 1;
        RDTSCP_SUPPORT.store(if present { 2 } else { 1 }, Ordering::Relaxed);
        present
    }

    #[inline(always)]
    pub fn rdtsc() -> u64 {
        let lo: u32;
        let hi: u32;
        // SAFETY: RDTSC is unprivileged unless CR4.TSD is set, and touches
        // no memory.
        unsafe {
            asm!(
                "rdtsc",
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags),
            );
        }
        ((hi as u64) << 32) | lo as u64
    }

    /// RDTSCP waits for all prior instructions to retire before reading.
    #[inline(always)]
    pub fn rdtscp() -> u64 {
        let lo: u32;
        let hi: u32;
        // SAFETY: caller checked has_rdtscp(); ecx receives IA32_TSC_AUX.
        unsafe {
            asm!(
                "rdtscp",
                out("eax") lo,
                out("edx") hi,
                out("ecx") _,
                options(nomem, nostack, preserves_flags),
            );
        }
        ((hi as u64) << 32) | lo as u64
    }

    #[inline(always)]
    pub unsafe fn cli() {
        asm!("cli", options(nomem, nostack));
    }

    #[inline(always)]
    pub unsafe fn sti() {
        asm!("sti", options(nomem, nostack));
    }

    pub fn iopl(level: i64) -> std::io::Result<()> {
        // SAFETY: iopl(2) takes a plain integer and has no memory arguments.
        let ret = unsafe { libc::syscall(libc::SYS_iopl, level) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public API (arch-dispatched)
// ---------------------------------------------------------------------------

/// True when the cycle counter can be used as a time source.
pub fn has_cycle_counter() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        x86::has_rdtscp()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Raw cycle counter. Only meaningful when `has_cycle_counter()` is true.
#[inline(always)]
pub fn read_cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        x86::rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        0
    }
}

/// Serializing cycle counter read, used where ordering against the
/// preceding clock read matters.
#[inline(always)]
pub fn read_cycles_serialized() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        x86::rdtscp()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        0
    }
}

/// Sets the I/O privilege level of the calling process. Level 3 allows
/// `cli`/`sti` from user space and requires `CAP_SYS_RAWIO`.
pub fn set_io_privilege(level: i64) -> io::Result<()> {
    #[cfg(target_arch = "x86_64")]
    {
        x86::iopl(level)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = level;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "interrupt control is only available on x86_64",
        ))
    }
}

/// Masks maskable interrupts on the current CPU.
///
/// # Safety
///
/// The process must hold I/O privilege level 3 (see [`set_io_privilege`]),
/// otherwise the instruction faults. Every call must be paired with
/// [`enable_interrupts`] on the same CPU.
#[inline(always)]
pub unsafe fn disable_interrupts() {
    #[cfg(target_arch = "x86_64")]
    x86::cli();
}

/// Unmasks interrupts on the current CPU.
///
/// # Safety
///
/// Same privilege requirement as [`disable_interrupts`].
#[inline(always)]
pub unsafe fn enable_interrupts() {
    #[cfg(target_arch = "x86_64")]
    x86::sti();
}
