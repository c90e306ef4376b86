use std::ptr::{self, NonNull};

use crate::error::Error;
use crate::sample::Sample;

/// Fixed-capacity sample storage backed by its own anonymous mapping.
///
/// Pages are populated, locked when the kernel allows it, and zeroed before
/// the buffer is handed out, so writes during sampling never fault. The only
/// way in is [`SampleBuffer::push`], which refuses to write past capacity.
pub struct SampleBuffer {
    ptr: NonNull<Sample>,
    capacity: usize,
    len: usize,
    mapped_bytes: usize,
    locked: bool,
}

impl SampleBuffer {
    /// Maps and pre-faults room for exactly `capacity` samples.
    pub(crate) fn allocate(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                capacity: 0,
                len: 0,
                mapped_bytes: 0,
                locked: false,
            });
        }

        let bytes = capacity
            .checked_mul(std::mem::size_of::<Sample>())
            .ok_or_else(|| Error::Allocation(format!("{} samples overflow usize", capacity)))?;

        let base = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_POPULATE;
        let (addr, locked) = match map(bytes, base | libc::MAP_LOCKED) {
            Some(addr) => (addr, true),
            None => {
                log::debug!(
                    "locked mapping of {} bytes refused ({}), retrying unlocked",
                    bytes,
                    std::io::Error::last_os_error()
                );
                let addr = map(bytes, base).ok_or_else(|| {
                    Error::Allocation(format!(
                        "mmap of {} KB failed: {}",
                        bytes / 1024,
                        std::io::Error::last_os_error()
                    ))
                })?;
                (addr, false)
            }
        };

        // SAFETY: addr is a fresh mapping of `bytes` bytes we own.
        unsafe {
            libc::madvise(addr, bytes, libc::MADV_SEQUENTIAL);
        }

        let ptr = match NonNull::new(addr as *mut Sample) {
            Some(p) => p,
            None => {
                return Err(Error::Allocation("mmap returned a null mapping".into()));
            }
        };

        // Touch every slot once so no page fault lands inside the loop.
        for i in 0..capacity {
            // SAFETY: i < capacity, inside the mapping; Sample is Copy and
            // the mapping is suitably aligned (page aligned).
            unsafe { ptr::write_volatile(ptr.as_ptr().add(i), Sample::default()) };
        }

        Ok(Self {
            ptr,
            capacity,
            len: 0,
            mapped_bytes: bytes,
            locked,
        })
    }

    /// Appends one sample, failing instead of writing past the mapping.
    #[inline(always)]
    pub fn push(&mut self, sample: Sample) -> Result<(), Error> {
        if self.len >= self.capacity {
            return Err(Error::BufferOverrun {
                capacity: self.capacity,
            });
        }
        // SAFETY: len < capacity, so the slot lies inside the mapping.
        unsafe { ptr::write(self.ptr.as_ptr().add(self.len), sample) };
        self.len += 1;
        Ok(())
    }

    /// Forgets previously written samples. The pages stay mapped and warm.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mapped_bytes(&self) -> usize {
        self.mapped_bytes
    }

    /// Whether the mapping itself was locked with `MAP_LOCKED`.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn as_slice(&self) -> &[Sample] {
        // SAFETY: the first len slots were written by push() (and all slots
        // were initialized in allocate()); a dangling pointer is valid for a
        // zero-length slice.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for SampleBuffer {
    fn drop(&mut self) {
        if self.mapped_bytes == 0 {
            return;
        }
        // SAFETY: ptr/mapped_bytes describe the mapping created in allocate().
        let ret = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.mapped_bytes) };
        if ret != 0 {
            log::warn!(
                "munmap of sample buffer failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .field("locked", &self.locked)
            .finish()
    }
}

fn map(bytes: usize, flags: libc::c_int) -> Option<*mut libc::c_void> {
    // SAFETY: anonymous mapping, no fd, kernel picks the address.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        None
    } else {
        Some(addr)
    }
}
