//! Time sources for the sampling loop.
//!
//! A [`TimeSource`] reports "now" in nanoseconds. The sampler is generic over
//! it, so the strategy is resolved once at startup and the hot loop holds a
//! single static call.

pub mod cycle;
pub mod wall;

pub use cycle::CycleCounter;
pub use wall::WallClock;

pub const NANOS_IN_SEC: i64 = 1_000_000_000;

pub trait TimeSource {
    /// Nanoseconds since the source's epoch. Monotonic for one run.
    ///
    /// Called on every loop iteration: must not allocate, lock, log or make
    /// any syscall beyond the clock read itself.
    fn now(&self) -> i64;
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    #[inline(always)]
    fn now(&self) -> i64 {
        (**self).now()
    }
}
