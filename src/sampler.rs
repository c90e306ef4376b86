use crate::clock::{TimeSource, NANOS_IN_SEC};
use crate::environment::SampleBuffer;
use crate::error::Error;
use crate::sample::Sample;

/// Length of one sampling pass and of its reporting windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerParams {
    pub duration_ns: i64,
    pub granularity_ns: i64,
}

impl SamplerParams {
    /// 1 s of 1 ms windows: long enough to fault in code and data paths.
    pub const WARMUP: SamplerParams = SamplerParams {
        duration_ns: NANOS_IN_SEC,
        granularity_ns: 1_000_000,
    };

    /// Number of buffer slots a pass needs: `duration / granularity`.
    pub fn capacity(&self) -> usize {
        if self.duration_ns <= 0 || self.granularity_ns <= 0 {
            return 0;
        }
        (self.duration_ns / self.granularity_ns) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    WarmingUp,
    Measuring,
    Done,
}

/// Busy-polls a time source and keeps the worst gap of every window.
pub struct JitterSampler<T> {
    clock: T,
    state: SamplerState,
}

impl<T: TimeSource> JitterSampler<T> {
    pub fn new(clock: T) -> Self {
        Self {
            clock,
            state: SamplerState::Idle,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Runs the discarded priming pass. Only valid from `Idle`.
    pub fn warm_up(&mut self, params: SamplerParams, buffer: &mut SampleBuffer) -> Result<usize, Error> {
        if self.state != SamplerState::Idle {
            return Err(Error::Sampler(format!(
                "warm-up requested in state {:?}",
                self.state
            )));
        }
        self.state = SamplerState::WarmingUp;
        capture(&self.clock, params, buffer)
    }

    /// Runs the real measurement. Valid from `Idle` or after warm-up; the
    /// sampler is `Done` afterwards whatever the outcome.
    pub fn measure(&mut self, params: SamplerParams, buffer: &mut SampleBuffer) -> Result<usize, Error> {
        match self.state {
            SamplerState::Idle | SamplerState::WarmingUp => {}
            state => {
                return Err(Error::Sampler(format!(
                    "measurement requested in state {:?}",
                    state
                )))
            }
        }
        self.state = SamplerState::Measuring;
        let result = capture(&self.clock, params, buffer);
        self.state = SamplerState::Done;
        result
    }
}

/// One sampling pass. `buffer` is cleared first; returns the number of
/// samples written.
///
/// Each iteration reads the clock once; the gap to the previous read is the
/// latency. When a read lands past the window edge the window's maximum is
/// recorded and the clock is read again, so the cost of the write is not
/// charged to the next window.
#[inline(always)]
fn capture<T: TimeSource>(clock: &T, params: SamplerParams, buffer: &mut SampleBuffer) -> Result<usize, Error> {
    buffer.clear();

    let mut ts = clock.now();
    let deadline = ts.saturating_add(params.duration_ns);
    let mut next_edge = ts.saturating_add(params.granularity_ns);
    let mut window_max: i64 = 0;

    while ts < deadline {
        let mut now = clock.now();
        let latency = now - ts;
        if latency > window_max {
            window_max = latency;
        }

        if now > next_edge {
            buffer.push(Sample {
                timestamp: now,
                delay: window_max,
            })?;
            window_max = 0;
            now = clock.now();
            next_edge = now.saturating_add(params.granularity_ns);
        }

        ts = now;
    }

    Ok(buffer.len())
}
