/// One reporting window: when it closed and the largest gap seen inside it.
///
/// `#[repr(C)]` keeps the 16-byte `{i64, i64}` layout so a mapped buffer
/// holds samples back to back with no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    /// Nanoseconds since the time source's epoch.
    pub timestamp: i64,
    /// Maximum inter-iteration gap in the window, in nanoseconds.
    pub delay: i64,
}

/// Aggregate view of a finished run, logged once after measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub min_delay: i64,
    pub max_delay: i64,
    pub mean_delay: f64,
    /// Timestamp of the window holding `max_delay`.
    pub worst_at: i64,
}

impl Summary {
    /// Returns `None` for an empty run.
    pub fn of(samples: &[Sample]) -> Option<Self> {
        let first = samples.first()?;
        let mut min_delay = first.delay;
        let mut max_delay = first.delay;
        let mut worst_at = first.timestamp;
        let mut sum: i128 = 0;

        for s in samples {
            if s.delay < min_delay {
                min_delay = s.delay;
            }
            if s.delay > max_delay {
                max_delay = s.delay;
                worst_at = s.timestamp;
            }
            sum += s.delay as i128;
        }

        Some(Self {
            count: samples.len(),
            min_delay,
            max_delay,
            mean_delay: sum as f64 / samples.len() as f64,
            worst_at,
        })
    }
}
