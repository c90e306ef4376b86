use std::fs;
use std::time::{Duration, Instant};

use crate::arch;
use crate::error::Error;

use super::{TimeSource, WallClock};

/// Offset aligning cycle-derived time with the wall clock.
///
/// Taken from a single wall reading and a single cycle reading. The one-shot
/// error (whatever elapses between the two reads) is not corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub offset_ns: i64,
}

/// Hardware cycle counter scaled to nanoseconds with a user-supplied
/// frequency.
#[derive(Debug, Clone, Copy)]
pub struct CycleCounter {
    ns_per_cycle: f64,
    calibration: Calibration,
}

impl CycleCounter {
    /// Validates the frequency and the CPU, then calibrates against `wall`.
    pub fn calibrate(cpu_freq_ghz: Option<f64>, wall: &WallClock) -> Result<Self, Error> {
        let ghz = match cpu_freq_ghz {
            Some(f) if f.is_finite() && f > 0.0 => f,
            Some(f) => {
                return Err(Error::TimeSource(format!(
                    "cpu frequency must be a positive number of GHz, got {}",
                    f
                )))
            }
            None => {
                return Err(Error::TimeSource(
                    "the cycle counter time source requires the cpu frequency (--cpu-freq)".into(),
                ))
            }
        };

        if !arch::has_cycle_counter() {
            return Err(Error::TimeSource(
                "this cpu does not provide rdtscp, use the realtime time source".into(),
            ));
        }

        let ns_per_cycle = 1.0 / ghz;
        let w = wall.now();
        let c = (arch::read_cycles_serialized() as f64 * ns_per_cycle) as i64;

        Ok(Self {
            ns_per_cycle,
            calibration: Calibration { offset_ns: w - c },
        })
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }
}

impl TimeSource for CycleCounter {
    #[inline(always)]
    fn now(&self) -> i64 {
        (arch::read_cycles() as f64 * self.ns_per_cycle) as i64 + self.calibration.offset_ns
    }
}

/// Counts cycles across `window` of monotonic time and returns the rate in
/// GHz. Spins for the whole window.
pub fn estimate_frequency_ghz(window: Duration) -> Result<f64, Error> {
    if !arch::has_cycle_counter() {
        return Err(Error::TimeSource("this cpu does not provide rdtscp".into()));
    }

    let start = Instant::now();
    let c0 = arch::read_cycles_serialized();
    while start.elapsed() < window {
        std::hint::spin_loop();
    }
    let c1 = arch::read_cycles_serialized();
    let elapsed_ns = start.elapsed().as_nanos() as f64;

    let cycles = c1.wrapping_sub(c0);
    if cycles == 0 || elapsed_ns <= 0.0 {
        return Err(Error::TimeSource(
            "cycle counter did not advance during calibration".into(),
        ));
    }
    Ok(cycles as f64 / elapsed_ns)
}

/// Whether `/proc/cpuinfo` advertises a constant-rate, non-stop TSC.
/// `None` if the file cannot be read or carries no flags line.
pub fn invariant_tsc_advertised() -> Option<bool> {
    let contents = fs::read_to_string("/proc/cpuinfo").ok()?;
    cpuinfo_has_invariant_tsc(&contents)
}

fn cpuinfo_has_invariant_tsc(contents: &str) -> Option<bool> {
    let flags = contents
        .lines()
        .find(|l| l.starts_with("flags"))?
        .split_once(':')?
        .1;
    let mut constant = false;
    let mut nonstop = false;
    for flag in flags.split_whitespace() {
        match flag {
            "constant_tsc" => constant = true,
            "nonstop_tsc" => nonstop = true,
            _ => {}
        }
    }
    Some(constant && nonstop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_frequency_fails() {
        let wall = WallClock::new().unwrap();
        match CycleCounter::calibrate(None, &wall) {
            Err(Error::TimeSource(msg)) => assert!(msg.contains("frequency")),
            other => panic!("expected TimeSource error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_positive_frequency_fails() {
        let wall = WallClock::new().unwrap();
        assert!(CycleCounter::calibrate(Some(0.0), &wall).is_err());
        assert!(CycleCounter::calibrate(Some(-2.5), &wall).is_err());
        assert!(CycleCounter::calibrate(Some(f64::NAN), &wall).is_err());
    }

    #[test]
    fn test_calibration_round_trip() {
        if !arch::has_cycle_counter() {
            return;
        }
        let ghz = estimate_frequency_ghz(Duration::from_millis(20)).unwrap();
        let wall = WallClock::new().unwrap();

        // Best of several attempts so a single preemption between the two
        // reads cannot fail the test.
        let mut best = i64::MAX;
        for _ in 0..10 {
            let cycle = CycleCounter::calibrate(Some(ghz), &wall).unwrap();
            let c = cycle.now();
            let w = wall.now();
            best = best.min((w - c).abs());
        }
        assert!(best < 10_000, "cycle and wall clocks differ by {}ns", best);
    }

    #[test]
    fn test_cycle_counter_advances_in_nanoseconds() {
        if !arch::has_cycle_counter() {
            return;
        }
        let ghz = estimate_frequency_ghz(Duration::from_millis(20)).unwrap();
        let wall = WallClock::new().unwrap();
        let cycle = CycleCounter::calibrate(Some(ghz), &wall).unwrap();

        let c0 = cycle.now();
        let w0 = wall.now();
        std::thread::sleep(Duration::from_millis(20));
        let c1 = cycle.now();
        let w1 = wall.now();

        let cycle_elapsed = (c1 - c0) as f64;
        let wall_elapsed = (w1 - w0) as f64;
        let ratio = cycle_elapsed / wall_elapsed;
        assert!((0.8..1.2).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn test_estimate_is_plausible() {
        if !arch::has_cycle_counter() {
            return;
        }
        let ghz = estimate_frequency_ghz(Duration::from_millis(10)).unwrap();
        assert!(ghz > 0.1 && ghz < 10.0, "estimated {} GHz", ghz);
    }

    #[test]
    fn test_cpuinfo_invariant_tsc() {
        let info = "processor\t: 0\nflags\t\t: fpu tsc constant_tsc rep_good nonstop_tsc cpuid\n";
        assert_eq!(cpuinfo_has_invariant_tsc(info), Some(true));
    }

    #[test]
    fn test_cpuinfo_missing_nonstop() {
        let info = "flags\t\t: fpu tsc constant_tsc\n";
        assert_eq!(cpuinfo_has_invariant_tsc(info), Some(false));
    }

    #[test]
    fn test_cpuinfo_without_flags_line() {
        assert_eq!(cpuinfo_has_invariant_tsc("processor : 0\n"), None);
    }
}
