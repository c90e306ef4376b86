use std::time::Duration;

use crate::cli::CalibrateArgs;
use crate::clock::cycle::{estimate_frequency_ghz, invariant_tsc_advertised};
use crate::environment;
use crate::error::Error;

/// Estimates the cycle counter rate and prints the value for `--cpu-freq`.
pub fn run(args: &CalibrateArgs) -> Result<(), Error> {
    if args.window_ms == 0 {
        return Err(Error::InvalidArgs("window must be greater than 0".into()));
    }

    if let Some(cpu) = args.cpu {
        environment::pin_to_cpu(cpu)?;
        log::info!("pinned to cpu {}", cpu);
    }

    match invariant_tsc_advertised() {
        Some(true) => log::info!("cpu advertises an invariant tsc"),
        Some(false) => log::warn!(
            "cpu does not advertise constant_tsc/nonstop_tsc, the rate may change with frequency scaling"
        ),
        None => log::debug!("could not read tsc flags from /proc/cpuinfo"),
    }

    let window = Duration::from_millis(args.window_ms);
    let mut estimates = Vec::with_capacity(args.rounds as usize);
    for round in 1..=args.rounds {
        let ghz = estimate_frequency_ghz(window)?;
        log::debug!("round {}: {:.4} GHz", round, ghz);
        estimates.push(ghz);
    }

    let Some(ghz) = median(&mut estimates) else {
        return Err(Error::InvalidArgs("at least one round is required".into()));
    };
    let spread = spread(&estimates);
    log::info!(
        "median of {} rounds: {:.4} GHz (spread {:.4} GHz)",
        estimates.len(),
        ghz,
        spread
    );

    println!("{:.4}", ghz);
    Ok(())
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn spread(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max - min
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogArgs;

    fn args(window_ms: u64, rounds: u32) -> CalibrateArgs {
        CalibrateArgs {
            cpu: None,
            window_ms,
            rounds,
            log: LogArgs {
                log_level: None,
                log_file: None,
                syslog: false,
            },
        }
    }

    #[test]
    fn test_median_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn test_median_even() {
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_median_empty() {
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_spread() {
        assert_eq!(spread(&[2.9, 3.0, 2.95]), 3.0 - 2.9);
        assert_eq!(spread(&[]), 0.0);
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(run(&args(0, 3)), Err(Error::InvalidArgs(_))));
    }

    #[test]
    fn test_short_calibration() {
        if !crate::arch::has_cycle_counter() {
            return;
        }
        run(&args(5, 3)).unwrap();
    }
}
