use crate::clock::cycle::invariant_tsc_advertised;
use crate::clock::{CycleCounter, TimeSource, WallClock, NANOS_IN_SEC};
use crate::config::{RunConfig, TimeSourceKind};
use crate::environment::Environment;
use crate::error::Error;
use crate::output::{OutputTarget, ResultSink};
use crate::sample::Summary;
use crate::sampler::JitterSampler;

/// What a completed run produced, beyond the published samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub count: usize,
    pub capacity: usize,
    /// False when `mlockall` failed and page faults may have skewed results.
    pub memory_locked: bool,
    pub summary: Option<Summary>,
}

/// Validates, opens the sink, measures and publishes.
///
/// The configuration is checked before the sink is opened, so an invalid
/// run touches no file or socket.
pub fn run(config: &RunConfig, output: &OutputTarget) -> Result<RunReport, Error> {
    config.validate()?;
    let mut sink = output.open()?;
    execute(config, sink.as_mut())
}

/// Measures with an already constructed sink.
pub fn execute(config: &RunConfig, sink: &mut dyn ResultSink) -> Result<RunReport, Error> {
    config.validate()?;
    log_parameters(config);

    let mut env = Environment::prepare(config)?;

    let count = match config.time_source {
        TimeSourceKind::Wall => sample(&mut env, config, WallClock::new()?)?,
        TimeSourceKind::CycleCounter => {
            if invariant_tsc_advertised() == Some(false) {
                log::warn!(
                    "cpu does not advertise constant_tsc/nonstop_tsc, cycle-based timestamps may drift"
                );
            }
            let wall = WallClock::new()?;
            let clock = CycleCounter::calibrate(config.cpu_freq_ghz, &wall)?;
            log::debug!(
                "cycle counter calibrated, offset {}ns",
                clock.calibration().offset_ns
            );
            sample(&mut env, config, clock)?
        }
    };

    log::info!("finished measurement, captured {} data points", count);
    if env.sample_buffer().is_empty() {
        log::warn!("no window completed within the run, nothing to publish");
    }

    let summary = Summary::of(env.samples());
    if let Some(s) = &summary {
        log::info!(
            "delay min {}ns, mean {:.0}ns, max {}ns (window ending at {})",
            s.min_delay,
            s.mean_delay,
            s.max_delay,
            s.worst_at
        );
    }
    if !env.memory_locked() {
        log::warn!("memory was not locked, results may include page fault latency");
    }

    let report = RunReport {
        count,
        capacity: config.capacity(),
        memory_locked: env.memory_locked(),
        summary,
    };

    sink.publish(env.samples(), env.cpu()).map_err(|e| match e {
        Error::Publish(msg) => Error::Publish(msg),
        other => Error::Publish(other.to_string()),
    })?;

    Ok(report)
}

/// Warm-up pass, then the measurement pass with interrupts masked if
/// requested. The guard is dropped before this returns, on every path.
fn sample<T: TimeSource>(env: &mut Environment, config: &RunConfig, clock: T) -> Result<usize, Error> {
    let mut sampler = JitterSampler::new(clock);

    let warm = sampler.warm_up(config.warmup, env.warmup_buffer())?;
    log::debug!("warm-up captured {} windows ({:?})", warm, sampler.state());

    log::info!("running jitter measurement");
    let count = {
        let _irqs = env.suppress_interrupts();
        sampler.measure(config.measurement(), env.sample_buffer())
    };
    log::debug!("sampler {:?}", sampler.state());
    count
}

fn log_parameters(config: &RunConfig) {
    match config.target_cpu {
        Some(cpu) => log::info!("target cpu: {}", cpu),
        None => log::info!("target cpu: not pinned"),
    }
    log::info!("duration: {}s", config.duration_ns / NANOS_IN_SEC);
    log::info!("report interval: {}ms", config.granularity_ns / 1_000_000);
    log::info!(
        "time source: {}",
        match config.time_source {
            TimeSourceKind::Wall => "realtime".to_string(),
            TimeSourceKind::CycleCounter =>
                format!("rdtsc @ {} GHz", config.cpu_freq_ghz.unwrap_or_default()),
        }
    );
}
