use std::path::Path;

use serde::Deserialize;

use crate::clock::NANOS_IN_SEC;
use crate::error::Error;
use crate::sampler::SamplerParams;

const DEFAULT_CONFIG_PATH: &str = "/etc/jitter-sampler.toml";

/// Longest accepted duration or interval: 30 days. Keeps window edges far
/// from `i64::MAX` when added to a wall-clock timestamp.
const MAX_SPAN_NS: i64 = 30 * 24 * 3600 * NANOS_IN_SEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
pub enum TimeSourceKind {
    /// clock_gettime(CLOCK_REALTIME)
    #[serde(rename = "realtime", alias = "wall")]
    #[value(name = "realtime", alias = "wall")]
    Wall,
    /// RDTSC scaled by --cpu-freq
    #[serde(rename = "rdtsc")]
    #[value(name = "rdtsc")]
    CycleCounter,
}

/// `[run]` table. Units match the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub cpu: Option<usize>,
    pub duration_secs: u64,
    pub report_interval_ms: u64,
    pub time_source: TimeSourceKind,
    pub cpu_freq_ghz: Option<f64>,
    pub disable_irqs: bool,
    pub output: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            cpu: None,
            duration_secs: 60,
            report_interval_ms: 1000,
            time_source: TimeSourceKind::Wall,
            cpu_freq_ghz: None,
            disable_irqs: false,
            output: None,
        }
    }
}

/// `[warmup]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmupSettings {
    pub duration_ms: u64,
    pub report_interval_us: u64,
}

impl Default for WarmupSettings {
    fn default() -> Self {
        Self {
            duration_ms: (SamplerParams::WARMUP.duration_ns / 1_000_000) as u64,
            report_interval_us: (SamplerParams::WARMUP.granularity_ns / 1_000) as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunSettings,
    pub warmup: WarmupSettings,
}

/// Validated, nanosecond-based parameters of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub duration_ns: i64,
    pub granularity_ns: i64,
    pub target_cpu: Option<usize>,
    pub suppress_interrupts: bool,
    pub time_source: TimeSourceKind,
    pub cpu_freq_ghz: Option<f64>,
    pub warmup: SamplerParams,
}

impl RunConfig {
    /// Converts file/CLI units to nanoseconds and validates the result.
    pub fn from_settings(run: &RunSettings, warmup: &WarmupSettings) -> Result<Self, Error> {
        let config = Self {
            duration_ns: to_nanos(run.duration_secs, NANOS_IN_SEC, "duration")?,
            granularity_ns: to_nanos(run.report_interval_ms, 1_000_000, "report interval")?,
            target_cpu: run.cpu,
            suppress_interrupts: run.disable_irqs,
            time_source: run.time_source,
            cpu_freq_ghz: run.cpu_freq_ghz,
            warmup: SamplerParams {
                duration_ns: to_nanos(warmup.duration_ms, 1_000_000, "warm-up duration")?,
                granularity_ns: to_nanos(warmup.report_interval_us, 1_000, "warm-up interval")?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that cannot produce a meaningful run. Runs
    /// before anything is pinned, mapped, opened or sent.
    pub fn validate(&self) -> Result<(), Error> {
        if self.duration_ns <= 0 {
            return Err(Error::InvalidArgs("duration must be greater than 0".into()));
        }
        if self.granularity_ns <= 0 {
            return Err(Error::InvalidArgs(
                "report interval must be greater than 0".into(),
            ));
        }
        for (what, ns) in [
            ("duration", self.duration_ns),
            ("report interval", self.granularity_ns),
            ("warm-up duration", self.warmup.duration_ns),
            ("warm-up interval", self.warmup.granularity_ns),
        ] {
            if ns > MAX_SPAN_NS {
                return Err(Error::InvalidArgs(format!(
                    "{} must not exceed {} days",
                    what,
                    MAX_SPAN_NS / NANOS_IN_SEC / 86_400
                )));
            }
        }
        if self.warmup.duration_ns < 0 || self.warmup.granularity_ns <= 0 {
            return Err(Error::InvalidArgs(
                "warm-up duration must not be negative and its interval must be greater than 0"
                    .into(),
            ));
        }
        if self.time_source == TimeSourceKind::CycleCounter {
            match self.cpu_freq_ghz {
                Some(f) if f.is_finite() && f > 0.0 => {}
                Some(f) => {
                    return Err(Error::InvalidArgs(format!(
                        "cpu frequency must be a positive number of GHz, got {}",
                        f
                    )))
                }
                None => {
                    return Err(Error::InvalidArgs(
                        "using rdtsc-based time requires passing the cpu frequency with --cpu-freq"
                            .into(),
                    ))
                }
            }
        }
        if self.suppress_interrupts && self.target_cpu.is_none() {
            return Err(Error::InvalidArgs(
                "disabling interrupts requires a target cpu (--cpu)".into(),
            ));
        }
        Ok(())
    }

    pub fn measurement(&self) -> SamplerParams {
        SamplerParams {
            duration_ns: self.duration_ns,
            granularity_ns: self.granularity_ns,
        }
    }

    /// Number of samples the measurement pass can produce.
    pub fn capacity(&self) -> usize {
        self.measurement().capacity()
    }
}

fn to_nanos(value: u64, scale: i64, what: &str) -> Result<i64, Error> {
    i64::try_from(value)
        .ok()
        .and_then(|v| v.checked_mul(scale))
        .ok_or_else(|| Error::InvalidArgs(format!("{} of {} is too large", what, value)))
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/jitter-sampler.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidArgs(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgs(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidArgs(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    log::debug!("loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn run_config() -> RunConfig {
        RunConfig::from_settings(&RunSettings::default(), &WarmupSettings::default()).unwrap()
    }

    #[test]
    fn test_default_values() {
        let cfg = run_config();
        assert_eq!(cfg.duration_ns, 60 * NANOS_IN_SEC);
        assert_eq!(cfg.granularity_ns, NANOS_IN_SEC);
        assert_eq!(cfg.target_cpu, None);
        assert!(!cfg.suppress_interrupts);
        assert_eq!(cfg.time_source, TimeSourceKind::Wall);
        assert_eq!(cfg.cpu_freq_ghz, None);
        assert_eq!(cfg.warmup, SamplerParams::WARMUP);
        assert_eq!(cfg.capacity(), 60);
    }

    #[test]
    fn test_capacity_is_integer_division() {
        let run = RunSettings {
            duration_secs: 10,
            report_interval_ms: 3000,
            ..Default::default()
        };
        let cfg = RunConfig::from_settings(&run, &WarmupSettings::default()).unwrap();
        assert_eq!(cfg.capacity(), 3);
    }

    #[test]
    fn test_cycle_counter_requires_frequency() {
        let run = RunSettings {
            time_source: TimeSourceKind::CycleCounter,
            ..Default::default()
        };
        match RunConfig::from_settings(&run, &WarmupSettings::default()) {
            Err(Error::InvalidArgs(msg)) => assert!(msg.contains("--cpu-freq")),
            other => panic!("expected InvalidArgs, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_counter_rejects_bad_frequency() {
        for f in [0.0, -1.0, f64::INFINITY, f64::NAN] {
            let run = RunSettings {
                time_source: TimeSourceKind::CycleCounter,
                cpu_freq_ghz: Some(f),
                ..Default::default()
            };
            assert!(RunConfig::from_settings(&run, &WarmupSettings::default()).is_err());
        }
    }

    #[test]
    fn test_cycle_counter_with_frequency() {
        let run = RunSettings {
            time_source: TimeSourceKind::CycleCounter,
            cpu_freq_ghz: Some(2.9),
            ..Default::default()
        };
        let cfg = RunConfig::from_settings(&run, &WarmupSettings::default()).unwrap();
        assert_eq!(cfg.cpu_freq_ghz, Some(2.9));
    }

    #[test]
    fn test_zero_duration_and_interval_rejected() {
        let zero_duration = RunSettings {
            duration_secs: 0,
            ..Default::default()
        };
        assert!(RunConfig::from_settings(&zero_duration, &WarmupSettings::default()).is_err());

        let zero_interval = RunSettings {
            report_interval_ms: 0,
            ..Default::default()
        };
        assert!(RunConfig::from_settings(&zero_interval, &WarmupSettings::default()).is_err());
    }

    #[test]
    fn test_interval_longer_than_duration_is_valid() {
        let run = RunSettings {
            duration_secs: 1,
            report_interval_ms: 5000,
            ..Default::default()
        };
        let cfg = RunConfig::from_settings(&run, &WarmupSettings::default()).unwrap();
        assert_eq!(cfg.capacity(), 0);
    }

    #[test]
    fn test_disable_irqs_requires_cpu() {
        let run = RunSettings {
            disable_irqs: true,
            ..Default::default()
        };
        assert!(RunConfig::from_settings(&run, &WarmupSettings::default()).is_err());

        let pinned = RunSettings {
            disable_irqs: true,
            cpu: Some(2),
            ..Default::default()
        };
        assert!(RunConfig::from_settings(&pinned, &WarmupSettings::default()).is_ok());
    }

    #[test]
    fn test_duration_overflow_rejected() {
        let run = RunSettings {
            duration_secs: u64::MAX,
            ..Default::default()
        };
        match RunConfig::from_settings(&run, &WarmupSettings::default()) {
            Err(Error::InvalidArgs(msg)) => assert!(msg.contains("too large")),
            other => panic!("expected InvalidArgs, got {:?}", other),
        }
    }

    #[test]
    fn test_span_beyond_thirty_days_rejected() {
        let run = RunSettings {
            duration_secs: 1,
            report_interval_ms: 8_000_000_000_000,
            ..Default::default()
        };
        match RunConfig::from_settings(&run, &WarmupSettings::default()) {
            Err(Error::InvalidArgs(msg)) => {
                assert!(msg.contains("report interval"), "{}", msg);
                assert!(msg.contains("30 days"), "{}", msg);
            }
            other => panic!("expected InvalidArgs, got {:?}", other),
        }

        let long_run = RunSettings {
            duration_secs: 31 * 86_400,
            ..Default::default()
        };
        assert!(RunConfig::from_settings(&long_run, &WarmupSettings::default()).is_err());

        let month = RunSettings {
            duration_secs: 30 * 86_400,
            report_interval_ms: 30 * 86_400 * 1000,
            ..Default::default()
        };
        let cfg = RunConfig::from_settings(&month, &WarmupSettings::default()).unwrap();
        assert_eq!(cfg.capacity(), 1);
    }

    #[test]
    fn test_toml_parsing() {
        let dir = std::env::temp_dir();
        let path = dir.join("jitter_sampler_test_config.toml");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            write!(
                f,
                r#"
[run]
cpu = 3
duration_secs = 120
time_source = "rdtsc"
cpu_freq_ghz = 3.1
output = "csv:///tmp/out.csv"

[warmup]
duration_ms = 250
"#
            )
            .unwrap();
        }
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.run.cpu, Some(3));
        assert_eq!(config.run.duration_secs, 120);
        assert_eq!(config.run.time_source, TimeSourceKind::CycleCounter);
        assert_eq!(config.run.cpu_freq_ghz, Some(3.1));
        assert_eq!(config.run.output.as_deref(), Some("csv:///tmp/out.csv"));
        assert_eq!(config.warmup.duration_ms, 250);
        // Unset fields should get defaults
        assert_eq!(config.run.report_interval_ms, 1000);
        assert!(!config.run.disable_irqs);
        assert_eq!(config.warmup.report_interval_us, 1000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_wall_alias_in_toml() {
        let config: Config = toml::from_str("[run]\ntime_source = \"wall\"\n").unwrap();
        assert_eq!(config.run.time_source, TimeSourceKind::Wall);
    }

    #[test]
    fn test_unknown_time_source_rejected() {
        let result: Result<Config, _> = toml::from_str("[run]\ntime_source = \"hpet\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_explicit_config_errors() {
        let path = std::path::Path::new("/tmp/jitter_sampler_nonexistent_config.toml");
        let result = load_config(Some(path));
        assert!(result.is_err());
    }
}
