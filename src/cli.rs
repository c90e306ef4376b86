use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::TimeSourceKind;
use crate::logging::LogArgs;
use crate::output::OutputTarget;

/// Measurement overrides. Anything left unset falls back to the config file,
/// then to the built-in defaults.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Target cpu to run on (default: not pinned)
    #[arg(short = 'c', long)]
    pub cpu: Option<usize>,

    /// Timestamp capturing method (default: realtime)
    #[arg(short = 't', long = "time-source", value_enum)]
    pub time_source: Option<TimeSourceKind>,

    /// Target cpu frequency in GHz, required by the rdtsc time source
    #[arg(short = 'f', long = "cpu-freq")]
    pub cpu_freq: Option<f64>,

    /// Sampling duration in seconds (default: 60)
    #[arg(short = 'd', long)]
    pub duration: Option<u64>,

    /// Jitter reporting interval in milliseconds (default: 1000)
    #[arg(short = 'r', long = "report-interval")]
    pub report_interval: Option<u64>,

    /// Where to send results: stdout, csv://<file> or influx://<host:port> (default: stdout)
    #[arg(short = 'o', long)]
    pub output: Option<OutputTarget>,

    /// Disable interrupts on the target cpu while measuring (requires root and --cpu)
    #[arg(long = "disable-irqs", alias = "noirqs", num_args = 0..=1, default_missing_value = "true")]
    pub disable_irqs: Option<bool>,
}

#[derive(Debug, Parser)]
#[command(name = "jitter-sampler", about = "Measures OS scheduling jitter on a CPU core")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,

    /// Configuration file path (default: /etc/jitter-sampler.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Estimate the cycle counter frequency to pass to --cpu-freq
    Calibrate(CalibrateArgs),
}

#[derive(Debug, Parser)]
pub struct CalibrateArgs {
    /// Cpu to pin to while counting cycles (default: not pinned)
    #[arg(short = 'c', long)]
    pub cpu: Option<usize>,

    /// Length of each round in milliseconds
    #[arg(short = 'w', long = "window", default_value_t = 200)]
    pub window_ms: u64,

    /// Number of rounds; the median is reported
    #[arg(short = 'n', long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub rounds: u32,

    #[command(flatten)]
    pub log: LogArgs,
}
