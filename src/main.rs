mod arch;
mod calibrate;
mod cli;
mod clock;
mod config;
mod driver;
mod environment;
mod error;
mod logging;
mod output;
mod sample;
mod sampler;

use std::path::Path;
use std::process;

use clap::Parser;

use cli::{Cli, Command, RunArgs};
use config::RunConfig;
use error::Error;
use output::OutputTarget;

/// Build the run configuration by layering: defaults → TOML file → CLI overrides.
fn build_run_config(
    config_file: Option<&Path>,
    run_args: &RunArgs,
) -> Result<(RunConfig, OutputTarget), Error> {
    let file = config::load_config(config_file)?;
    let mut run = file.run;

    // Apply CLI overrides (only if explicitly set)
    if let Some(v) = run_args.cpu {
        run.cpu = Some(v);
    }
    if let Some(v) = run_args.time_source {
        run.time_source = v;
    }
    if let Some(v) = run_args.cpu_freq {
        run.cpu_freq_ghz = Some(v);
    }
    if let Some(v) = run_args.duration {
        run.duration_secs = v;
    }
    if let Some(v) = run_args.report_interval {
        run.report_interval_ms = v;
    }
    if let Some(v) = run_args.disable_irqs {
        run.disable_irqs = v;
    }

    let output = match (&run_args.output, &run.output) {
        (Some(target), _) => target.clone(),
        (None, Some(s)) => s.parse()?,
        (None, None) => OutputTarget::default(),
    };

    let config = RunConfig::from_settings(&run, &file.warmup)?;
    Ok((config, output))
}

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Calibrate(args)) => {
            logging::init(&args.log);
            if let Err(e) = calibrate::run(args) {
                log::error!(target: "jitter_sampler::calibrate", "{}", e);
                process::exit(1);
            }
        }
        None => {
            logging::init(&cli.log);
            let (config, output) = match build_run_config(cli.config_file.as_deref(), &cli.run) {
                Ok(v) => v,
                Err(e) => {
                    log::error!("{}", e);
                    process::exit(1);
                }
            };
            if let Err(e) = driver::run(&config, &output) {
                log::error!("{}", e);
                process::exit(1);
            }
        }
    }
}
