use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Args, ValueEnum};
use log::{Level, LevelFilter, Log, Metadata, Record};

type SyslogLogger = syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>;

const PROGRAM: &str = "jitter-sampler";

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Log level (default: info)
    #[arg(long = "log-level", value_enum)]
    pub log_level: Option<LogLevel>,

    /// Append log messages to a file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Send log messages to syslog
    #[arg(long)]
    pub syslog: bool,
}

/// One place a record ends up. Stderr is always present.
enum Destination {
    Stderr,
    File(Mutex<File>),
    Syslog(Mutex<SyslogLogger>),
}

impl Destination {
    /// `line` is the prefixed form for terminals and files; syslog gets the
    /// bare message since it adds its own program tag.
    fn write(&self, record: &Record, line: &str) {
        match self {
            Destination::Stderr => {
                let _ = writeln!(std::io::stderr().lock(), "{}", line);
            }
            Destination::File(file) => {
                if let Ok(mut f) = file.lock() {
                    let _ = writeln!(f, "{}", line);
                }
            }
            Destination::Syslog(logger) => {
                if let Ok(mut l) = logger.lock() {
                    let text = record.args().to_string();
                    let _ = match record.level() {
                        Level::Error => l.err(text),
                        Level::Warn => l.warning(text),
                        Level::Info => l.info(text),
                        Level::Debug | Level::Trace => l.debug(text),
                    };
                }
            }
        }
    }

    fn flush(&self) {
        if let Destination::File(file) = self {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

/// Fans every record out to its destinations. Never called from the
/// sampling loop.
struct SamplerLogger {
    destinations: Vec<Destination>,
}

/// `[jitter-sampler] warning: ...`, with the subcommand in the prefix for
/// records emitted by `calibrate`.
fn render(record: &Record) -> String {
    let tag = match record.level() {
        Level::Error => "error",
        Level::Warn => "warning",
        Level::Info => "info",
        Level::Debug | Level::Trace => "debug",
    };
    if record.target().ends_with("::calibrate") {
        format!("[{} calibrate] {}: {}", PROGRAM, tag, record.args())
    } else {
        format!("[{}] {}: {}", PROGRAM, tag, record.args())
    }
}

impl Log for SamplerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = render(record);
        for destination in &self.destinations {
            destination.write(record, &line);
        }
    }

    fn flush(&self) {
        self.destinations.iter().for_each(Destination::flush);
    }
}

fn open_destinations(args: &LogArgs) -> Vec<Destination> {
    let mut destinations = vec![Destination::Stderr];

    if let Some(path) = &args.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => destinations.push(Destination::File(Mutex::new(f))),
            Err(e) => eprintln!(
                "[{}] warning: cannot open log file {}: {}",
                PROGRAM,
                path.display(),
                e
            ),
        }
    }

    if args.syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: PROGRAM.into(),
            pid: std::process::id(),
        };
        match syslog::unix(formatter) {
            Ok(l) => destinations.push(Destination::Syslog(Mutex::new(l))),
            Err(e) => eprintln!("[{}] warning: cannot connect to syslog: {}", PROGRAM, e),
        }
    }

    destinations
}

pub fn init(args: &LogArgs) {
    let logger = SamplerLogger {
        destinations: open_destinations(args),
    };
    let _ = log::set_boxed_logger(Box::new(logger));
    log::set_max_level(args.log_level.unwrap_or(LogLevel::Info).into());
}
