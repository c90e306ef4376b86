//! Result sinks: where a finished run's samples go.

pub mod csv;
pub mod influx;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;
use crate::sample::Sample;

pub use self::csv::CsvSink;
pub use self::influx::InfluxSink;

/// Consumer of a completed measurement.
///
/// Receives the written samples in order (the slice length is the sample
/// count) and the CPU the run was pinned to. Called only after measurement
/// has finished, so a failure here never affects the samples themselves.
pub trait ResultSink {
    fn publish(&mut self, samples: &[Sample], cpu: Option<usize>) -> Result<(), Error>;
}

/// The value reported for an unpinned run.
pub(crate) fn cpu_label(cpu: Option<usize>) -> String {
    match cpu {
        Some(c) => c.to_string(),
        None => "-1".to_string(),
    }
}

/// Parsed `--output` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputTarget {
    /// CSV on standard output
    #[default]
    Stdout,
    /// `csv://<path>`
    Csv(PathBuf),
    /// `influx://<host>:<port>`, line protocol over UDP
    Influx { host: String, port: u16 },
}

impl OutputTarget {
    /// Creates the sink: opens the file or resolves and binds the socket.
    pub fn open(&self) -> Result<Box<dyn ResultSink>, Error> {
        match self {
            OutputTarget::Stdout => {
                log::info!("writing results to stdout");
                Ok(Box::new(CsvSink::stdout()?))
            }
            OutputTarget::Csv(path) => {
                log::info!("writing results to csv file: {}", path.display());
                Ok(Box::new(CsvSink::create(path)?))
            }
            OutputTarget::Influx { host, port } => {
                log::info!("writing results to influx: {}:{}", host, port);
                Ok(Box::new(InfluxSink::connect(host, *port)?))
            }
        }
    }
}

impl FromStr for OutputTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "stdout" || s == "-" {
            return Ok(OutputTarget::Stdout);
        }
        if let Some(path) = s.strip_prefix("csv://") {
            if path.is_empty() {
                return Err(Error::InvalidArgs("csv output needs a file path".into()));
            }
            return Ok(OutputTarget::Csv(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("influx://") {
            let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
                Error::InvalidArgs(format!("influx output must be influx://<host>:<port>, got {}", s))
            })?;
            if host.is_empty() {
                return Err(Error::InvalidArgs("influx output needs a host".into()));
            }
            let port = port
                .parse::<u16>()
                .map_err(|e| Error::InvalidArgs(format!("invalid influx port {:?}: {}", port, e)))?;
            return Ok(OutputTarget::Influx {
                host: host.to_string(),
                port,
            });
        }
        Err(Error::InvalidArgs(format!(
            "unsupported output {:?} (expected stdout, csv://<file> or influx://<host:port>)",
            s
        )))
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Stdout => write!(f, "stdout"),
            OutputTarget::Csv(path) => write!(f, "csv://{}", path.display()),
            OutputTarget::Influx { host, port } => write!(f, "influx://{}:{}", host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stdout() {
        assert_eq!("stdout".parse::<OutputTarget>().unwrap(), OutputTarget::Stdout);
        assert_eq!("-".parse::<OutputTarget>().unwrap(), OutputTarget::Stdout);
    }

    #[test]
    fn test_parse_csv() {
        assert_eq!(
            "csv:///tmp/jitter.csv".parse::<OutputTarget>().unwrap(),
            OutputTarget::Csv(PathBuf::from("/tmp/jitter.csv"))
        );
        assert!("csv://".parse::<OutputTarget>().is_err());
    }

    #[test]
    fn test_parse_influx() {
        assert_eq!(
            "influx://metrics.local:8089".parse::<OutputTarget>().unwrap(),
            OutputTarget::Influx {
                host: "metrics.local".into(),
                port: 8089
            }
        );
    }

    #[test]
    fn test_parse_influx_errors() {
        assert!("influx://metrics.local".parse::<OutputTarget>().is_err());
        assert!("influx://:8089".parse::<OutputTarget>().is_err());
        assert!("influx://host:99999".parse::<OutputTarget>().is_err());
    }

    #[test]
    fn test_parse_unknown_scheme() {
        match "kafka://broker:9092".parse::<OutputTarget>() {
            Err(Error::InvalidArgs(msg)) => assert!(msg.contains("unsupported output")),
            other => panic!("expected InvalidArgs, got {:?}", other),
        }
    }

    #[test]
    fn test_display_matches_parse() {
        for s in ["stdout", "csv:///var/tmp/a.csv", "influx://10.0.0.1:8089"] {
            assert_eq!(s.parse::<OutputTarget>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_cpu_label() {
        assert_eq!(cpu_label(Some(3)), "3");
        assert_eq!(cpu_label(None), "-1");
    }
}
