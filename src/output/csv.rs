use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::Error;
use crate::sample::Sample;

use super::ResultSink;

/// Writes `time,delay` rows, header first.
pub struct CsvSink<W: Write> {
    out: W,
}

impl CsvSink<BufWriter<File>> {
    /// Creates (truncates) `path` and writes the header immediately, so an
    /// unwritable path fails before the measurement starts.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let f = File::create(path).map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("cannot open {} for writing: {}", path.display(), e),
            ))
        })?;
        Self::new(BufWriter::new(f))
    }
}

impl CsvSink<io::Stdout> {
    pub fn stdout() -> Result<Self, Error> {
        Self::new(io::stdout())
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(mut out: W) -> Result<Self, Error> {
        writeln!(out, "time,delay")?;
        Ok(Self { out })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResultSink for CsvSink<W> {
    fn publish(&mut self, samples: &[Sample], _cpu: Option<usize>) -> Result<(), Error> {
        for s in samples {
            writeln!(self.out, "{},{}", s.timestamp, s.delay)?;
        }
        self.out.flush()?;
        Ok(())
    }
}
