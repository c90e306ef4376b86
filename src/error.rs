use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    InvalidArgs(String),
    Affinity(String),
    Allocation(String),
    Privilege(String),
    TimeSource(String),
    BufferOverrun { capacity: usize },
    Sampler(String),
    Publish(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidArgs(msg) => write!(f, "invalid arguments: {}", msg),
            Error::Affinity(msg) => write!(f, "cpu affinity error: {}", msg),
            Error::Allocation(msg) => write!(f, "buffer allocation failed: {}", msg),
            Error::Privilege(msg) => write!(f, "privilege error: {}", msg),
            Error::TimeSource(msg) => write!(f, "time source error: {}", msg),
            Error::BufferOverrun { capacity } => write!(
                f,
                "sample buffer overrun: more window edges than the {} pre-allocated slots",
                capacity
            ),
            Error::Sampler(msg) => write!(f, "sampler error: {}", msg),
            Error::Publish(msg) => write!(f, "publishing results failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
