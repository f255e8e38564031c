use std::fmt;
use std::io;

/// Errors surfaced by estimator construction and by the ingest pipeline.
///
/// Kept as a hand-written enum (rather than a `thiserror` derive) to match
/// this codebase's existing convention of small `std::error::Error` impls
/// for its internal error types.
#[derive(Debug)]
pub enum CounterError {
    /// A bitmap was constructed with a capacity outside `[1, 2^32 - 1]`.
    InvalidBitmapCapacity(u32),
    /// An HLL-family estimator was constructed with a precision outside `[4, 16]`.
    InvalidPrecision(u8),
    /// The counter type named on the command line is not one of the known kinds.
    UnknownCounterKind(String),
    /// Opening, stat'ing, or mapping the input file failed.
    Io(io::Error),
    /// `stat` reported a non-positive size, or the size overflowed the
    /// platform's `usize` during the mmap window computation.
    InvalidFileSize(i64),
    /// A page fault was caught while reading from a memory-mapped window.
    StorageFault { window_offset: u64 },
}

impl fmt::Display for CounterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterError::InvalidBitmapCapacity(cap) => write!(
                f,
                "invalid bitmap capacity: {cap}, must be between 1 and {}",
                u32::MAX
            ),
            CounterError::InvalidPrecision(p) => {
                write!(f, "invalid precision: {p}, must be between 4 and 16")
            }
            CounterError::UnknownCounterKind(kind) => {
                write!(f, "unknown counter kind: {kind}")
            }
            CounterError::Io(err) => write!(f, "I/O failure: {err}"),
            CounterError::InvalidFileSize(size) => {
                write!(f, "wrong file size: {size}")
            }
            CounterError::StorageFault { window_offset } => write!(
                f,
                "page fault while reading memory-mapped window at offset {window_offset}"
            ),
        }
    }
}

impl std::error::Error for CounterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CounterError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CounterError {
    fn from(err: io::Error) -> Self {
        CounterError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, CounterError>;
