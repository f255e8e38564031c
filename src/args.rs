use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Precision used for every HLL-family estimator constructed from the CLI.
pub const DEFAULT_PRECISION: u8 = 14;

#[derive(Parser, Debug, Clone)]
#[clap(
    author,
    version,
    about = "count distinct IPv4 addresses in a line-oriented file"
)]
pub struct Cli {
    /// Path to the file containing one IPv4 address per line
    #[arg(long, required = true)]
    pub file: PathBuf,

    /// Cardinality estimator to use
    #[arg(long, value_enum, default_value_t = CounterKind::HyperLogLogPlus)]
    pub counter: CounterKind,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    #[value(name = "hyperloglog")]
    HyperLogLog,
    #[value(name = "hyperloglogplus")]
    HyperLogLogPlus,
    Bitmap,
    Set,
}

impl CounterKind {
    /// The label printed alongside the count, matching the flag's spelling.
    pub fn label(&self) -> &'static str {
        match self {
            CounterKind::HyperLogLog => "hyperloglog",
            CounterKind::HyperLogLogPlus => "hyperloglogplus",
            CounterKind::Bitmap => "bitmap",
            CounterKind::Set => "set",
        }
    }

    /// Whether the ingest pipeline should re-hash values before handing
    /// them to this estimator. Off for the exact bitmap and set
    /// estimators, which want the raw IPv4 integer as an index/key; on
    /// for the HLL-family estimators, which need a near-uniform hash.
    pub fn needs_hashing(&self) -> bool {
        !matches!(self, CounterKind::Bitmap | CounterKind::Set)
    }
}
