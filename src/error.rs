// Error types for the mapping pipeline.
//
// Two kinds dominate: bad command-line structure (stage grammar, read-group
// lines), caught before any alignment work starts, and out-of-range
// conditions (unsupported format operations, coordinate overflow, buffer
// accounting) that abort the run where they are raised.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    /// Malformed configuration: stage syntax, duplicate/missing stages,
    /// empty stages, bad read-group lines. Always raised pre-flight.
    #[error("command line argument error: {0}")]
    CommandLineArgument(String),

    /// Unsupported operation or violated invariant: unknown algorithm or
    /// format id, coordinate overflow, CIGAR operator not understood,
    /// packed-buffer accounting mismatch.
    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MapError>;
