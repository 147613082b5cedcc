//! Error taxonomy for feature extraction.
//!
//! Degenerate statistics (zero depth, zero mean) are not errors: they travel
//! through the rows as `f64::NAN` and are written as `NA`.

use std::path::PathBuf;

/// Errors raised by the extraction core.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// A required input is absent or empty (no qualifying read pairs, no reads
    /// mapped to a contig, no k-mer table).
    #[error("missing input: {0}")]
    MissingInput(String),

    /// A record could not be interpreted (short pileup line, bad CIGAR).
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Alignment records were not coordinate sorted.
    #[error("alignment source is not coordinate sorted: {0}")]
    Unsorted(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {source} ({path})")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl ExtractError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }

    /// True for failures that only affect one unit of work (a contig or a
    /// feature family) and should not stop its siblings.
    pub fn is_isolated(&self) -> bool {
        matches!(self, Self::MissingInput(_) | Self::MalformedRecord(_))
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
