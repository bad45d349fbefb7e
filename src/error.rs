//! Error types for the Arbor library.

use thiserror::Error;

/// Errors that can occur while building, validating, or emitting a forest.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A parse error occurred while reading input data.
    #[error("{0}")]
    Parse(String),

    /// A validation constraint was violated.
    #[error("{0}")]
    Validation(String),

    /// A structural error was detected during emission.
    #[error("{0}")]
    Format(String),
}
