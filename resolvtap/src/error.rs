//! Error types for the probe pipeline.
//!
//! `Error` covers everything that can abort a run. Per-record decode
//! failures are a separate `DecodeError` because the pump only logs them.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to load instrumentation artifact {path}")]
    ArtifactLoad {
        path: PathBuf,
        #[source]
        source: aya::EbpfError,
    },

    #[error("Could not find a loaded library matching '{0}'")]
    LibraryNotFound(String),

    #[error("Failed to read symbols from {path}: {reason}")]
    BadBinary { path: PathBuf, reason: String },

    #[error("Symbol '{symbol}' not found in {path}")]
    SymbolNotFound { symbol: String, path: PathBuf },

    #[error("Program {0} is not declared by the artifact or is not a uprobe")]
    ProgramNotFound(String),

    #[error("Kernel rejected probe {probe} at {library}+{offset:#x}")]
    AttachRejected {
        probe: String,
        library: PathBuf,
        offset: u64,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("No probes attached ({declared} declared)")]
    NoProbesAttached { declared: usize },

    #[error("Output channel '{name}' failed: {reason}")]
    Channel { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated lookup event: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_not_found_display() {
        let err = Error::SymbolNotFound {
            symbol: "gethostbyname2".to_string(),
            path: PathBuf::from("/lib64/libc.so.6"),
        };
        assert_eq!(
            err.to_string(),
            "Symbol 'gethostbyname2' not found in /lib64/libc.so.6"
        );
    }

    #[test]
    fn test_truncated_display() {
        let err = DecodeError::Truncated {
            expected: 272,
            actual: 20,
        };
        assert!(err.to_string().contains("272"));
        assert!(err.to_string().contains("20"));
    }
}
