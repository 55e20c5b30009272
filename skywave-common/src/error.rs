//! Common error types for skywave.

use thiserror::Error;

/// Common result type for skywave operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds that cross component boundaries.
///
/// Only `Device`, `ChainConfig`, and `Io` are fatal to the process; the
/// remaining kinds are handled (and counted) close to where they occur.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    #[error("device failure: {0}")]
    Device(String),

    #[error("chain configuration: {0}")]
    ChainConfig(String),

    #[error("frequency {frequency} Hz outside tuner window")]
    ChannelOutOfBand { frequency: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown requested")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for kinds that must surface as the supervisor's return value.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Device(_) | Error::ChainConfig(_) | Error::Io(_) | Error::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Device("gone".into()).is_fatal());
        assert!(Error::ChainConfig("rate mismatch".into()).is_fatal());
        assert!(!Error::ChannelOutOfBand { frequency: 860_000_000 }.is_fatal());
        assert!(!Error::Cancelled.is_fatal());
    }
}
