//! The error taxonomy of the enumerator.

use n3map_proto::error::NameError;
use n3map_proto::RCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No response arrived within the configured timeout. Retryable; the
    /// provider picks another server.
    #[error("timeout")]
    Timeout,

    /// A response arrived but could not be parsed. Retryable; counts against
    /// the server's error budget.
    #[error("received bad response")]
    Query,

    /// The response status was neither NOERROR nor NXDOMAIN. Retryable;
    /// counts against the server's error budget.
    #[error("received unexpected response status {0}")]
    UnexpectedResponseStatus(RCode),

    /// A server exceeded its retry budget and is evicted from rotation.
    #[error("no response from server: {0}")]
    MaxRetries(String),

    /// A server exceeded its error budget and is evicted from rotation.
    #[error("too many errors from server: {0}")]
    MaxNsErrors(String),

    #[error("{0}")]
    NsecWalk(String),

    #[error("{0}")]
    Nsec3Walk(String),

    /// The zone changed under the walker (salt/iterations/zone divergence or
    /// an interval overlap).
    #[error("{0}\nzone may have been modified")]
    ZoneChanged(String),

    /// A received record violates its own invariants.
    #[error("{0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("{file}:{line}: {msg}")]
    FileParse {
        file: String,
        line: usize,
        msg: String,
    },

    /// The configured hash budget was spent. An expected way for a walk to
    /// end, not a failure.
    #[error("hash limit reached")]
    HashLimitReached,

    /// SIGINT was received; checkpoint state has been flushed.
    #[error("received SIGINT, terminating")]
    Interrupted,

    #[error("invalid port specified: {0}")]
    InvalidPort(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures the query provider recovers from by itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::Query | Error::UnexpectedResponseStatus(_)
        )
    }
}
