//! Error taxonomy for portal calls and keeper control

use thiserror::Error;

/// Failure of a single portal request.
///
/// Nothing here is fatal to the supervision loop: a connect timeout triggers
/// host failover, everything else is reported through the sink and the loop
/// moves on.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The TCP connect phase timed out. Read timeouts and HTTP error
    /// statuses do not map here.
    #[error("connect timeout")]
    ConnectTimeout,

    /// Any other transport or response-decoding failure.
    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() && err.is_timeout() {
            PortalError::ConnectTimeout
        } else {
            PortalError::Transport(err.to_string())
        }
    }
}

/// Rejections surfaced by [`KeeperHandle`](crate::keeper::KeeperHandle).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeeperError {
    /// `start` was called again less than 3 seconds after the previous
    /// accepted start.
    #[error("login requested too frequently")]
    TooFrequent,
}
