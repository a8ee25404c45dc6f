//! Error types shared across the relay.

use thiserror::Error;

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid url in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
}

/// Why a single outbound send to a destination failed.
///
/// These never escape the dispatcher; they are folded into a
/// [`DispatchOutcome`](crate::dispatch::DispatchOutcome).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("destination rejected event with status {status}")]
    Rejected { status: u16 },
}

impl DeliveryError {
    /// Remote status code, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Rejected { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Network(e.to_string())
        }
    }
}

/// Errors from the persistent config/log store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store document is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}
