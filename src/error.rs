use crate::model::TargetId;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Why a single extraction branch produced nothing.
///
/// The arbitration step treats every variant the same way ("no result from
/// this method"); the distinction only survives into reasons and logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("No price found: {0}")]
    NotFound(String),

    #[error("{method} timed out after {after:?}")]
    Timeout {
        method: &'static str,
        after: Duration,
    },

    #[error("Page is blocked ({0})")]
    Blocked(String),

    #[error("Renderer failed: {0}")]
    Render(String),

    #[error("Vision service failed: {0}")]
    Service(String),
}

impl ExtractError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExtractError::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum PriceWatchError {
    #[error("Target not found: {0}")]
    TargetNotFound(TargetId),

    #[error("Both extraction methods failed (network: {network}; vision: {vision})")]
    BothFailed {
        network: ExtractError,
        vision: ExtractError,
        next_retry_at: Option<DateTime<Utc>>,
    },

    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("Renderer error: {0}")]
    Render(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<PriceWatchError> for ExtractError {
    fn from(err: PriceWatchError) -> Self {
        match err {
            PriceWatchError::Network(e) => ExtractError::Service(e.to_string()),
            other => ExtractError::Render(other.to_string()),
        }
    }
}
