use thiserror::Error;

use crate::backend::BackendError;
use crate::fetch::FetchError;
use crate::store::StoreError;

/// Failures of a requested core operation. Anything reaching the message
/// contract boundary is one of these.
#[derive(Debug, Error)]
pub enum CoreError {
    // ============================================================
    // Preconditions
    // ============================================================
    #[error("No active tab found")]
    NoActiveTab,

    #[error("Localhost endpoint is not configured in settings.")]
    LocalEndpointMissing,

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    // ============================================================
    // Restoration
    // ============================================================
    #[error("Tab {0} did not finish loading in time")]
    LoadTimeout(String),

    #[error("Tab {0} closed before it finished loading")]
    TabClosed(String),

    // ============================================================
    // Wrapped
    // ============================================================
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn invalid_url(url: &str, err: impl std::fmt::Display) -> Self {
        CoreError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
