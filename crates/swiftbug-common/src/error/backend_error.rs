/// Failures of the privileged browser API behind a `Backend`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum BackendError {
    // ============================================================
    // Tab Errors
    // ============================================================
    #[error("No active tab found")]
    NoActiveTab,

    #[error("Tab {0} not found")]
    TabNotFound(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    // ============================================================
    // Page Access Errors
    // ============================================================
    #[error("Script execution error: {0}")]
    Script(String),

    #[error("Cookie operation failed: {0}")]
    Cookie(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    /// The page hosts no content bridge (restricted pages, detached targets).
    #[error("Content bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Timeout: {operation}")]
    Timeout { operation: String },

    // ============================================================
    // System Errors
    // ============================================================
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Not ready")]
    NotReady,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}
