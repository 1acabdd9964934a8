use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Credential rejected. The session must be treated as invalid and all
    /// further messaging activity stopped, never retried.
    #[error("Session credential rejected (401)")]
    Unauthorized,

    /// Validation or permission failure. Permanent, propagated immediately.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Serverfault-class status. Transient, worth retrying.
    #[error("Server error ({status})")]
    Server { status: u16 },

    /// Connect/timeout/transfer failure below the HTTP layer
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApiError {
    /// Whether the durable write path should retry this failure
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Server { .. } => true,
            ApiError::Network(e) => !(e.is_builder() || e.is_decode()),
            _ => false,
        }
    }
}
