use taleem_api::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

impl StoreError {
    /// True when the underlying failure means the session credential was
    /// rejected and all messaging activity must stop
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, StoreError::Api(ApiError::Unauthorized))
    }
}
