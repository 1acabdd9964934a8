use taleem_api::ApiError;
use taleem_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The bearer credential was rejected earlier in the session. No further
    /// messaging activity is attempted until a new client is built.
    #[error("Session is no longer valid")]
    SessionInvalid,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
