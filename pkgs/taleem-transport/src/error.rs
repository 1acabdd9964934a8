use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid push endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection refused: {0}")]
    Refused(String),
}
