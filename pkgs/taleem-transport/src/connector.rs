//! Connector seam between the channel state machine and the wire
//!
//! `PushChannel` only ever sees a `ChannelLink` pair of frame queues, so the
//! reconnect machinery can be exercised against an in-memory connector while
//! production uses `WsConnector` over tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::channel::ChannelScope;
use crate::error::TransportError;

/// One live link: queued outbound frames in, inbound frames out. The inbound
/// side ends when the underlying connection closes.
pub struct ChannelLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish one live link for the given scope, authenticated by the
    /// bearer credential
    async fn connect(
        &self,
        scope: &ChannelScope,
        credential: &str,
    ) -> Result<ChannelLink, TransportError>;
}

/// Production connector over a WebSocket endpoint
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, scope: &ChannelScope, credential: &str) -> String {
        format!("{}{}?token={}", self.base_url, scope.path(), credential)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        scope: &ChannelScope,
        credential: &str,
    ) -> Result<ChannelLink, TransportError> {
        let url = self.endpoint(scope, credential);
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Write pump: forwards queued frames until the channel drops its sender
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    debug!("Push link send failed, link closed");
                    break;
                }
            }
        });

        // Read pump: surfaces text frames; dropping in_tx signals the close
        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Server closed push link");
                        break;
                    }
                    Err(e) => {
                        warn!("Push link error: {}", e);
                        break;
                    }
                    Ok(_) => {}
                }
            }
        });

        Ok(ChannelLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
