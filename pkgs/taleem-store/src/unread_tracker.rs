//! Unread tracking and the mark-read path
//!
//! Badge surfaces subscribe to the derived total instead of inspecting the
//! store themselves. Mark-read zeroes the local count first and keeps the
//! zero even when the durable call fails: a wrong badge for one poll cycle
//! beats a flickering one, and the read horizon recorded by the store lets
//! the next poll correct any drift.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

use taleem_api::{ApiClient, ApiError};

use crate::conversation_store::ConversationStore;
use crate::error::StoreError;

/// Durable side of mark-read
#[async_trait]
pub trait MarkReadBackend: Send + Sync {
    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl MarkReadBackend for ApiClient {
    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        ApiClient::mark_conversation_read(self, conversation_id).await
    }
}

/// Derives global and per-conversation unread state from the store
pub struct UnreadTracker {
    store: Arc<ConversationStore>,
    backend: Arc<dyn MarkReadBackend>,
    total_rx: watch::Receiver<u32>,
}

impl UnreadTracker {
    pub fn new(store: Arc<ConversationStore>, backend: Arc<dyn MarkReadBackend>) -> Self {
        let (total_tx, total_rx) = watch::channel(store.total_unread());

        store.set_unread_listener(move |total| {
            total_tx.send_if_modified(|current| {
                if *current != total {
                    *current = total;
                    true
                } else {
                    false
                }
            });
        });

        Self {
            store,
            backend,
            total_rx,
        }
    }

    /// Current total across all conversations
    pub fn count(&self) -> u32 {
        self.store.total_unread()
    }

    /// Watch total-count changes without polling
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.total_rx.clone()
    }

    /// Zero a conversation's count locally, then issue the durable mark-read.
    /// The local zero is not rolled back on failure; only a rejected
    /// credential is surfaced, since that must stop the whole session.
    pub async fn mark_read(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.store.mark_read_local(conversation_id);

        match self.backend.mark_conversation_read(conversation_id).await {
            Ok(()) => Ok(()),
            Err(ApiError::Unauthorized) => Err(StoreError::Api(ApiError::Unauthorized)),
            Err(e) => {
                warn!(
                    "Mark-read failed for {}, keeping local zero: {}",
                    conversation_id, e
                );
                Ok(())
            }
        }
    }
}
