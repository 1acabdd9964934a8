//! Taleem Store - client-side state for the messaging core
//!
//! The single mutable shared resource of the subsystem. Three independent
//! producers feed it: the optimistic send path, dispatcher-delivered push
//! frames, and the periodic poll. All of them mutate state only through the
//! reducers here, each a complete synchronous call, which is what keeps the
//! cooperative model safe without broader locking.
//!
//! - **ConversationStore**: merged, sorted conversation list
//! - **MessageLog**: per-conversation ordered history
//! - **UnreadTracker**: derived unread totals and the mark-read path
//! - **RefreshScheduler**: fixed-interval poll backstop

pub mod conversation_store;
pub mod message_log;
pub mod refresh_scheduler;
pub mod unread_tracker;

mod error;

pub use conversation_store::{ConversationFetcher, ConversationStore, InboundUpdate};
pub use error::StoreError;
pub use message_log::{provisional_id, MessageLog};
pub use refresh_scheduler::RefreshScheduler;
pub use unread_tracker::{MarkReadBackend, UnreadTracker};

use std::time::Duration;

/// Tunables for the store layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Poll interval of the refresh backstop
    pub refresh_interval: Duration,

    /// How long a conversation stays marked "recently updated" after its
    /// unread count grows
    pub highlight_window: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            highlight_window: Duration::from_secs(3),
        }
    }
}
