//! Fixed-interval poll backstop
//!
//! Push delivery is best-effort; this loop re-fetches the conversation list
//! while the messaging surface is open so missed or delayed frames are
//! corrected within one interval. Stopping is final: reopening the surface
//! creates a fresh scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::conversation_store::ConversationStore;

pub struct RefreshScheduler {
    token: CancellationToken,
}

impl RefreshScheduler {
    /// Start polling the store at the given interval. A cycle is skipped
    /// whenever a load is still in flight, so refreshes never overlap.
    pub fn start(store: Arc<ConversationStore>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let loop_token = token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The opening load already happened; skip the immediate tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if store.is_loading() {
                    debug!("Refresh cycle skipped, load in flight");
                    continue;
                }

                match store.load().await {
                    Ok(()) => {}
                    Err(e) if e.is_unauthorized() => {
                        error!("Session credential rejected, stopping refresh loop");
                        loop_token.cancel();
                        break;
                    }
                    Err(e) => warn!("Background refresh failed: {}", e),
                }
            }
        });

        Self { token }
    }

    /// Stop polling. Irrevocable for this instance.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
