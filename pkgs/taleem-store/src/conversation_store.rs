//! Conversation store - one merged view over three update sources
//!
//! Optimistic sends, dispatcher-delivered push frames and poll results all
//! funnel through the reducers here. Conflicts between them are resolved by
//! timestamp monotonicity: an update older than what the store already holds
//! for that conversation is ignored, never an error. Push and poll carry no
//! ordering guarantee relative to each other or to the local optimistic
//! write, which makes this rule the correctness core of the subsystem.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use taleem_api::{ApiClient, ApiError, Conversation, Message, MessagePreview, UserRef};

use crate::error::StoreError;
use crate::message_log::provisional_id;
use crate::StoreConfig;

/// Source of conversation summaries for the current user
#[async_trait]
pub trait ConversationFetcher: Send + Sync {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ApiError>;
}

#[async_trait]
impl ConversationFetcher for ApiClient {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.list_conversations().await
    }
}

/// One pushed update for a single conversation
#[derive(Debug, Clone)]
pub struct InboundUpdate {
    pub conversation_id: String,
    pub preview: MessagePreview,
}

struct StoreInner {
    conversations: Vec<Conversation>,
    /// Conversation ids with an optimistic write not yet confirmed durable.
    /// These survive a list replacement even when the server does not know
    /// them yet.
    pending: HashSet<String>,
    /// When each conversation's unread count last grew
    highlights: HashMap<String, Instant>,
    /// Activity timestamp up to which the user has read each conversation.
    /// A poll result not newer than this cannot resurrect a stale unread
    /// count after an optimistic mark-read.
    read_horizons: HashMap<String, DateTime<Utc>>,
    /// Updates for ids unknown at arrival time, replayed after the next fetch
    stash: Vec<InboundUpdate>,
}

/// In-memory ordered collection of conversation summaries
pub struct ConversationStore {
    current_user: UserRef,
    fetcher: Arc<dyn ConversationFetcher>,
    inner: Mutex<StoreInner>,
    loading: AtomicBool,
    highlight_window: Duration,
    unread_listener: Mutex<Option<Box<dyn Fn(u32) + Send + Sync>>>,
}

impl ConversationStore {
    pub fn new(
        current_user: UserRef,
        fetcher: Arc<dyn ConversationFetcher>,
        config: StoreConfig,
    ) -> Self {
        Self {
            current_user,
            fetcher,
            inner: Mutex::new(StoreInner {
                conversations: Vec::new(),
                pending: HashSet::new(),
                highlights: HashMap::new(),
                read_horizons: HashMap::new(),
                stash: Vec::new(),
            }),
            loading: AtomicBool::new(false),
            highlight_window: config.highlight_window,
            unread_listener: Mutex::new(None),
        }
    }

    pub fn current_user(&self) -> &UserRef {
        &self.current_user
    }

    /// The sorted conversation list as currently visible
    pub fn snapshot(&self) -> Vec<Conversation> {
        self.inner.lock().conversations.clone()
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.inner
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }

    /// Sum of all per-conversation unread counts
    pub fn total_unread(&self) -> u32 {
        Self::sum_unread(&self.inner.lock().conversations)
    }

    /// Whether a list refresh is currently in flight
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Whether the conversation's unread count grew within the highlight
    /// window. Purely visual state, never an input to the ordering.
    pub fn recently_updated(&self, conversation_id: &str) -> bool {
        self.inner
            .lock()
            .highlights
            .get(conversation_id)
            .map(|marked| marked.elapsed() < self.highlight_window)
            .unwrap_or(false)
    }

    /// Register the callback invoked with the new total after every mutation
    /// that may change unread counts
    pub fn set_unread_listener(&self, listener: impl Fn(u32) + Send + Sync + 'static) {
        *self.unread_listener.lock() = Some(Box::new(listener));
    }

    /// Replace the store contents with a freshly fetched list. Skips silently
    /// when a load is already in flight; optimistic entries the server does
    /// not know yet are preserved.
    pub async fn load(&self) -> Result<(), StoreError> {
        if self.loading.swap(true, Ordering::SeqCst) {
            debug!("Conversation load already in flight, skipping");
            return Ok(());
        }

        let result = self.fetcher.fetch_conversations().await;
        self.loading.store(false, Ordering::SeqCst);

        self.merge_fetched(result?);
        Ok(())
    }

    /// Reflect an outgoing message before its network round trip completes
    pub fn apply_optimistic_send(&self, conversation_id: &str, preview: MessagePreview) {
        let mut inner = self.inner.lock();

        if let Some(conv) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            let timestamp = preview.timestamp;
            if timestamp >= conv.last_activity_at {
                conv.latest_message = Some(preview);
                conv.last_activity_at = timestamp;
            }
            inner.pending.insert(conversation_id.to_string());
        } else {
            debug!("Optimistic send for unknown conversation {}", conversation_id);
        }

        self.after_mutation(inner);
    }

    /// Create a local entry for a thread the server has not assigned an id
    /// to yet. Returns the provisional conversation id.
    pub fn create_provisional(
        &self,
        counterpart: UserRef,
        subject_label: &str,
        preview: MessagePreview,
    ) -> String {
        let id = provisional_id();
        let timestamp = preview.timestamp;

        let conv = Conversation {
            id: id.clone(),
            participants: [self.current_user.clone(), counterpart],
            subject_label: subject_label.to_string(),
            latest_message: Some(preview),
            unread_count: 0,
            created_at: timestamp,
            last_activity_at: timestamp,
        };

        let mut inner = self.inner.lock();
        inner.conversations.push(conv);
        inner.pending.insert(id.clone());
        self.after_mutation(inner);

        id
    }

    /// Merge a pushed update. Known conversations merge monotonically in
    /// place; an unknown id stashes the update and triggers a list fetch so
    /// nothing is dropped.
    pub fn apply_inbound(self: &Arc<Self>, update: InboundUpdate) {
        let known = {
            let mut inner = self.inner.lock();
            let position = inner
                .conversations
                .iter()
                .position(|c| c.id == update.conversation_id);

            let known = match position {
                Some(i) => {
                    let StoreInner {
                        conversations,
                        highlights,
                        ..
                    } = &mut *inner;
                    Self::merge_preview(&mut conversations[i], &update.preview, highlights);
                    true
                }
                None => {
                    debug!(
                        "Update for unknown conversation {}, fetching",
                        update.conversation_id
                    );
                    inner.stash.push(update);
                    false
                }
            };

            self.after_mutation(inner);
            known
        };

        if !known {
            let store = self.clone();
            tokio::spawn(async move {
                if let Err(e) = store.load().await {
                    warn!("Fetch after unknown-conversation update failed: {}", e);
                }
            });
        }
    }

    /// Apply the authoritative message returned by the durable write. A
    /// provisional conversation id is replaced by the server-assigned one,
    /// never kept alongside it.
    pub fn confirm_send(&self, local_conversation_id: &str, message: &Message) {
        let mut inner = self.inner.lock();
        let real_id = message.conversation_id.clone();

        if local_conversation_id != real_id {
            if let Some(pos) = inner
                .conversations
                .iter()
                .position(|c| c.id == local_conversation_id)
            {
                if inner.conversations.iter().any(|c| c.id == real_id) {
                    // The server already tracked this thread; drop the local twin
                    inner.conversations.remove(pos);
                } else {
                    inner.conversations[pos].id = real_id.clone();
                }
            }
            inner.pending.remove(local_conversation_id);
            inner.read_horizons.remove(local_conversation_id);
            inner.highlights.remove(local_conversation_id);
        }

        let preview = message.preview(&self.current_user.id);
        let StoreInner {
            conversations,
            pending,
            highlights,
            ..
        } = &mut *inner;
        if let Some(conv) = conversations.iter_mut().find(|c| c.id == real_id) {
            Self::merge_preview(conv, &preview, highlights);
        }
        pending.remove(&real_id);

        self.after_mutation(inner);
    }

    /// Forget the unconfirmed-send marker, e.g. after a failed durable write
    pub fn clear_pending(&self, conversation_id: &str) {
        self.inner.lock().pending.remove(conversation_id);
    }

    /// Zero the unread count and remember how far the user has read, so a
    /// stale poll cannot bring the count back
    pub fn mark_read_local(&self, conversation_id: &str) {
        let mut inner = self.inner.lock();
        let StoreInner {
            conversations,
            highlights,
            read_horizons,
            ..
        } = &mut *inner;

        if let Some(conv) = conversations.iter_mut().find(|c| c.id == conversation_id) {
            conv.unread_count = 0;
            read_horizons.insert(conversation_id.to_string(), conv.last_activity_at);
            highlights.remove(conversation_id);
        }

        self.after_mutation(inner);
    }

    fn merge_fetched(&self, fetched: Vec<Conversation>) {
        let mut inner = self.inner.lock();

        // Deduplicate by id, keeping the entry with the newest activity
        let mut by_id: HashMap<String, Conversation> = HashMap::new();
        for conv in fetched {
            match by_id.entry(conv.id.clone()) {
                Entry::Occupied(mut e) => {
                    if conv.activity_or_created() > e.get().activity_or_created() {
                        e.insert(conv);
                    }
                }
                Entry::Vacant(e) => {
                    e.insert(conv);
                }
            }
        }

        let StoreInner {
            conversations,
            pending,
            highlights,
            read_horizons,
            stash,
        } = &mut *inner;

        let old: HashMap<String, Conversation> = conversations
            .drain(..)
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut next: Vec<Conversation> = Vec::with_capacity(by_id.len());
        for (id, mut fetched_conv) in by_id {
            // A count the user has already read away must not come back
            if let Some(horizon) = read_horizons.get(&id) {
                if fetched_conv.last_activity_at <= *horizon {
                    fetched_conv.unread_count = 0;
                }
            }

            if let Some(local) = old.get(&id) {
                // Monotonic merge: an out-of-order poll result must not
                // revert a newer optimistic or push update
                if local.last_activity_at > fetched_conv.last_activity_at {
                    fetched_conv.latest_message = local.latest_message.clone();
                    fetched_conv.last_activity_at = local.last_activity_at;
                    fetched_conv.unread_count = fetched_conv.unread_count.max(local.unread_count);
                }
                if fetched_conv.unread_count > local.unread_count {
                    highlights.insert(id.clone(), Instant::now());
                }
            }

            next.push(fetched_conv);
        }

        // Optimistic entries the server does not know yet survive the
        // replacement until their durable write confirms
        for (id, conv) in old {
            if pending.contains(&id) && !next.iter().any(|c| c.id == id) {
                next.push(conv);
            }
        }

        *conversations = next;

        // Replay updates that arrived before their conversation was known
        let stashed: Vec<InboundUpdate> = stash.drain(..).collect();
        for update in stashed {
            match conversations
                .iter_mut()
                .find(|c| c.id == update.conversation_id)
            {
                Some(conv) => Self::merge_preview(conv, &update.preview, highlights),
                None => debug!(
                    "Dropping stashed update for conversation {} missing after refresh",
                    update.conversation_id
                ),
            }
        }

        self.after_mutation(inner);
    }

    /// Monotonic in-place merge of one preview into one conversation
    fn merge_preview(
        conv: &mut Conversation,
        preview: &MessagePreview,
        highlights: &mut HashMap<String, Instant>,
    ) {
        if preview.timestamp < conv.last_activity_at {
            return;
        }
        if conv.latest_message.as_ref() == Some(preview) {
            // Duplicate delivery of the same update
            return;
        }

        conv.latest_message = Some(preview.clone());
        conv.last_activity_at = preview.timestamp;

        if !preview.is_own {
            conv.unread_count += 1;
            highlights.insert(conv.id.clone(), Instant::now());
        }
    }

    /// Re-sort, drop expired highlight marks, then notify the unread
    /// listener outside the lock
    fn after_mutation(&self, mut inner: MutexGuard<'_, StoreInner>) {
        let window = self.highlight_window;
        inner.highlights.retain(|_, marked| marked.elapsed() < window);
        Self::sort_entries(&mut inner.conversations);
        let total = Self::sum_unread(&inner.conversations);
        drop(inner);

        if let Some(listener) = self.unread_listener.lock().as_ref() {
            listener(total);
        }
    }

    /// Deterministic ordering: unread count descending, then last activity
    /// (falling back to creation time) descending, ties broken by id
    /// ascending. Recomputed from the entries on every mutation.
    fn sort_entries(conversations: &mut [Conversation]) {
        conversations.sort_by(|a, b| {
            b.unread_count
                .cmp(&a.unread_count)
                .then_with(|| b.activity_or_created().cmp(&a.activity_or_created()))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    fn sum_unread(conversations: &[Conversation]) -> u32 {
        conversations.iter().map(|c| c.unread_count).sum()
    }
}
