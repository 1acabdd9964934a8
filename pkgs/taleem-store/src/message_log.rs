//! Per-conversation message history
//!
//! Messages are deduplicated by id and ordered by timestamp ascending, ties
//! by id, regardless of which source delivered them. Optimistic entries live
//! under a client-generated provisional id until the durable write returns
//! the authoritative record, which replaces them outright.

use std::collections::HashMap;

use parking_lot::Mutex;
use taleem_api::Message;
use uuid::Uuid;

/// Prefix of ids assigned locally before the durable store confirms
const PROVISIONAL_PREFIX: &str = "local-";

/// Client-generated id for optimistic display, replaced on confirmation
pub fn provisional_id() -> String {
    format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4())
}

fn is_provisional(id: &str) -> bool {
    id.starts_with(PROVISIONAL_PREFIX)
}

#[derive(Default)]
pub struct MessageLog {
    inner: Mutex<HashMap<String, Vec<Message>>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered history of one conversation, ascending by timestamp
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.inner
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a conversation's history with a fetched list, preserving
    /// optimistic entries not yet confirmed
    pub fn replace_history(&self, conversation_id: &str, messages: Vec<Message>) {
        let mut inner = self.inner.lock();

        let mut next: Vec<Message> = Vec::with_capacity(messages.len());
        for msg in messages {
            if !next.iter().any(|m| m.id == msg.id) {
                next.push(msg);
            }
        }

        if let Some(existing) = inner.get(conversation_id) {
            for msg in existing {
                if is_provisional(&msg.id) {
                    next.push(msg.clone());
                }
            }
        }

        Self::sort_entries(&mut next);
        inner.insert(conversation_id.to_string(), next);
    }

    /// Insert a pushed or fetched message; ids already present are ignored
    pub fn apply_remote(&self, message: Message) {
        let mut inner = self.inner.lock();
        let entries = inner.entry(message.conversation_id.clone()).or_default();
        if entries.iter().any(|m| m.id == message.id) {
            return;
        }
        entries.push(message);
        Self::sort_entries(entries);
    }

    /// Insert an optimistic entry under its provisional id
    pub fn apply_optimistic(&self, message: Message) {
        self.apply_remote(message);
    }

    /// Replace a provisional entry with the durable record. The authoritative
    /// id and timestamp win, and the entry moves to the server-assigned
    /// conversation when that differs from the local one.
    pub fn confirm(&self, conversation_id: &str, provisional: &str, message: Message) {
        let mut inner = self.inner.lock();

        let now_empty = match inner.get_mut(conversation_id) {
            Some(entries) => {
                entries.retain(|m| m.id != provisional);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty && conversation_id != message.conversation_id {
            inner.remove(conversation_id);
        }

        let entries = inner.entry(message.conversation_id.clone()).or_default();
        if !entries.iter().any(|m| m.id == message.id) {
            entries.push(message);
            Self::sort_entries(entries);
        }
    }

    /// Drop a provisional entry whose durable write failed for good
    pub fn discard(&self, conversation_id: &str, provisional: &str) {
        if let Some(entries) = self.inner.lock().get_mut(conversation_id) {
            entries.retain(|m| m.id != provisional);
        }
    }

    fn sort_entries(entries: &mut [Message]) {
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
