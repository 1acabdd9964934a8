// Copyright 2026 Taleem Team.
//
// Unread totals, mark-read policy and badge notification

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use taleem_api::{ApiError, Conversation, Role, UserRef};
use taleem_store::{
    ConversationFetcher, ConversationStore, MarkReadBackend, StoreConfig, UnreadTracker,
};

struct StubFetcher {
    responses: Mutex<VecDeque<Vec<Conversation>>>,
}

impl StubFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
        })
    }

    fn prime(&self, conversations: Vec<Conversation>) {
        self.responses.lock().push_back(conversations);
    }
}

#[async_trait]
impl ConversationFetcher for StubFetcher {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(self.responses.lock().pop_front().unwrap_or_default())
    }
}

struct StubBackend {
    calls: Mutex<Vec<String>>,
    failure: Mutex<Option<ApiError>>,
}

impl StubBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        })
    }

    fn fail_with(&self, error: ApiError) {
        *self.failure.lock() = Some(error);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MarkReadBackend for StubBackend {
    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.calls.lock().push(conversation_id.to_string());
        match self.failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn me() -> UserRef {
    UserRef {
        id: "me".to_string(),
        username: "user-me".to_string(),
        role: Role::FDE,
        school_name: None,
    }
}

fn conv(id: &str, unread: u32) -> Conversation {
    Conversation {
        id: id.to_string(),
        participants: [
            me(),
            UserRef {
                id: "peer".to_string(),
                username: "user-peer".to_string(),
                role: Role::Principal,
                school_name: Some("IMSG I-8/1".to_string()),
            },
        ],
        subject_label: "IMSG I-8/1".to_string(),
        latest_message: None,
        unread_count: unread,
        created_at: ts(10),
        last_activity_at: ts(10),
    }
}

fn setup(
    conversations: Vec<Conversation>,
) -> (Arc<ConversationStore>, Arc<StubBackend>, UnreadTracker) {
    let fetcher = StubFetcher::new();
    fetcher.prime(conversations);
    let store = Arc::new(ConversationStore::new(
        me(),
        fetcher,
        StoreConfig::default(),
    ));
    let backend = StubBackend::new();
    let tracker = UnreadTracker::new(store.clone(), backend.clone());
    (store, backend, tracker)
}

#[tokio::test]
async fn test_count_sums_all_conversations() {
    let (store, _backend, tracker) = setup(vec![conv("a", 2), conv("b", 3), conv("c", 0)]);
    store.load().await.unwrap();

    assert_eq!(tracker.count(), 5);
}

#[tokio::test]
async fn test_mark_read_zeroes_locally_and_calls_durable_path() {
    let (store, backend, tracker) = setup(vec![conv("a", 4)]);
    store.load().await.unwrap();

    tracker.mark_read("a").await.unwrap();
    assert_eq!(tracker.count(), 0);
    assert_eq!(backend.calls(), vec!["a"]);

    // Idempotent: a second call leaves the count at zero, never below
    tracker.mark_read("a").await.unwrap();
    assert_eq!(tracker.count(), 0);
}

#[tokio::test]
async fn test_failed_mark_read_keeps_local_zero() {
    let (store, backend, tracker) = setup(vec![conv("a", 4)]);
    store.load().await.unwrap();

    backend.fail_with(ApiError::Server { status: 500 });
    tracker.mark_read("a").await.unwrap();

    assert_eq!(tracker.count(), 0);
    assert_eq!(backend.calls(), vec!["a"]);
}

#[tokio::test]
async fn test_unauthorized_mark_read_propagates() {
    let (store, backend, tracker) = setup(vec![conv("a", 1)]);
    store.load().await.unwrap();

    backend.fail_with(ApiError::Unauthorized);
    let result = tracker.mark_read("a").await;

    assert!(result.is_err());
    assert!(result.unwrap_err().is_unauthorized());
}

#[tokio::test]
async fn test_badge_subscription_follows_count_changes() {
    let (store, _backend, tracker) = setup(vec![conv("a", 2), conv("b", 1)]);
    let mut badge = tracker.subscribe();
    assert_eq!(*badge.borrow(), 0);

    store.load().await.unwrap();
    badge.changed().await.unwrap();
    assert_eq!(*badge.borrow(), 3);

    tracker.mark_read("a").await.unwrap();
    badge.changed().await.unwrap();
    assert_eq!(*badge.borrow(), 1);
}
