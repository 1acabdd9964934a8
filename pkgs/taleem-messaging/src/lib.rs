//! Taleem Messaging - the assembled real-time messaging client
//!
//! One `MessagingClient` owns the session-long notification channel, at most
//! one conversation channel, the durable REST client, the stores and the
//! refresh backstop, and wires dispatcher consumers to the store reducers.
//! It is constructed explicitly and passed to whoever needs it; lifecycle is
//! tied to sign-in and sign-out, not to module load.
//!
//! The outgoing flow for every message: optimistic store update first, then
//! a best-effort push, then the authoritative durable write whose returned
//! id and timestamp replace the provisional ones.

mod error;
mod models;

pub use error::{Error, Result};
pub use models::MessagingConfig;

pub use taleem_api::{
    ApiClient, ApiError, Conversation, Message, MessagePreview, Role, UserRef,
};
pub use taleem_store::{
    ConversationFetcher, ConversationStore, MarkReadBackend, MessageLog, RefreshScheduler,
    StoreConfig, StoreError, UnreadTracker,
};
pub use taleem_transport::{
    ChannelScope, ConnectionState, Connector, Dispatcher, PushChannel, WsConnector,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use taleem_store::{provisional_id, InboundUpdate};
use taleem_transport::{ChatMessageFrame, OutboundFrame};

/// Durable operations the client issues for sending and history
#[async_trait]
pub trait DurableApi: Send + Sync {
    async fn send_message(
        &self,
        subject_label: &str,
        text: &str,
        receiver_id: &str,
        conversation_id: Option<&str>,
    ) -> std::result::Result<Message, ApiError>;

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> std::result::Result<Vec<Message>, ApiError>;
}

#[async_trait]
impl DurableApi for ApiClient {
    async fn send_message(
        &self,
        subject_label: &str,
        text: &str,
        receiver_id: &str,
        conversation_id: Option<&str>,
    ) -> std::result::Result<Message, ApiError> {
        ApiClient::send_message(self, subject_label, text, receiver_id, conversation_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> std::result::Result<Vec<Message>, ApiError> {
        ApiClient::list_messages(self, conversation_id).await
    }
}

/// The fully wired messaging core for one signed-in user
pub struct MessagingClient {
    config: MessagingConfig,
    durable: Arc<dyn DurableApi>,
    connector: Arc<dyn Connector>,
    store: Arc<ConversationStore>,
    log: Arc<MessageLog>,
    unread: UnreadTracker,
    dispatcher: Arc<Dispatcher>,
    notification_channel: PushChannel,
    conversation_channel: Mutex<Option<PushChannel>>,
    scheduler: Mutex<Option<RefreshScheduler>>,
    session_valid: AtomicBool,
}

impl MessagingClient {
    /// Build the full production wiring from one config
    pub fn new(config: MessagingConfig) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config.api_base_url, &config.token)?);
        let connector = Arc::new(WsConnector::new(&config.ws_base_url));
        Ok(Self::with_backends(
            config,
            api.clone(),
            api.clone(),
            api,
            connector,
        ))
    }

    /// Explicit dependency injection; the seam embedders and tests use
    pub fn with_backends(
        config: MessagingConfig,
        durable: Arc<dyn DurableApi>,
        fetcher: Arc<dyn ConversationFetcher>,
        mark_read: Arc<dyn MarkReadBackend>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let store = Arc::new(ConversationStore::new(
            config.current_user.clone(),
            fetcher,
            config.store.clone(),
        ));
        let log = Arc::new(MessageLog::new());
        let unread = UnreadTracker::new(store.clone(), mark_read);
        let dispatcher = Arc::new(Dispatcher::new());

        // Chat frames feed the conversation reducer and, when the sender can
        // be resolved from the thread, the history log
        {
            let store = store.clone();
            let log = log.clone();
            let me = config.current_user.clone();
            dispatcher.on_chat_message(move |frame| {
                if let Some(message) = frame_to_message(frame, &store, &me) {
                    log.apply_remote(message);
                }
                store.apply_inbound(InboundUpdate {
                    conversation_id: frame.conversation_id.clone(),
                    preview: MessagePreview {
                        text: frame.message.clone(),
                        timestamp: frame.timestamp,
                        sender_id: frame.sender_id.clone(),
                        is_own: frame.sender_id == me.id,
                    },
                });
                Ok(())
            });
        }

        // Notification frames carry no message body; when one names a
        // conversation it just nudges an out-of-cycle refresh
        {
            let store = store.clone();
            dispatcher.on_notification(move |event| {
                debug!("Notification event '{}'", event.event);
                if event.conversation_id.is_some() {
                    let store = store.clone();
                    tokio::spawn(async move {
                        if let Err(e) = store.load().await {
                            warn!("Refresh after notification failed: {}", e);
                        }
                    });
                }
                Ok(())
            });
        }

        let notification_channel = PushChannel::new(
            ChannelScope::Notifications {
                user_id: config.current_user.id.clone(),
            },
            config.token.clone(),
            connector.clone(),
        );
        {
            let dispatcher = dispatcher.clone();
            notification_channel.on_message(move |raw| dispatcher.dispatch_raw(raw));
        }

        Self {
            config,
            durable,
            connector,
            store,
            log,
            unread,
            dispatcher,
            notification_channel,
            conversation_channel: Mutex::new(None),
            scheduler: Mutex::new(None),
            session_valid: AtomicBool::new(true),
        }
    }

    /// Open the session-long notification channel and prime the stores.
    /// The channel open never fails; a failed initial load is logged and
    /// left to the poll backstop, unless the credential itself was rejected.
    pub async fn start(&self) -> Result<()> {
        self.ensure_session()?;

        self.notification_channel.open().await;

        if let Err(e) = self.store.load().await {
            if e.is_unauthorized() {
                self.invalidate_session();
                return Err(e.into());
            }
            warn!("Initial conversation load failed: {}", e);
        }
        Ok(())
    }

    /// The messaging surface became visible: refresh now and keep polling
    pub async fn open_surface(&self) -> Result<()> {
        self.ensure_session()?;

        if let Err(e) = self.store.load().await {
            if e.is_unauthorized() {
                self.invalidate_session();
                return Err(e.into());
            }
            warn!("Conversation refresh on open failed: {}", e);
        }

        let mut guard = self.scheduler.lock();
        if guard.is_none() {
            *guard = Some(RefreshScheduler::start(
                self.store.clone(),
                self.config.store.refresh_interval,
            ));
        }
        Ok(())
    }

    /// The messaging surface closed: stop the poll loop and drop the
    /// conversation channel. The notification channel is session-scoped and
    /// stays up.
    pub fn close_surface(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
        if let Some(channel) = self.conversation_channel.lock().take() {
            channel.close();
        }
    }

    /// Open a thread: subscribes its push channel and loads its history.
    /// Opening the id already open is a no-op; a different id closes the old
    /// channel first.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.ensure_session()?;

        let channel = {
            let mut guard = self.conversation_channel.lock();
            match guard.as_ref() {
                Some(existing)
                    if existing.scope().conversation_id() == Some(conversation_id) =>
                {
                    existing.clone()
                }
                existing => {
                    if let Some(old) = existing {
                        old.close();
                    }
                    let channel = PushChannel::new(
                        ChannelScope::Conversation {
                            conversation_id: conversation_id.to_string(),
                        },
                        self.config.token.clone(),
                        self.connector.clone(),
                    );
                    let dispatcher = self.dispatcher.clone();
                    channel.on_message(move |raw| dispatcher.dispatch_raw(raw));
                    *guard = Some(channel.clone());
                    channel
                }
            }
        };

        if channel.state() == ConnectionState::Disconnected {
            channel.open().await;
        }

        match self.durable.list_messages(conversation_id).await {
            Ok(history) => self.log.replace_history(conversation_id, history),
            Err(ApiError::Unauthorized) => {
                self.invalidate_session();
                return Err(Error::Api(ApiError::Unauthorized));
            }
            Err(e) => warn!("History fetch for {} failed: {}", conversation_id, e),
        }

        Ok(self.log.messages(conversation_id))
    }

    /// Send a message: optimistic update, best-effort push, durable write.
    /// Returns the authoritative record; the caller surfaces a failure as an
    /// inline error with a manual retry.
    pub async fn send_message(
        &self,
        subject_label: &str,
        text: &str,
        receiver: &UserRef,
        conversation_id: Option<&str>,
    ) -> Result<Message> {
        self.ensure_session()?;

        let me = &self.config.current_user;
        let now = Utc::now();
        let optimistic = MessagePreview {
            text: text.to_string(),
            timestamp: now,
            sender_id: me.id.clone(),
            is_own: true,
        };

        let local_conversation_id = match conversation_id {
            Some(id) => {
                self.store.apply_optimistic_send(id, optimistic);
                id.to_string()
            }
            None => self
                .store
                .create_provisional(receiver.clone(), subject_label, optimistic),
        };

        let local_message_id = provisional_id();
        self.log.apply_optimistic(Message {
            id: local_message_id.clone(),
            conversation_id: local_conversation_id.clone(),
            sender: me.clone(),
            message_text: text.to_string(),
            timestamp: now,
            is_read: true,
        });

        // Best-effort push; the durable write below is issued regardless of
        // whether this frame ever leaves the machine
        self.push_best_effort(&local_conversation_id, text, now);

        match self
            .durable
            .send_message(subject_label, text, &receiver.id, conversation_id)
            .await
        {
            Ok(message) => {
                self.store.confirm_send(&local_conversation_id, &message);
                self.log
                    .confirm(&local_conversation_id, &local_message_id, message.clone());
                Ok(message)
            }
            Err(e) => {
                if matches!(e, ApiError::Unauthorized) {
                    self.invalidate_session();
                }
                // The list preview stays put (no flicker); the unconfirmed
                // history entry goes, so a manual retry cannot double it
                self.log.discard(&local_conversation_id, &local_message_id);
                self.store.clear_pending(&local_conversation_id);
                Err(e.into())
            }
        }
    }

    /// Zero a conversation's unread count and persist the read state
    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.ensure_session()?;

        match self.unread.mark_read(conversation_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_unauthorized() {
                    self.invalidate_session();
                }
                Err(e.into())
            }
        }
    }

    /// The sorted conversation list as currently visible
    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.snapshot()
    }

    /// Ordered history of one conversation
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.log.messages(conversation_id)
    }

    pub fn unread_count(&self) -> u32 {
        self.unread.count()
    }

    /// Watch total-unread changes; badge surfaces subscribe here
    pub fn subscribe_unread(&self) -> watch::Receiver<u32> {
        self.unread.subscribe()
    }

    pub fn recently_updated(&self, conversation_id: &str) -> bool {
        self.store.recently_updated(conversation_id)
    }

    /// State of the session-long notification channel
    pub fn connection_state(&self) -> ConnectionState {
        self.notification_channel.state()
    }

    pub fn is_session_valid(&self) -> bool {
        self.session_valid.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// End the session: tears everything down, notification channel included
    pub fn shutdown(&self) {
        self.close_surface();
        self.notification_channel.close();
        info!("Messaging client shut down");
    }

    fn push_best_effort(&self, conversation_id: &str, text: &str, timestamp: DateTime<Utc>) {
        let channel = self.conversation_channel.lock().as_ref().and_then(|ch| {
            (ch.scope().conversation_id() == Some(conversation_id)).then(|| ch.clone())
        });

        let Some(channel) = channel else { return };

        let delivered = channel.send(&OutboundFrame::ChatMessage {
            message: text.to_string(),
            sender_id: self.config.current_user.id.clone(),
            conversation_id: conversation_id.to_string(),
            timestamp,
        });
        if !delivered {
            debug!("Push send not delivered, relying on durable path");
        }
    }

    fn ensure_session(&self) -> Result<()> {
        if self.session_valid.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::SessionInvalid)
        }
    }

    fn invalidate_session(&self) {
        if self.session_valid.swap(false, Ordering::SeqCst) {
            error!("Session credential rejected, stopping all messaging activity");
            self.close_surface();
            self.notification_channel.close();
        }
    }
}

/// Build a history entry from a pushed frame. The sender is resolved from
/// the conversation's participants; a frame for a thread we cannot resolve
/// yet is skipped here and picked up by the history fetch instead.
fn frame_to_message(
    frame: &ChatMessageFrame,
    store: &ConversationStore,
    me: &UserRef,
) -> Option<Message> {
    let own = frame.sender_id == me.id;
    let sender = if own {
        me.clone()
    } else {
        store
            .conversation(&frame.conversation_id)?
            .participants
            .iter()
            .find(|p| p.id == frame.sender_id)?
            .clone()
    };

    let id = frame.id.clone().unwrap_or_else(|| {
        // Deterministic fallback so re-delivery of the same frame dedups
        format!(
            "push-{}-{}-{}",
            frame.conversation_id,
            frame.sender_id,
            frame.timestamp.timestamp_millis()
        )
    });

    Some(Message {
        id,
        conversation_id: frame.conversation_id.clone(),
        sender,
        message_text: frame.message.clone(),
        timestamp: frame.timestamp,
        is_read: own,
    })
}
