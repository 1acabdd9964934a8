//! Push channel state machine
//!
//! Opening never fails loudly and sending never throws: a broken push link
//! degrades the experience to "slightly delayed", it does not break the
//! application, since every message also travels the durable REST path.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connector::{ChannelLink, Connector};
use crate::frames::OutboundFrame;

/// First reconnect delay; doubled on every further attempt
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Reconnect attempts before the channel gives up until an explicit open
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// How long a deferred conversation-channel send waits for a connection
const SEND_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Lifecycle state of one push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// What a channel is subscribed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelScope {
    /// All push notifications for one user; session-long
    Notifications { user_id: String },
    /// One open conversation thread; opened on demand
    Conversation { conversation_id: String },
}

impl ChannelScope {
    pub fn path(&self) -> String {
        match self {
            ChannelScope::Notifications { .. } => "/ws/notifications/".to_string(),
            ChannelScope::Conversation { conversation_id } => {
                format!("/ws/conversations/{}/", conversation_id)
            }
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ChannelScope::Conversation { conversation_id } => Some(conversation_id),
            ChannelScope::Notifications { .. } => None,
        }
    }
}

type MessageHandler = dyn Fn(&str) + Send + Sync;
type ConnectionHandler = dyn Fn(ConnectionState) + Send + Sync;

struct ChannelInner {
    scope: ChannelScope,
    credential: String,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    message_handlers: Mutex<Vec<Arc<MessageHandler>>>,
    connection_handlers: Mutex<Vec<Arc<ConnectionHandler>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    link_abort: Mutex<Option<CancellationToken>>,
}

impl ChannelInner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });

        if changed {
            let handlers: Vec<_> = self.connection_handlers.lock().iter().cloned().collect();
            for handler in handlers {
                handler(state);
            }
        }
    }

    fn deliver(&self, raw: &str) {
        let handlers: Vec<_> = self.message_handlers.lock().iter().cloned().collect();
        for handler in handlers {
            handler(raw);
        }
    }

    /// Hand a frame to the live link, if any
    fn hand_to_link(&self, raw: String) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(raw).is_ok(),
            None => false,
        }
    }
}

/// One bidirectional push connection with reconnect-and-backoff
#[derive(Clone)]
pub struct PushChannel {
    inner: Arc<ChannelInner>,
}

impl PushChannel {
    pub fn new(scope: ChannelScope, credential: String, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                scope,
                credential,
                connector,
                state_tx,
                message_handlers: Mutex::new(Vec::new()),
                connection_handlers: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                link_abort: Mutex::new(None),
            }),
        }
    }

    pub fn scope(&self) -> &ChannelScope {
        &self.inner.scope
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch connection-state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Register an inbound-frame handler. Handlers run in registration order.
    pub fn on_message(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.inner.message_handlers.lock().push(Arc::new(handler));
    }

    /// Register a connection-state handler. Handlers run in registration order.
    pub fn on_connection_change(
        &self,
        handler: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) {
        self.inner.connection_handlers.lock().push(Arc::new(handler));
    }

    /// Establish the channel. Never errors: on failure the channel is left
    /// `Disconnected` with the cause logged, and the caller carries on — the
    /// durable path does not depend on this link.
    pub async fn open(&self) {
        // Supersede any live link or pending reconnect
        self.cancel_link();

        let token = CancellationToken::new();
        *self.inner.link_abort.lock() = Some(token.clone());

        self.inner.set_state(ConnectionState::Connecting);

        match self
            .inner
            .connector
            .connect(&self.inner.scope, &self.inner.credential)
            .await
        {
            Ok(link) => self.install_link(token, link),
            Err(e) => {
                warn!("Push channel failed to open ({}): {}", self.inner.scope.path(), e);
                self.inner.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// Queue a frame on the live link. Returns `true` only if the channel is
    /// connected and the frame was handed to the transport. A conversation
    /// channel additionally triggers a connect attempt and one deferred retry
    /// of the same frame once the connection is up or a fixed delay elapses.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        let raw = match serde_json::to_string(frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode push frame: {}", e);
                return false;
            }
        };
        self.send_raw(raw)
    }

    pub fn send_raw(&self, raw: String) -> bool {
        if self.state() == ConnectionState::Connected && self.inner.hand_to_link(raw.clone()) {
            return true;
        }

        if matches!(self.inner.scope, ChannelScope::Conversation { .. }) {
            self.defer_retry(raw);
        }
        false
    }

    /// Tear the channel down. Idempotent; safe on a never-opened channel.
    pub fn close(&self) {
        self.cancel_link();
        self.inner.outbound.lock().take();
        self.inner.set_state(ConnectionState::Disconnected);
    }

    fn cancel_link(&self) {
        if let Some(token) = self.inner.link_abort.lock().take() {
            token.cancel();
        }
    }

    fn install_link(&self, token: CancellationToken, link: ChannelLink) {
        *self.inner.outbound.lock() = Some(link.outbound);
        self.inner.set_state(ConnectionState::Connected);
        tokio::spawn(run_link(self.inner.clone(), token, link.inbound));
    }

    /// One connect attempt plus a single retry of the frame, fired either
    /// when the connection comes up or after a fixed delay
    fn defer_retry(&self, raw: String) {
        let channel = self.clone();
        tokio::spawn(async move {
            if channel.state() == ConnectionState::Disconnected {
                channel.open().await;
            }

            let mut state_rx = channel.inner.state_tx.subscribe();
            let wait_connected = async {
                loop {
                    if *state_rx.borrow_and_update() == ConnectionState::Connected {
                        break;
                    }
                    if state_rx.changed().await.is_err() {
                        break;
                    }
                }
            };

            tokio::select! {
                _ = wait_connected => {}
                _ = tokio::time::sleep(SEND_RETRY_DELAY) => {}
            }

            // Single retry; if it still cannot be handed over, the durable
            // path has the message anyway
            if channel.state() == ConnectionState::Connected {
                let _ = channel.inner.hand_to_link(raw);
            } else {
                debug!("Deferred push retry dropped, channel still down");
            }
        });
    }
}

/// Drives one live link: delivers inbound frames, and on unexpected close
/// walks the backoff schedule. A successful reconnect resets the attempt
/// counter; exhausting it leaves the channel `Disconnected` until an
/// explicit `open()`.
async fn run_link(
    inner: Arc<ChannelInner>,
    token: CancellationToken,
    mut inbound: mpsc::UnboundedReceiver<String>,
) {
    loop {
        // Deliver frames until the link drops
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                frame = inbound.recv() => match frame {
                    Some(raw) => inner.deliver(&raw),
                    None => break,
                }
            }
        }

        inner.outbound.lock().take();
        debug!("Push link dropped ({}), reconnecting", inner.scope.path());

        let mut attempt = 1u32;
        let link = loop {
            if attempt > MAX_RECONNECT_ATTEMPTS {
                warn!(
                    "Push channel gave up after {} reconnect attempts ({})",
                    MAX_RECONNECT_ATTEMPTS,
                    inner.scope.path()
                );
                inner.set_state(ConnectionState::Disconnected);
                return;
            }

            inner.set_state(ConnectionState::Reconnecting { attempt });

            let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match inner.connector.connect(&inner.scope, &inner.credential).await {
                Ok(link) => break link,
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    attempt += 1;
                }
            }
        };

        if token.is_cancelled() {
            return;
        }

        *inner.outbound.lock() = Some(link.outbound);
        inbound = link.inbound;
        inner.set_state(ConnectionState::Connected);
    }
}
