// Reconnect, backoff and send semantics of PushChannel, driven through an
// in-memory connector on tokio's paused clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use taleem_transport::{
    ChannelLink, ChannelScope, ConnectionState, Connector, PushChannel, TransportError,
};

struct ServerSide {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: Option<mpsc::UnboundedReceiver<String>>,
}

/// Connector whose accept/refuse behavior is scripted per connect attempt.
/// An exhausted script refuses.
struct TestConnector {
    outcomes: Mutex<VecDeque<bool>>,
    connects: Mutex<Vec<Instant>>,
    server_sides: Mutex<Vec<ServerSide>>,
}

impl TestConnector {
    fn new(outcomes: impl IntoIterator<Item = bool>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            connects: Mutex::new(Vec::new()),
            server_sides: Mutex::new(Vec::new()),
        })
    }

    fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    fn connect_instants(&self) -> Vec<Instant> {
        self.connects.lock().clone()
    }

    /// Drop the server-side sender of link `i`, closing it under the channel
    fn close_link(&self, i: usize) {
        self.server_sides.lock()[i].to_client.take();
    }

    fn push_to_client(&self, i: usize, raw: &str) {
        self.server_sides.lock()[i]
            .to_client
            .as_ref()
            .expect("link already closed")
            .send(raw.to_string())
            .expect("channel dropped inbound side");
    }

    fn take_from_client(&self, i: usize) -> mpsc::UnboundedReceiver<String> {
        self.server_sides.lock()[i]
            .from_client
            .take()
            .expect("from_client already taken")
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(
        &self,
        _scope: &ChannelScope,
        _credential: &str,
    ) -> Result<ChannelLink, TransportError> {
        self.connects.lock().push(Instant::now());

        let accept = self.outcomes.lock().pop_front().unwrap_or(false);
        if !accept {
            return Err(TransportError::Refused("scripted refusal".to_string()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.server_sides.lock().push(ServerSide {
            to_client: Some(in_tx),
            from_client: Some(out_rx),
        });

        Ok(ChannelLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn conversation_channel(connector: Arc<TestConnector>) -> PushChannel {
    PushChannel::new(
        ChannelScope::Conversation {
            conversation_id: "c1".to_string(),
        },
        "token".to_string(),
        connector,
    )
}

fn notification_channel(connector: Arc<TestConnector>) -> PushChannel {
    PushChannel::new(
        ChannelScope::Notifications {
            user_id: "u1".to_string(),
        },
        "token".to_string(),
        connector,
    )
}

async fn wait_for(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    loop {
        if *rx.borrow_and_update() == want {
            return;
        }
        rx.changed().await.expect("state watch closed");
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_then_permanent_disconnect() {
    let connector = TestConnector::new([true, false, false, false, false, false]);
    let channel = conversation_channel(connector.clone());
    let mut state_rx = channel.subscribe_state();

    channel.open().await;
    assert_eq!(channel.state(), ConnectionState::Connected);

    let dropped_at = Instant::now();
    connector.close_link(0);
    wait_for(&mut state_rx, ConnectionState::Disconnected).await;

    let connects = connector.connect_instants();
    assert_eq!(connects.len(), 6, "one open plus five reconnect attempts");

    assert_eq!(connects[1] - dropped_at, Duration::from_secs(1));
    assert_eq!(connects[2] - connects[1], Duration::from_secs(2));
    assert_eq!(connects[3] - connects[2], Duration::from_secs(4));
    assert_eq!(connects[4] - connects[3], Duration::from_secs(8));
    assert_eq!(connects[5] - connects[4], Duration::from_secs(16));

    // Past the limit nothing else is ever scheduled
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.connect_count(), 6);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_counter_resets_on_successful_reconnect() {
    let connector = TestConnector::new([true, false, true, true]);
    let channel = conversation_channel(connector.clone());
    let mut state_rx = channel.subscribe_state();

    channel.open().await;
    connector.close_link(0);

    // First reconnect refused, second accepted
    wait_for(&mut state_rx, ConnectionState::Reconnecting { attempt: 1 }).await;
    wait_for(&mut state_rx, ConnectionState::Connected).await;
    assert_eq!(connector.connect_count(), 3);

    // Another drop starts back at the 1 s delay, not 4 s
    let dropped_at = Instant::now();
    connector.close_link(1);
    wait_for(&mut state_rx, ConnectionState::Reconnecting { attempt: 1 }).await;
    wait_for(&mut state_rx, ConnectionState::Connected).await;

    let connects = connector.connect_instants();
    assert_eq!(connects[3] - dropped_at, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_resolves_and_leaves_disconnected() {
    let connector = TestConnector::new([false]);
    let channel = conversation_channel(connector.clone());

    // Never errors; the failure is logged and absorbed
    channel.open().await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    // An initial open failure schedules no retries
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_on_connected_channel_reaches_the_wire() {
    let connector = TestConnector::new([true]);
    let channel = conversation_channel(connector.clone());

    channel.open().await;
    let mut from_client = connector.take_from_client(0);

    assert!(channel.send_raw("ping".to_string()));
    assert_eq!(from_client.recv().await.unwrap(), "ping");
}

#[tokio::test(start_paused = true)]
async fn test_conversation_send_while_down_defers_one_retry() {
    let connector = TestConnector::new([true]);
    let channel = conversation_channel(connector.clone());

    // Not connected: refused immediately, but a connect plus one deferred
    // retry is set in motion
    assert!(!channel.send_raw("deferred".to_string()));

    let mut state_rx = channel.subscribe_state();
    wait_for(&mut state_rx, ConnectionState::Connected).await;

    let mut from_client = connector.take_from_client(0);
    assert_eq!(from_client.recv().await.unwrap(), "deferred");
}

#[tokio::test(start_paused = true)]
async fn test_deferred_retry_gives_up_after_fixed_delay() {
    let connector = TestConnector::new([false]);
    let channel = conversation_channel(connector.clone());

    assert!(!channel.send_raw("lost".to_string()));

    // One connect attempt from the deferred path, then silence
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_notification_send_while_down_triggers_no_connect() {
    let connector = TestConnector::new([true]);
    let channel = notification_channel(connector.clone());

    assert!(!channel.send_raw("dropped".to_string()));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent_and_cancels_reconnect() {
    let connector = TestConnector::new([true]);
    let channel = conversation_channel(connector.clone());
    let mut state_rx = channel.subscribe_state();

    // Safe on a never-opened channel
    channel.close();

    channel.open().await;
    connector.close_link(0);
    wait_for(&mut state_rx, ConnectionState::Reconnecting { attempt: 1 }).await;

    channel.close();
    channel.close();
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    // The pending backoff attempt was cancelled with it
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_message_handlers_run_in_registration_order() {
    let connector = TestConnector::new([true]);
    let channel = conversation_channel(connector.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    for tag in [1u32, 2, 3] {
        let seen = seen.clone();
        let done_tx = done_tx.clone();
        channel.on_message(move |raw| {
            seen.lock().push((tag, raw.to_string()));
            let _ = done_tx.send(tag);
        });
    }

    channel.open().await;
    connector.push_to_client(0, "frame-a");

    for _ in 0..3 {
        done_rx.recv().await.unwrap();
    }

    let seen = seen.lock();
    assert_eq!(
        *seen,
        vec![
            (1, "frame-a".to_string()),
            (2, "frame-a".to_string()),
            (3, "frame-a".to_string())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connection_handlers_observe_transitions() {
    let connector = TestConnector::new([true]);
    let channel = conversation_channel(connector.clone());

    let transitions = Arc::new(Mutex::new(Vec::new()));
    {
        let transitions = transitions.clone();
        channel.on_connection_change(move |state| {
            transitions.lock().push(state);
        });
    }

    channel.open().await;
    channel.close();

    assert_eq!(
        *transitions.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ]
    );
}
