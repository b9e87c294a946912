//! Group presence: who is online, and the chat relay.
//!
//! Presence is tracked per *group*, independent of any game session. Every
//! roster update from the server is an authoritative, complete list for the
//! group — there is no incremental add/remove, so a consumer can always
//! render the latest roster without reconciling deltas.
//!
//! Two acquisition modes are offered as alternatives; a caller picks one per
//! mount, never both:
//!
//! - [`GroupChannel`] — **push**: subscribes over the real-time channel and
//!   emits a [`GroupEvent`] per roster broadcast or chat message;
//! - [`RosterPoller`] — **poll**: periodically reads the roster through the
//!   [`SnapshotApi`] and emits the same events, for contexts where holding a
//!   channel open is not worth it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::error::QuizcastError;
use crate::event::GroupEvent;
use crate::protocol::{ClientEnvelope, GroupId, OnlineUser, ServerEnvelope};
use crate::snapshot::SnapshotApi;
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for a [`GroupChannel`].
#[derive(Debug, Clone)]
pub struct GroupChannelConfig {
    /// Capacity of the bounded event channel. Defaults to **64**; values
    /// below 1 are clamped to 1. Overflow drops events (with a warning);
    /// the final `Disconnected` event is always delivered.
    pub event_channel_capacity: usize,
    /// How long [`GroupChannel::shutdown`] waits before aborting the loop.
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl GroupChannelConfig {
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the capacity of the bounded event channel.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for GroupChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Push mode ───────────────────────────────────────────────────────

/// Handle to a push-mode group presence subscription.
///
/// Created via [`GroupChannel::start`]. The background loop sends exactly
/// one `join_group` envelope on open and a `leave_group` on graceful
/// shutdown; in between it folds roster broadcasts into the shared roster
/// and forwards chat messages.
pub struct GroupChannel {
    roster: Arc<Mutex<Vec<OnlineUser>>>,
    connected: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
    group_id: GroupId,
}

impl GroupChannel {
    /// Start the group loop and return a handle plus event receiver.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        group_id: GroupId,
        config: GroupChannelConfig,
    ) -> (Self, mpsc::Receiver<GroupEvent>) {
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<GroupEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let roster = Arc::new(Mutex::new(Vec::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(group_loop(
            transport,
            group_id,
            Arc::clone(&roster),
            Arc::clone(&connected),
            event_tx,
            shutdown_rx,
        ));

        let channel = Self {
            roster,
            connected,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
            group_id,
        };

        (channel, event_rx)
    }

    /// The group this channel is subscribed to.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Returns `true` while the transport is believed to be open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// A copy of the latest roster.
    pub async fn roster(&self) -> Vec<OnlineUser> {
        self.roster.lock().await.clone()
    }

    /// Leave the group and shut the channel down.
    pub async fn shutdown(&mut self) {
        debug!(group_id = %self.group_id, "group channel shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("group loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("group loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("group loop aborted: {join_err}");
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for GroupChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupChannel")
            .field("group_id", &self.group_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for GroupChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Background loop for one group subscription.
async fn group_loop(
    mut transport: impl Transport,
    group_id: GroupId,
    roster: Arc<Mutex<Vec<OnlineUser>>>,
    connected: Arc<AtomicBool>,
    event_tx: mpsc::Sender<GroupEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(%group_id, "group loop started");

    let join = ClientEnvelope::JoinGroup { group_id };
    match serde_json::to_string(&join) {
        Ok(json) => {
            if let Err(e) = transport.send(json).await {
                error!("failed to send join_group envelope: {e}");
                emit_disconnected(
                    &event_tx,
                    &connected,
                    Some(format!("transport send error: {e}")),
                )
                .await;
                return;
            }
        }
        Err(e) => {
            error!("failed to serialize join_group envelope: {e}");
            emit_disconnected(&event_tx, &connected, Some("serialization error".into())).await;
            return;
        }
    }

    emit_event(&event_tx, GroupEvent::Connected).await;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                // Best-effort unsubscribe before closing.
                let leave = ClientEnvelope::LeaveGroup { group_id };
                if let Ok(json) = serde_json::to_string(&leave) {
                    let _ = transport.send(json).await;
                }
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &connected, Some("client shut down".into())).await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        let envelope = match serde_json::from_str::<ServerEnvelope>(&text) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!("failed to deserialize envelope: {e} — raw: {text}");
                                continue;
                            }
                        };

                        // Drop traffic addressed to other groups.
                        let for_us = match &envelope {
                            ServerEnvelope::OnlineUsersUpdate { group_id: g, .. } => *g == group_id,
                            ServerEnvelope::ChatMessage(message) => message.group_id == group_id,
                            _ => false,
                        };
                        if !for_us {
                            debug!("ignoring envelope not addressed to this group");
                            continue;
                        }

                        if let ServerEnvelope::OnlineUsersUpdate { users, .. } = &envelope {
                            // Authoritative full-list replacement.
                            *roster.lock().await = users.clone();
                        }
                        if let Some(event) = GroupEvent::from_envelope(envelope) {
                            emit_event(&event_tx, event).await;
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        emit_disconnected(
                            &event_tx,
                            &connected,
                            Some(format!("transport receive error: {e}")),
                        ).await;
                        break;
                    }
                    None => {
                        debug!("transport closed by server");
                        emit_disconnected(&event_tx, &connected, None).await;
                        break;
                    }
                }
            }
        }
    }

    debug!(%group_id, "group loop exited");
}

// ── Poll mode ───────────────────────────────────────────────────────

/// Handle to a poll-mode roster subscription.
///
/// Fetches the roster through the [`SnapshotApi`] on a fixed interval
/// (first fetch immediately on start) and emits
/// [`GroupEvent::RosterReplaced`] per completed fetch. Fetch failures are
/// logged and polling continues — a miss only delays the next refresh.
pub struct RosterPoller {
    roster: Arc<Mutex<Vec<OnlineUser>>>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    group_id: GroupId,
}

impl RosterPoller {
    /// Start polling the group roster every `interval`.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        api: impl SnapshotApi,
        group_id: GroupId,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<GroupEvent>) {
        let (event_tx, event_rx) = mpsc::channel::<GroupEvent>(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let roster = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(poll_loop(
            Arc::new(api),
            group_id,
            interval,
            Arc::clone(&roster),
            event_tx,
            shutdown_rx,
        ));

        let poller = Self {
            roster,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            group_id,
        };

        (poller, event_rx)
    }

    /// The group being polled.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// A copy of the latest roster.
    pub async fn roster(&self) -> Vec<OnlineUser> {
        self.roster.lock().await.clone()
    }

    /// Stop polling.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RosterPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Background loop for poll-mode presence.
async fn poll_loop(
    api: Arc<impl SnapshotApi>,
    group_id: GroupId,
    interval: Duration,
    roster: Arc<Mutex<Vec<OnlineUser>>>,
    event_tx: mpsc::Sender<GroupEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(%group_id, interval_ms = interval.as_millis() as u64, "roster poll loop started");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                match api.fetch_group_roster(group_id).await {
                    Ok(users) => {
                        *roster.lock().await = users.clone();
                        emit_event(&event_tx, GroupEvent::RosterReplaced { users }).await;
                    }
                    Err(e) => {
                        warn!(%group_id, "roster poll failed: {e}");
                    }
                }
            }
        }
    }

    debug!(%group_id, "roster poll loop exited");
}

// ── Emit helpers ────────────────────────────────────────────────────

/// Emit without blocking; overflow drops the event with a warning.
async fn emit_event(event_tx: &mpsc::Sender<GroupEvent>, event: GroupEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "group event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("group event channel closed, receiver dropped");
        }
    }
}

/// Emit the final `Disconnected` event with a blocking send — it must never
/// be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<GroupEvent>,
    connected: &AtomicBool,
    reason: Option<String>,
) {
    connected.store(false, Ordering::Release);
    if event_tx
        .send(GroupEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("group event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{
        GameStateSnapshot, SessionId, SessionSnapshot, UserIdentity,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    const GROUP: Uuid = Uuid::from_u128(0xB7);

    fn user(n: u128, name: &str) -> OnlineUser {
        OnlineUser {
            id: Uuid::from_u128(n),
            username: name.into(),
        }
    }

    fn roster_json(group: Uuid, users: &[OnlineUser]) -> String {
        serde_json::to_string(&ServerEnvelope::OnlineUsersUpdate {
            group_id: group,
            users: users.to_vec(),
        })
        .unwrap()
    }

    // ── Driven transport (same shape as the session tests) ──────────

    struct DrivenTransport {
        incoming: mpsc::UnboundedReceiver<Option<Result<String, QuizcastError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    struct Driver {
        tx: mpsc::UnboundedSender<Option<Result<String, QuizcastError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl Driver {
        fn push(&self, json: impl Into<String>) {
            self.tx.send(Some(Ok(json.into()))).unwrap();
        }
    }

    fn driven_transport() -> (DrivenTransport, Driver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        (
            DrivenTransport {
                incoming: rx,
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            },
            Driver { tx, sent, closed },
        )
    }

    #[async_trait]
    impl Transport for DrivenTransport {
        async fn send(&mut self, message: String) -> Result<(), QuizcastError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, QuizcastError>> {
            match self.incoming.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), QuizcastError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<GroupEvent>) -> GroupEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn joins_group_on_open_and_leaves_on_shutdown() {
        let (transport, driver) = driven_transport();
        let (mut channel, mut events) =
            GroupChannel::start(transport, GROUP, GroupChannelConfig::new());

        assert_eq!(next_event(&mut events).await, GroupEvent::Connected);
        channel.shutdown().await;

        let sent = driver.sent.lock().unwrap().clone();
        let first: ClientEnvelope = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(first, ClientEnvelope::JoinGroup { group_id: GROUP });
        let last: ClientEnvelope = serde_json::from_str(sent.last().unwrap()).unwrap();
        assert_eq!(last, ClientEnvelope::LeaveGroup { group_id: GROUP });
        assert!(driver.closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn roster_is_replaced_wholesale() {
        let (transport, driver) = driven_transport();
        let (mut channel, mut events) =
            GroupChannel::start(transport, GROUP, GroupChannelConfig::new());

        assert_eq!(next_event(&mut events).await, GroupEvent::Connected);

        driver.push(roster_json(GROUP, &[user(1, "alice"), user(2, "bob")]));
        let event = next_event(&mut events).await;
        assert!(matches!(event, GroupEvent::RosterReplaced { ref users } if users.len() == 2));
        assert_eq!(channel.roster().await.len(), 2);

        // The next broadcast is the complete truth, not a delta.
        driver.push(roster_json(GROUP, &[user(2, "bob")]));
        let _ = next_event(&mut events).await;
        let roster = channel.roster().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].username, "bob");

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn traffic_for_other_groups_is_dropped() {
        let (transport, driver) = driven_transport();
        let (mut channel, mut events) =
            GroupChannel::start(transport, GROUP, GroupChannelConfig::new());

        assert_eq!(next_event(&mut events).await, GroupEvent::Connected);

        driver.push(roster_json(Uuid::from_u128(0xDEAD), &[user(9, "eve")]));
        driver.push(roster_json(GROUP, &[user(1, "alice")]));

        let event = next_event(&mut events).await;
        assert!(matches!(event, GroupEvent::RosterReplaced { ref users } if users.len() == 1));
        assert_eq!(channel.roster().await[0].username, "alice");

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn chat_messages_are_forwarded() {
        let (transport, driver) = driven_transport();
        let (mut channel, mut events) =
            GroupChannel::start(transport, GROUP, GroupChannelConfig::new());

        assert_eq!(next_event(&mut events).await, GroupEvent::Connected);

        driver.push(
            serde_json::json!({
                "type": "chat_message",
                "group_id": GROUP,
                "sender_id": Uuid::from_u128(1),
                "sender_name": "alice",
                "text": "ready?",
            })
            .to_string(),
        );

        let event = next_event(&mut events).await;
        match event {
            GroupEvent::Chat { message } => {
                assert_eq!(message.text, "ready?");
                assert_eq!(message.sender_name, "alice");
            }
            other => panic!("expected Chat, got {other:?}"),
        }

        channel.shutdown().await;
    }

    // ── Poll mode ───────────────────────────────────────────────────

    struct RosterApi {
        rosters: StdMutex<VecDeque<Result<Vec<OnlineUser>, QuizcastError>>>,
    }

    #[async_trait]
    impl SnapshotApi for RosterApi {
        async fn fetch_session(&self, _: SessionId) -> Result<SessionSnapshot, QuizcastError> {
            Err(QuizcastError::NotConnected)
        }

        async fn fetch_game(&self, _: SessionId) -> Result<GameStateSnapshot, QuizcastError> {
            Err(QuizcastError::NotConnected)
        }

        async fn fetch_identity(&self) -> Result<UserIdentity, QuizcastError> {
            Err(QuizcastError::NotConnected)
        }

        async fn fetch_group_roster(
            &self,
            _: GroupId,
        ) -> Result<Vec<OnlineUser>, QuizcastError> {
            self.rosters
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_emits_roster_per_fetch() {
        let api = RosterApi {
            rosters: StdMutex::new(VecDeque::from([
                Ok(vec![user(1, "alice")]),
                Ok(vec![user(1, "alice"), user(2, "bob")]),
            ])),
        };
        let (mut poller, mut events) =
            RosterPoller::start(api, GROUP, Duration::from_millis(100));

        let event = next_event(&mut events).await;
        assert!(matches!(event, GroupEvent::RosterReplaced { ref users } if users.len() == 1));

        let event = next_event(&mut events).await;
        assert!(matches!(event, GroupEvent::RosterReplaced { ref users } if users.len() == 2));
        assert_eq!(poller.roster().await.len(), 2);

        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn poller_survives_fetch_failures() {
        let api = RosterApi {
            rosters: StdMutex::new(VecDeque::from([
                Err(QuizcastError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
                Ok(vec![user(1, "alice")]),
            ])),
        };
        let (mut poller, mut events) =
            RosterPoller::start(api, GROUP, Duration::from_millis(100));

        // The failed tick emits nothing; the next one delivers the roster.
        let event = next_event(&mut events).await;
        assert!(matches!(event, GroupEvent::RosterReplaced { ref users } if users.len() == 1));

        poller.shutdown().await;
    }
}
