//! Live game-session engine.
//!
//! [`LiveSession`] is a thin handle over a background loop that keeps one
//! session's [`GameState`] consistent across its two sources of truth:
//!
//! 1. a **seed** — on start, the loop polls the current-user identity, the
//!    session metadata, and the game snapshot through the [`SnapshotApi`],
//!    and merges them into the store;
//! 2. a **stream** — every envelope arriving on the [`Transport`] is folded
//!    into the store by the pure reducer in [`dispatch`](crate::dispatch),
//!    in arrival order.
//!
//! All mutation happens on the loop task (single writer); readers get
//! cloned-out copies through the handle. Ordering *between* the two sources
//! is not guaranteed — a poll response may land after a newer push event —
//! which is exactly why snapshot merges are field-scoped (see
//! [`view`](crate::view)). In-flight polls are never cancelled; a late
//! result is merged under the same ownership rule, which makes it harmless.
//!
//! Host/participant intents are *not* part of this handle: issue them
//! through a [`CommandApi`](crate::commands::CommandApi) implementation and
//! watch their effects arrive back over the channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let ctx = SessionContext::new(session_id, token);
//! let transport = WebSocketTransport::connect_authenticated(url, &ctx.auth).await?;
//! let api = RestClient::new(base_url, ctx.auth.clone())?;
//! let (session, mut events) = LiveSession::start(transport, api, ctx, SessionConfig::new());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::QuestionChanged { question } => { /* render */ }
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::context::SessionContext;
use crate::dispatch::{step, StepEffect};
use crate::error::QuizcastError;
use crate::event::SessionEvent;
use crate::protocol::{
    ClientEnvelope, GameStateSnapshot, ServerEnvelope, SessionId, SessionSnapshot, UserIdentity,
};
use crate::retry::retry_with_backoff;
use crate::snapshot::SnapshotApi;
use crate::transport::Transport;
use crate::view::{GameState, GameView};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bound on snapshot-poll attempts during the auto-join race.
const DEFAULT_POLL_RETRY_ATTEMPTS: u32 = 3;

/// Default first delay before re-polling after a transient failure.
const DEFAULT_POLL_RETRY_DELAY: Duration = Duration::from_millis(400);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`LiveSession`]. All fields have sensible defaults.
///
/// # Example
///
/// ```
/// use quizcast_client::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_event_channel_capacity(512)
///     .with_poll_retry(5, Duration::from_millis(200));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) to avoid blocking the loop. The final `Disconnected` event is
    /// always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`LiveSession::shutdown`] waits for the loop to exit before
    /// aborting the task. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Attempt budget for snapshot polls hitting the not-yet-a-participant
    /// race. Defaults to **3**.
    pub poll_retry_attempts: u32,
    /// First delay between such attempts; doubles per retry.
    /// Defaults to **400 ms**.
    pub poll_retry_delay: Duration,
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            poll_retry_attempts: DEFAULT_POLL_RETRY_ATTEMPTS,
            poll_retry_delay: DEFAULT_POLL_RETRY_DELAY,
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

    /// Set the snapshot-poll retry budget and first delay.
    #[must_use]
    pub fn with_poll_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.poll_retry_attempts = attempts;
        self.poll_retry_delay = delay;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Snapshot plumbing ───────────────────────────────────────────────

/// Completed poll delivered back into the loop. Fetch tasks run detached so
/// the loop never blocks on the REST API; completions are folded in whatever
/// order they land, which the field-ownership rule makes safe.
enum PollOutcome {
    Identity(Result<UserIdentity, QuizcastError>),
    Session(Result<SessionSnapshot, QuizcastError>),
    Game(Result<GameStateSnapshot, QuizcastError>),
}

/// Spawn a bounded-retry game poll that reports into `poll_tx`.
fn spawn_game_poll<A: SnapshotApi>(
    api: &Arc<A>,
    session_id: SessionId,
    poll_tx: &mpsc::UnboundedSender<PollOutcome>,
    attempts: u32,
    delay: Duration,
) {
    let api = Arc::clone(api);
    let poll_tx = poll_tx.clone();
    tokio::spawn(async move {
        let result = retry_with_backoff(attempts, delay, QuizcastError::is_transient, || {
            let api = Arc::clone(&api);
            async move { api.fetch_game(session_id).await }
        })
        .await;
        let _ = poll_tx.send(PollOutcome::Game(result));
    });
}

/// Spawn the mount-time seed: identity, session metadata, then game state.
fn spawn_seed<A: SnapshotApi>(
    api: &Arc<A>,
    session_id: SessionId,
    poll_tx: &mpsc::UnboundedSender<PollOutcome>,
    attempts: u32,
    delay: Duration,
) {
    let api = Arc::clone(api);
    let poll_tx = poll_tx.clone();
    tokio::spawn(async move {
        let identity = retry_with_backoff(attempts, delay, QuizcastError::is_transient, || {
            let api = Arc::clone(&api);
            async move { api.fetch_identity().await }
        })
        .await;
        let _ = poll_tx.send(PollOutcome::Identity(identity));

        let session = retry_with_backoff(attempts, delay, QuizcastError::is_transient, || {
            let api = Arc::clone(&api);
            async move { api.fetch_session(session_id).await }
        })
        .await;
        let _ = poll_tx.send(PollOutcome::Session(session));

        let game = retry_with_backoff(attempts, delay, QuizcastError::is_transient, || {
            let api = Arc::clone(&api);
            async move { api.fetch_game(session_id).await }
        })
        .await;
        let _ = poll_tx.send(PollOutcome::Game(game));
    });
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle to one mounted live session.
///
/// Created via [`LiveSession::start`], which spawns the background loop and
/// returns this handle together with the event receiver. The handle exposes
/// read access to the store and lifecycle control; it sends nothing itself
/// after the initial join envelope.
pub struct LiveSession {
    /// The store; written only by the loop task.
    state: Arc<Mutex<GameState>>,
    /// Whether the transport is believed to be open.
    connected: Arc<AtomicBool>,
    /// Handle to the background loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Signals the loop to shut down gracefully.
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
    session_id: SessionId,
}

impl LiveSession {
    /// Start the session loop and return a handle plus event receiver.
    ///
    /// The loop immediately sends the `join_game` envelope — exactly one per
    /// connection-open — and seeds the store from the snapshot API.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        api: impl SnapshotApi,
        ctx: SessionContext,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(Mutex::new(GameState::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let session_id = ctx.session_id;

        let task = tokio::spawn(session_loop(
            transport,
            Arc::new(api),
            ctx,
            Arc::clone(&state),
            Arc::clone(&connected),
            event_tx,
            shutdown_rx,
            config.poll_retry_attempts,
            config.poll_retry_delay,
        ));

        let session = Self {
            state,
            connected,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
            session_id,
        };

        (session, event_rx)
    }

    /// The session this handle is mounted on.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns `true` while the transport is believed to be open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// A copy of the full store.
    pub async fn state(&self) -> GameState {
        self.state.lock().await.clone()
    }

    /// A copy of the current game view, if one exists yet.
    pub async fn view(&self) -> Option<GameView> {
        self.state.lock().await.view.clone()
    }

    /// Whether the local user holds host privileges for this session.
    pub async fn is_host(&self) -> bool {
        self.state.lock().await.is_host()
    }

    /// Shut down the session: close the transport and stop the loop.
    ///
    /// The event receiver yields a final `Disconnected` then `None`.
    pub async fn shutdown(&mut self) {
        debug!(session_id = %self.session_id, "session shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout; abort if it does not exit in time
        // so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("session_id", &self.session_id)
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // `Drop` is synchronous, so a graceful close (which awaits
        // `transport.close()`) is not possible here. Aborting the task drops
        // the loop future immediately.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Background loop: join, seed, then multiplex pushes and poll completions.
///
/// Exits when the transport closes or errors, or on the shutdown signal.
#[allow(clippy::too_many_arguments)]
async fn session_loop(
    mut transport: impl Transport,
    api: Arc<impl SnapshotApi>,
    ctx: SessionContext,
    state: Arc<Mutex<GameState>>,
    connected: Arc<AtomicBool>,
    event_tx: mpsc::Sender<SessionEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
    poll_retry_attempts: u32,
    poll_retry_delay: Duration,
) {
    debug!(session_id = %ctx.session_id, "session loop started");

    // Declare intent before expecting targeted events: exactly one join
    // envelope per connection-open.
    let join = ClientEnvelope::JoinGame {
        session_id: ctx.session_id,
    };
    match serde_json::to_string(&join) {
        Ok(json) => {
            if let Err(e) = transport.send(json).await {
                error!("failed to send join envelope: {e}");
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
            // Serialization of a join envelope failing is a programming bug;
            // surface it loudly and stop.
            error!("failed to serialize join envelope: {e}");
            emit_disconnected(&event_tx, &connected, Some("serialization error".into())).await;
            return;
        }
    }

    emit_event(&event_tx, SessionEvent::Connected).await;

    let (poll_tx, mut poll_rx) = mpsc::unbounded_channel::<PollOutcome>();
    spawn_seed(
        &api,
        ctx.session_id,
        &poll_tx,
        poll_retry_attempts,
        poll_retry_delay,
    );

    loop {
        tokio::select! {
            // Branch 1: shutdown signal.
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &connected, Some("client shut down".into())).await;
                break;
            }

            // Branch 2: a snapshot poll completed.
            Some(outcome) = poll_rx.recv() => {
                handle_poll_outcome(&state, &event_tx, outcome).await;
            }

            // Branch 3: incoming envelope from the server.
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

                        let effect = {
                            let mut guard = state.lock().await;
                            step(&mut guard, &envelope)
                        };
                        if effect == StepEffect::RefreshSnapshot {
                            spawn_game_poll(
                                &api,
                                ctx.session_id,
                                &poll_tx,
                                poll_retry_attempts,
                                poll_retry_delay,
                            );
                        }

                        if let Some(event) = SessionEvent::from_envelope(envelope) {
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

    debug!(session_id = %ctx.session_id, "session loop exited");
}

/// Fold one completed poll into the store and report it to the consumer.
async fn handle_poll_outcome(
    state: &Mutex<GameState>,
    event_tx: &mpsc::Sender<SessionEvent>,
    outcome: PollOutcome,
) {
    match outcome {
        PollOutcome::Identity(Ok(identity)) => {
            state.lock().await.set_identity(&identity);
            debug!(user_id = %identity.id, "identity resolved");
        }
        PollOutcome::Session(Ok(snapshot)) => {
            state.lock().await.seed_session(&snapshot);
            debug!(host_id = %snapshot.host_id, status = ?snapshot.status, "session metadata seeded");
        }
        PollOutcome::Game(Ok(snapshot)) => {
            state.lock().await.merge_game_snapshot(&snapshot);
            emit_event(event_tx, SessionEvent::ViewRefreshed).await;
        }
        PollOutcome::Identity(Err(e)) | PollOutcome::Session(Err(e)) | PollOutcome::Game(Err(e)) => {
            warn!("snapshot poll failed: {e}");
            emit_event(
                event_tx,
                SessionEvent::SnapshotFailed {
                    reason: e.to_string(),
                },
            )
            .await;
        }
    }
}

/// Emit an event without blocking the loop: if the channel is full, log and
/// drop the event.
async fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the final `Disconnected` event and mark the handle disconnected.
///
/// Uses a blocking `send().await` rather than `try_send`: `Disconnected` is
/// always the last event on the channel and must never be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SessionEvent>,
    connected: &AtomicBool,
    reason: Option<String>,
) {
    connected.store(false, Ordering::Release);
    if event_tx
        .send(SessionEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
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
    use crate::protocol::{GameStartedPayload, QuestionPayload, SessionStatus};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    const SESSION: Uuid = Uuid::from_u128(0xA5);
    const ME: Uuid = Uuid::from_u128(0x1);

    // ── Driven transport ────────────────────────────────────────────

    /// A transport the test drives message by message, so interleavings
    /// between pushes and polls are deterministic.
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

        fn close(&self) {
            self.tx.send(None).unwrap();
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
                // Driver dropped: behave like a server that went silent.
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), QuizcastError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    // ── Scripted snapshot API ───────────────────────────────────────

    struct MockApi {
        games: StdMutex<VecDeque<Result<GameStateSnapshot, QuizcastError>>>,
        game_calls: AtomicU32,
        host_id: Uuid,
    }

    impl MockApi {
        fn new(games: Vec<Result<GameStateSnapshot, QuizcastError>>) -> Self {
            Self {
                games: StdMutex::new(games.into()),
                game_calls: AtomicU32::new(0),
                host_id: ME,
            }
        }
    }

    fn waiting_snapshot() -> GameStateSnapshot {
        GameStateSnapshot {
            status: SessionStatus::Waiting,
            current_question_index: 0,
            current_flashcard_id: None,
            total_score: None,
            max_possible_score: None,
            votes: None,
        }
    }

    #[async_trait]
    impl SnapshotApi for MockApi {
        async fn fetch_session(
            &self,
            session_id: SessionId,
        ) -> Result<SessionSnapshot, QuizcastError> {
            Ok(SessionSnapshot {
                session_id,
                subject_name: "history".into(),
                host_id: self.host_id,
                status: SessionStatus::Waiting,
            })
        }

        async fn fetch_game(&self, _: SessionId) -> Result<GameStateSnapshot, QuizcastError> {
            self.game_calls.fetch_add(1, Ordering::SeqCst);
            self.games
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(waiting_snapshot()))
        }

        async fn fetch_identity(&self) -> Result<UserIdentity, QuizcastError> {
            Ok(UserIdentity {
                id: ME,
                username: "alice".into(),
            })
        }

        async fn fetch_group_roster(
            &self,
            _: crate::protocol::GroupId,
        ) -> Result<Vec<crate::protocol::OnlineUser>, QuizcastError> {
            Ok(vec![])
        }
    }

    // ── Fixtures ────────────────────────────────────────────────────

    fn question_json(index: u32) -> String {
        serde_json::to_string(&QuestionPayload {
            flashcard_id: Uuid::from_u128(100 + u128::from(index)),
            question_text: format!("q{index}"),
            question_index: index,
            total_questions: 3,
            answers: vec![],
        })
        .unwrap()
    }

    fn game_started_json() -> String {
        let payload = GameStartedPayload {
            session_id: SESSION,
            question: serde_json::from_str(&question_json(0)).unwrap(),
            total_score: 0,
            max_possible_score: 300,
        };
        let mut value = serde_json::to_value(&payload).unwrap();
        value["type"] = "game_started".into();
        value.to_string()
    }

    fn question_ended_json(index: u32, total_score: u32) -> String {
        serde_json::json!({
            "type": "question_ended",
            "flashcard_id": Uuid::from_u128(100 + u128::from(index)),
            "correct_answer_id": Uuid::from_u128(1),
            "was_correct": true,
            "points_earned": 100,
            "total_score": total_score,
            "points_per_question": 100,
        })
        .to_string()
    }

    async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Drain events until one matches, failing on channel close.
    async fn wait_for(
        events: &mut mpsc::Receiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = next_event(events).await;
            if pred(&event) {
                return event;
            }
        }
    }

    fn start_session(
        transport: DrivenTransport,
        api: MockApi,
    ) -> (LiveSession, mpsc::Receiver<SessionEvent>) {
        LiveSession::start(
            transport,
            api,
            SessionContext::new(SESSION, "token"),
            SessionConfig::new().with_poll_retry(3, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn join_envelope_is_sent_first() {
        let (transport, driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, MockApi::new(vec![]));

        let event = next_event(&mut events).await;
        assert_eq!(event, SessionEvent::Connected);

        let sent = driver.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1, "exactly one join per connection-open");
        let envelope: ClientEnvelope = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(envelope, ClientEnvelope::JoinGame { session_id: SESSION });

        session.shutdown().await;
    }

    #[tokio::test]
    async fn seed_populates_identity_host_and_view() {
        let (transport, _driver) = driven_transport();
        let (mut session, mut events) =
            start_session(transport, MockApi::new(vec![Ok(waiting_snapshot())]));

        wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;

        let state = session.state().await;
        assert_eq!(state.me, Some(ME));
        assert_eq!(state.host_id, Some(ME));
        assert!(session.is_host().await);
        assert_eq!(state.view.unwrap().status, SessionStatus::Waiting);

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn auto_join_race_is_retried() {
        let api = MockApi::new(vec![
            Err(QuizcastError::NotYetJoined),
            Ok(waiting_snapshot()),
        ]);
        let (transport, _driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, api);

        wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;
        assert!(session.view().await.is_some());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_failure_is_recoverable() {
        let api = MockApi::new(vec![Err(QuizcastError::Api {
            status: 500,
            message: "boom".into(),
        })]);
        let (transport, driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, api);

        let failed = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::SnapshotFailed { .. })
        })
        .await;
        if let SessionEvent::SnapshotFailed { reason } = failed {
            assert!(reason.contains("500"));
        }

        // The loop is still alive and keeps folding pushes.
        driver.push(game_started_json());
        wait_for(&mut events, |e| matches!(e, SessionEvent::GameStarted { .. })).await;
        assert_eq!(
            session.view().await.unwrap().status,
            SessionStatus::Playing
        );

        session.shutdown().await;
    }

    #[tokio::test]
    async fn game_joined_schedules_a_refresh() {
        let later = GameStateSnapshot {
            status: SessionStatus::Playing,
            current_question_index: 2,
            current_flashcard_id: Some(Uuid::from_u128(102)),
            total_score: None,
            max_possible_score: None,
            votes: None,
        };
        let api = MockApi::new(vec![Ok(waiting_snapshot()), Ok(later)]);
        let (transport, driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, api);

        wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;

        driver.push(serde_json::json!({"type": "game_joined", "session_id": SESSION}).to_string());
        wait_for(&mut events, |e| matches!(e, SessionEvent::Joined { .. })).await;
        wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;

        let view = session.view().await.unwrap();
        assert_eq!(view.current_question_index, 2);
        assert_eq!(view.status, SessionStatus::Playing);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn stale_snapshot_cannot_roll_back_pushed_score() {
        // Seed snapshot, then a deliberately stale one claiming `waiting`.
        let stale = waiting_snapshot();
        let api = MockApi::new(vec![Ok(waiting_snapshot()), Ok(stale)]);
        let (transport, driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, api);

        wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;

        driver.push(game_started_json());
        wait_for(&mut events, |e| matches!(e, SessionEvent::GameStarted { .. })).await;
        driver.push(question_ended_json(0, 300));
        wait_for(&mut events, |e| matches!(e, SessionEvent::QuestionEnded { .. })).await;
        assert_eq!(session.view().await.unwrap().total_score, 300);

        // The late poll merges: status refreshes, the score must not.
        driver.push(serde_json::json!({"type": "game_joined", "session_id": SESSION}).to_string());
        wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;

        let view = session.view().await.unwrap();
        assert_eq!(view.status, SessionStatus::Waiting, "pointer fields refresh");
        assert_eq!(view.total_score, 300, "score is push-owned");
        assert_eq!(view.max_possible_score, Some(300));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_envelope_is_ignored() {
        let (transport, driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, MockApi::new(vec![]));

        driver.push(r#"{"type":"confetti_storm","intensity":11}"#);
        driver.push(game_started_json());

        // The unknown envelope produces no event; the next one does.
        let event = wait_for(&mut events, |e| {
            matches!(
                e,
                SessionEvent::GameStarted { .. } | SessionEvent::Disconnected { .. }
            )
        })
        .await;
        assert!(matches!(event, SessionEvent::GameStarted { .. }));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn transport_close_emits_disconnected() {
        let (transport, driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, MockApi::new(vec![]));

        wait_for(&mut events, |e| *e == SessionEvent::Connected).await;
        driver.close();

        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        assert_eq!(event, SessionEvent::Disconnected { reason: None });
        assert!(!session.is_connected());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_transport_and_emits_disconnected() {
        let (transport, driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, MockApi::new(vec![]));

        wait_for(&mut events, |e| *e == SessionEvent::Connected).await;
        session.shutdown().await;

        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        assert_eq!(
            event,
            SessionEvent::Disconnected {
                reason: Some("client shut down".into())
            }
        );
        assert!(driver.closed.load(Ordering::Relaxed));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (transport, _driver) = driven_transport();
        let (mut session, mut events) = start_session(transport, MockApi::new(vec![]));

        wait_for(&mut events, |e| *e == SessionEvent::Connected).await;
        session.shutdown().await;
        session.shutdown().await;
    }

    #[tokio::test]
    async fn config_defaults_and_builders() {
        let config = SessionConfig::new();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.poll_retry_attempts, 3);

        let config = SessionConfig::new()
            .with_event_channel_capacity(0)
            .with_poll_retry(7, Duration::from_millis(5));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.poll_retry_attempts, 7);
    }
}
