#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Shared test utilities for Quizcast client integration tests.
//!
//! Provides a driver-controlled [`MockTransport`] (the test decides exactly
//! when each envelope arrives, so interleavings with snapshot polls are
//! deterministic), a scripted [`MockApi`], and builders for common envelope
//! JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use quizcast_client::protocol::{
    AnswerOption, GameStateSnapshot, GameStartedPayload, GroupId, OnlineUser, QuestionPayload,
    ServerEnvelope, SessionId, SessionSnapshot, SessionStatus, UserIdentity,
};
use quizcast_client::{QuizcastError, SnapshotApi, Transport};

/// Session id shared by all fixtures.
pub const SESSION: Uuid = Uuid::from_u128(0xA5);
/// The authenticated test user.
pub const ME: Uuid = Uuid::from_u128(0x1);
/// The session host in fixtures where the local user is a participant.
pub const OTHER_HOST: Uuid = Uuid::from_u128(0x2);

// ── MockTransport ───────────────────────────────────────────────────

/// A transport whose incoming messages are fed by the test through a
/// [`TransportDriver`], one at a time. `recv` hangs once the driver is done,
/// keeping the loop alive until shutdown.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Option<Result<String, QuizcastError>>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Test-side handle feeding a [`MockTransport`].
pub struct TransportDriver {
    tx: mpsc::UnboundedSender<Option<Result<String, QuizcastError>>>,
    /// Envelopes the client sent, in order.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` was called on the transport.
    pub closed: Arc<AtomicBool>,
}

impl TransportDriver {
    /// Deliver one envelope to the client.
    pub fn push(&self, json: impl Into<String>) {
        self.tx.send(Some(Ok(json.into()))).unwrap();
    }

    /// Deliver a transport-level receive error.
    pub fn fail(&self, message: &str) {
        self.tx
            .send(Some(Err(QuizcastError::TransportReceive(message.into()))))
            .unwrap();
    }

    /// Simulate the server closing the connection cleanly.
    pub fn close(&self) {
        self.tx.send(None).unwrap();
    }
}

/// Create a connected transport/driver pair.
pub fn mock_transport() -> (MockTransport, TransportDriver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockTransport {
            incoming: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        },
        TransportDriver { tx, sent, closed },
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), QuizcastError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, QuizcastError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            // Driver dropped — hang so the loop stays alive until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), QuizcastError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockApi ─────────────────────────────────────────────────────────

/// A scripted [`SnapshotApi`]. Game polls consume `games` in order and
/// **hang forever** when the script is exhausted, so push-only tests never
/// see an unexpected snapshot merge.
pub struct MockApi {
    pub host_id: Uuid,
    games: StdMutex<VecDeque<Result<GameStateSnapshot, QuizcastError>>>,
    pub game_calls: Arc<AtomicU32>,
}

impl MockApi {
    pub fn new(games: Vec<Result<GameStateSnapshot, QuizcastError>>) -> Self {
        Self {
            host_id: ME,
            games: StdMutex::new(games.into()),
            game_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fixtures where the local user is a plain participant, not the host.
    pub fn with_other_host(mut self) -> Self {
        self.host_id = OTHER_HOST;
        self
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
            subject_name: "world history".into(),
            host_id: self.host_id,
            status: SessionStatus::Waiting,
        })
    }

    async fn fetch_game(&self, _: SessionId) -> Result<GameStateSnapshot, QuizcastError> {
        self.game_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.games.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn fetch_identity(&self) -> Result<UserIdentity, QuizcastError> {
        Ok(UserIdentity {
            id: ME,
            username: "alice".into(),
        })
    }

    async fn fetch_group_roster(&self, _: GroupId) -> Result<Vec<OnlineUser>, QuizcastError> {
        Ok(vec![])
    }
}

// ── JSON fixture builders ───────────────────────────────────────────

/// A question with two answers, `flashcard_id` derived from the index.
pub fn question(index: u32, total: u32) -> QuestionPayload {
    QuestionPayload {
        flashcard_id: flashcard(index),
        question_text: format!("What happened in round {index}?"),
        question_index: index,
        total_questions: total,
        answers: vec![
            AnswerOption {
                id: answer(1),
                text: "first option".into(),
            },
            AnswerOption {
                id: answer(2),
                text: "second option".into(),
            },
        ],
    }
}

pub fn flashcard(index: u32) -> Uuid {
    Uuid::from_u128(0x100 + u128::from(index))
}

pub fn answer(n: u128) -> Uuid {
    Uuid::from_u128(0xA000 + n)
}

pub fn envelope_json(envelope: &ServerEnvelope) -> String {
    serde_json::to_string(envelope).unwrap()
}

pub fn game_started_json(total_questions: u32, max_possible_score: u32) -> String {
    envelope_json(&ServerEnvelope::GameStarted(Box::new(GameStartedPayload {
        session_id: SESSION,
        question: question(0, total_questions),
        total_score: 0,
        max_possible_score,
    })))
}

pub fn next_question_json(index: u32, total: u32) -> String {
    serde_json::json!({
        "type": "next_question",
        "question": question(index, total),
    })
    .to_string()
}

pub fn vote_update_json(index: u32, votes: &[(Uuid, Uuid)]) -> String {
    let votes_map: std::collections::BTreeMap<_, _> = votes.iter().copied().collect();
    let mut counts: std::collections::BTreeMap<Uuid, u32> = Default::default();
    for (_, answer) in votes {
        *counts.entry(*answer).or_insert(0) += 1;
    }
    serde_json::json!({
        "type": "vote_update",
        "flashcard_id": flashcard(index),
        "votes": votes_map,
        "counts": counts,
    })
    .to_string()
}

pub fn question_ended_json(index: u32, points_earned: u32, total_score: u32) -> String {
    serde_json::json!({
        "type": "question_ended",
        "flashcard_id": flashcard(index),
        "correct_answer_id": answer(1),
        "winning_answer_id": answer(1),
        "was_correct": points_earned > 0,
        "points_earned": points_earned,
        "total_score": total_score,
        "points_per_question": 100,
    })
    .to_string()
}

pub fn game_finished_json(total_score: u32, max: u32, percentage: f64, won: bool) -> String {
    serde_json::json!({
        "type": "game_finished",
        "total_score": total_score,
        "max_possible_score": max,
        "percentage": percentage,
        "status": if won { "won" } else { "lost" },
    })
    .to_string()
}

pub fn game_joined_json() -> String {
    serde_json::json!({ "type": "game_joined", "session_id": SESSION }).to_string()
}

/// A plain waiting-room snapshot with no scores and no votes.
pub fn waiting_snapshot() -> GameStateSnapshot {
    GameStateSnapshot {
        status: SessionStatus::Waiting,
        current_question_index: 0,
        current_flashcard_id: None,
        total_score: None,
        max_possible_score: None,
        votes: None,
    }
}

/// A mid-game snapshot pointing at `index`.
pub fn playing_snapshot(index: u32) -> GameStateSnapshot {
    GameStateSnapshot {
        status: SessionStatus::Playing,
        current_question_index: index,
        current_flashcard_id: Some(flashcard(index)),
        total_score: None,
        max_possible_score: None,
        votes: None,
    }
}
