//! Wire types for the Quizcast live-session protocol.
//!
//! Every type in this module produces identical JSON to the Quizcast server.
//! Channel envelopes are `{ "type": ..., ...payload }` objects: the `type`
//! discriminator sits next to the payload fields rather than wrapping them.
//! Snapshot DTOs returned by the REST read endpoints live here too, so the
//! whole wire surface is in one place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for live quiz sessions.
pub type SessionId = Uuid;

/// Unique identifier for groups.
pub type GroupId = Uuid;

/// Unique identifier for flashcards (one flashcard = one question).
pub type FlashcardId = Uuid;

/// Unique identifier for answer options within a flashcard.
pub type AnswerId = Uuid;

/// Unique identifier for participants (users).
pub type ParticipantId = Uuid;

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle status of a live session.
///
/// `QuestionEnded` and `Playing` alternate once per question; `Finished` is
/// terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session exists but the host has not started the game.
    #[default]
    Waiting,
    /// A question is in flight and votes are being collected.
    Playing,
    /// The current question was closed; its result is on display.
    QuestionEnded,
    /// The game is over. No further game events are expected.
    Finished,
}

/// Terminal outcome of a finished game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    Won,
    Lost,
}

// ── Structs ─────────────────────────────────────────────────────────

/// One selectable answer of a question. Order within
/// [`QuestionPayload::answers`] is the display order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerOption {
    pub id: AnswerId,
    pub text: String,
}

/// The in-flight question. Replaces any previous value wholesale on arrival;
/// lives until the next question event or game end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionPayload {
    pub flashcard_id: FlashcardId,
    pub question_text: String,
    /// Zero-based position of this question in the run.
    pub question_index: u32,
    pub total_questions: u32,
    pub answers: Vec<AnswerOption>,
}

impl QuestionPayload {
    /// Whether this is the final question of the run.
    ///
    /// Computed, never stored: `question_index >= total_questions - 1`.
    pub fn is_last(&self) -> bool {
        self.question_index + 1 >= self.total_questions
    }
}

/// Server-computed vote state for the active question.
///
/// `counts` is authoritative — the client replaces its tally wholesale and
/// never accumulates counts itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VoteTallyPayload {
    pub flashcard_id: FlashcardId,
    /// Latest vote per participant.
    #[serde(default)]
    pub votes: BTreeMap<ParticipantId, AnswerId>,
    /// Vote count per answer, computed server-side.
    #[serde(default)]
    pub counts: BTreeMap<AnswerId, u32>,
}

/// Outcome of one closed question. Immutable once received; discarded on the
/// next question transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionResultPayload {
    pub flashcard_id: FlashcardId,
    pub correct_answer_id: AnswerId,
    /// The tallied majority/team choice, if anyone voted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_answer_id: Option<AnswerId>,
    pub was_correct: bool,
    pub points_earned: u32,
    /// Running total after this question — the only legal score mutation
    /// source for the client-side view.
    pub total_score: u32,
    pub points_per_question: u32,
}

/// Terminal result of a finished game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameResultPayload {
    pub total_score: u32,
    pub max_possible_score: u32,
    pub percentage: f64,
    pub status: GameOutcome,
}

/// One entry of a group's connected-users roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnlineUser {
    pub id: ParticipantId,
    pub username: String,
}

/// A chat message relayed over the group channel. Carried at the interface
/// level only; the client attaches no semantics to the content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessagePayload {
    pub group_id: GroupId,
    pub sender_id: ParticipantId,
    pub sender_name: String,
    pub text: String,
    /// ISO 8601 timestamp assigned by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
}

// ── Payload structs ─────────────────────────────────────────────────

/// Payload for the `game_started` envelope.
/// Boxed in [`ServerEnvelope`] to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameStartedPayload {
    pub session_id: SessionId,
    /// The first question of the run.
    pub question: QuestionPayload,
    #[serde(default)]
    pub total_score: u32,
    /// Score cap for the whole run. Set once; never altered afterwards.
    pub max_possible_score: u32,
}

// ── Envelopes ───────────────────────────────────────────────────────

/// Envelopes sent from client to server over the real-time channel.
///
/// Exactly one join envelope is sent per connection-open event, before any
/// targeted events are expected back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientEnvelope {
    /// Declare intent to receive game events for a session.
    #[serde(rename = "join_game")]
    JoinGame { session_id: SessionId },
    /// Subscribe to a group's presence roster and chat relay.
    #[serde(rename = "join_group")]
    JoinGroup { group_id: GroupId },
    /// Unsubscribe from a group channel.
    #[serde(rename = "leave_group")]
    LeaveGroup { group_id: GroupId },
}

/// Envelopes delivered from server to client over the real-time channel.
///
/// Unrecognized `type` values deserialize to [`Unknown`](Self::Unknown) so
/// the dispatcher stays forward-compatible: new server-side envelope types
/// are logged and ignored instead of failing the whole read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEnvelope {
    /// The server confirmed (or auto-performed) this client's session join.
    /// Prompts a snapshot refresh; carries no game state itself.
    #[serde(rename = "game_joined")]
    GameJoined { session_id: SessionId },

    /// The host started the game (boxed to reduce enum size).
    #[serde(rename = "game_started")]
    GameStarted(Box<GameStartedPayload>),

    /// A new question replaced the current one. The server emits
    /// `new_question` for the first transition after a cold start and
    /// `next_question` for host-driven advances; both carry the same payload
    /// and receive identical treatment.
    #[serde(rename = "new_question", alias = "next_question")]
    NewQuestion { question: QuestionPayload },

    /// Vote state for the active question changed.
    #[serde(rename = "vote_update")]
    VoteUpdate(VoteTallyPayload),

    /// The current question was closed (boxed to reduce enum size).
    #[serde(rename = "question_ended")]
    QuestionEnded(Box<QuestionResultPayload>),

    /// The game reached its terminal state.
    #[serde(rename = "game_finished")]
    GameFinished(GameResultPayload),

    /// Full replacement roster for a group. Never an incremental patch.
    #[serde(rename = "online_users_update")]
    OnlineUsersUpdate {
        group_id: GroupId,
        users: Vec<OnlineUser>,
    },

    /// A chat message relayed to the group channel.
    #[serde(rename = "chat_message")]
    ChatMessage(ChatMessagePayload),

    /// Any envelope type this client version does not know about.
    #[serde(other)]
    Unknown,
}

// ── Snapshot DTOs (REST reads) ──────────────────────────────────────

/// Point-in-time session metadata from `GET sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub subject_name: String,
    /// The participant authorized to issue game-control commands.
    pub host_id: ParticipantId,
    pub status: SessionStatus,
}

/// Point-in-time game state from `GET sessions/{id}/game`.
///
/// Score fields may be present but are only honored when no local view
/// exists yet; an existing view's scores are push-event-owned and a poll
/// never overwrites them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameStateSnapshot {
    pub status: SessionStatus,
    pub current_question_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_flashcard_id: Option<FlashcardId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_possible_score: Option<u32>,
    /// Latest vote per participant; present only while a question is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<BTreeMap<ParticipantId, AnswerId>>,
}

/// The authenticated user's identity from `GET users/me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: ParticipantId,
    pub username: String,
}
