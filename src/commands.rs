//! The command issuer contract: host/participant intents.
//!
//! Commands are fire-and-forget: each call sends a single idempotent-intent
//! request keyed by session id and returns once the server acknowledges it.
//! The issuer **never** mutates local state — confirmed game state arrives
//! exclusively through the real-time channel, and the command's own response
//! body is deliberately ignored for game-state purposes. A failed command is
//! surfaced as an error for the user to act on; there is no optimistic
//! update and therefore nothing to roll back.

use async_trait::async_trait;

use crate::error::QuizcastError;
use crate::protocol::{AnswerId, FlashcardId, GameResultPayload, SessionId};

/// Write operations against the Quizcast REST API.
///
/// `start_game`, `end_question`, `next_question`, and `end_game` are
/// host-only on the server side; the client surfaces the rejection as an
/// error rather than pre-checking.
#[async_trait]
pub trait CommandApi: Send + Sync + 'static {
    /// Start the game (host).
    async fn start_game(&self, session_id: SessionId) -> Result<(), QuizcastError>;

    /// Cast this participant's vote for the active question. Re-casting is
    /// idempotent: the server keeps the latest vote per participant.
    async fn cast_vote(
        &self,
        session_id: SessionId,
        flashcard_id: FlashcardId,
        answer_id: AnswerId,
    ) -> Result<(), QuizcastError>;

    /// Close voting on the active question (host).
    async fn end_question(&self, session_id: SessionId) -> Result<(), QuizcastError>;

    /// Advance to the next question (host).
    async fn next_question(&self, session_id: SessionId) -> Result<(), QuizcastError>;

    /// End the game (host).
    async fn end_game(&self, session_id: SessionId) -> Result<(), QuizcastError>;

    /// Fetch the terminal result of a finished game. The one command-side
    /// read; used by result screens mounted after the channel closed.
    async fn fetch_final_result(
        &self,
        session_id: SessionId,
    ) -> Result<GameResultPayload, QuizcastError>;
}
