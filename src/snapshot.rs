//! The snapshot fetcher contract: polled, point-in-time reads.
//!
//! [`SnapshotApi`] is the seam between the reconciliation loop and the
//! Quizcast REST API. The session loop only ever *reads* through it — seeding
//! the store on mount and refreshing it on demand — and every result passes
//! through the field-scoped merge in [`view`](crate::view), so a late
//! response can never corrupt push-owned state.
//!
//! The production implementation is [`RestClient`](crate::rest::RestClient)
//! (feature `rest-client`); tests substitute a scripted mock.

use async_trait::async_trait;

use crate::error::QuizcastError;
use crate::protocol::{
    GameStateSnapshot, GroupId, OnlineUser, SessionId, SessionSnapshot, UserIdentity,
};

/// Read operations against the Quizcast REST API.
///
/// # Errors
///
/// Implementations map a `403` response to
/// [`QuizcastError::NotYetJoined`] so callers can distinguish the transient
/// auto-join race from real failures; everything else is surfaced unchanged
/// and must not crash the caller's reconciliation loop.
#[async_trait]
pub trait SnapshotApi: Send + Sync + 'static {
    /// Session metadata: subject, host identity, lifecycle status.
    ///
    /// Used to determine host privileges and to detect "game already
    /// playing, I haven't joined yet" races on mount.
    async fn fetch_session(&self, session_id: SessionId)
        -> Result<SessionSnapshot, QuizcastError>;

    /// The server's current question pointer and status, plus the current
    /// vote map when (and only when) a question is active.
    async fn fetch_game(&self, session_id: SessionId)
        -> Result<GameStateSnapshot, QuizcastError>;

    /// The authenticated user's identity.
    async fn fetch_identity(&self) -> Result<UserIdentity, QuizcastError>;

    /// The connected-users roster of a group (poll-mode presence).
    async fn fetch_group_roster(&self, group_id: GroupId)
        -> Result<Vec<OnlineUser>, QuizcastError>;
}
