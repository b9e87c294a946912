//! Typed events emitted to consumers.
//!
//! The session and group loops translate every useful [`ServerEnvelope`]
//! into one of these events and emit it on the bounded channel returned from
//! `start`. Synthetic lifecycle events (`Connected`, `Disconnected`,
//! `ViewRefreshed`, `SnapshotFailed`) have no wire counterpart.

use crate::protocol::{
    ChatMessagePayload, GameResultPayload, OnlineUser, QuestionPayload, QuestionResultPayload,
    ServerEnvelope, SessionId, VoteTallyPayload,
};

/// Events emitted by a live game session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport is open and the join envelope was sent.
    Connected,
    /// The server confirmed this client's membership in the session.
    Joined { session_id: SessionId },
    /// The host started the game; the first question is in flight.
    GameStarted { question: QuestionPayload },
    /// A new question replaced the current one.
    QuestionChanged { question: QuestionPayload },
    /// The vote tally for the active question changed.
    TallyUpdated { tally: VoteTallyPayload },
    /// The current question was closed.
    QuestionEnded { result: QuestionResultPayload },
    /// The game reached its terminal state.
    GameFinished { result: GameResultPayload },
    /// A snapshot poll completed and was merged into the store. Re-read the
    /// state through the session handle to render.
    ViewRefreshed,
    /// A snapshot poll failed after retries. Recoverable: live updates keep
    /// flowing and the next refresh may succeed.
    SnapshotFailed { reason: String },
    /// A group roster rode in on this connection (full replacement list).
    RosterReplaced { users: Vec<OnlineUser> },
    /// A chat message rode in on this connection.
    Chat { message: ChatMessagePayload },
    /// The transport closed. Always the final event on the channel.
    Disconnected { reason: Option<String> },
}

impl SessionEvent {
    /// Map a server envelope to its consumer-facing event.
    ///
    /// Returns `None` for envelopes with no event counterpart
    /// ([`ServerEnvelope::Unknown`]).
    pub(crate) fn from_envelope(envelope: ServerEnvelope) -> Option<Self> {
        match envelope {
            ServerEnvelope::GameJoined { session_id } => Some(Self::Joined { session_id }),
            ServerEnvelope::GameStarted(payload) => Some(Self::GameStarted {
                question: payload.question,
            }),
            ServerEnvelope::NewQuestion { question } => Some(Self::QuestionChanged { question }),
            ServerEnvelope::VoteUpdate(tally) => Some(Self::TallyUpdated { tally }),
            ServerEnvelope::QuestionEnded(result) => Some(Self::QuestionEnded { result: *result }),
            ServerEnvelope::GameFinished(result) => Some(Self::GameFinished { result }),
            ServerEnvelope::OnlineUsersUpdate { users, .. } => {
                Some(Self::RosterReplaced { users })
            }
            ServerEnvelope::ChatMessage(message) => Some(Self::Chat { message }),
            ServerEnvelope::Unknown => None,
        }
    }
}

/// Events emitted by a group presence channel (push mode) or roster poller
/// (poll mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// The transport is open and the group was joined.
    Connected,
    /// Authoritative full-roster replacement for the group.
    RosterReplaced { users: Vec<OnlineUser> },
    /// A chat message relayed to the group.
    Chat { message: ChatMessagePayload },
    /// The transport closed. Always the final event on the channel.
    Disconnected { reason: Option<String> },
}

impl GroupEvent {
    /// Map a server envelope to its group-facing event; game envelopes do
    /// not occur on group channels and map to `None`.
    pub(crate) fn from_envelope(envelope: ServerEnvelope) -> Option<Self> {
        match envelope {
            ServerEnvelope::OnlineUsersUpdate { users, .. } => {
                Some(Self::RosterReplaced { users })
            }
            ServerEnvelope::ChatMessage(message) => Some(Self::Chat { message }),
            _ => None,
        }
    }
}
