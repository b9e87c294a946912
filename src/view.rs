//! The reconciling state store for a live session.
//!
//! One [`GameState`] exists per mounted session. It is fed from two
//! independent, asynchronously-arriving sources of truth — polled REST
//! snapshots and pushed channel envelopes — and guarantees that authoritative
//! game progress is never corrupted by a stale or out-of-order read.
//!
//! The rule that makes this safe is field ownership: `total_score` and
//! `max_possible_score` belong to the push channel and are written only by
//! the event dispatcher. A snapshot merge may refresh the question pointer,
//! the flashcard id, and the status — nothing else — so a poll response
//! delivered after a newer push event cannot roll the score back.

use std::collections::BTreeMap;

use crate::protocol::{
    AnswerId, FlashcardId, GameResultPayload, GameStateSnapshot, ParticipantId, QuestionPayload,
    QuestionResultPayload, SessionSnapshot, SessionStatus, UserIdentity, VoteTallyPayload,
};

// ── GameView ────────────────────────────────────────────────────────

/// The client's authoritative picture of game progress.
///
/// Owned exclusively by the state store; the dispatcher is its single writer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameView {
    pub status: SessionStatus,
    /// Monotonically non-decreasing while the game is not finished.
    pub current_question_index: u32,
    pub current_flashcard_id: Option<FlashcardId>,
    /// Monotonically non-decreasing for the lifetime of the session.
    /// Push-event-owned: a snapshot merge never writes this field.
    pub total_score: u32,
    /// Set once by the first authoritative score-bearing push event and never
    /// altered afterwards. `None` only before that event has been seen.
    pub max_possible_score: Option<u32>,
}

impl GameView {
    /// Build the initial view from a polled snapshot.
    ///
    /// This is the only point where snapshot-borne score fields are honored;
    /// once a view exists, scores are push-event-owned.
    pub fn from_snapshot(snapshot: &GameStateSnapshot) -> Self {
        Self {
            status: snapshot.status,
            current_question_index: snapshot.current_question_index,
            current_flashcard_id: snapshot.current_flashcard_id,
            total_score: snapshot.total_score.unwrap_or(0),
            max_possible_score: snapshot.max_possible_score,
        }
    }

    /// Field-scoped merge of a polled snapshot into an existing view.
    ///
    /// Refreshes the idempotent pointer fields and nothing more. The poll may
    /// race an in-flight score update, so the accumulator fields stay
    /// untouched regardless of what the snapshot reports.
    pub fn merge_snapshot(&mut self, snapshot: &GameStateSnapshot) {
        self.current_question_index = snapshot.current_question_index;
        self.current_flashcard_id = snapshot.current_flashcard_id;
        self.status = snapshot.status;
    }

    /// Fold a score reported by a `question_ended`/`game_finished` envelope
    /// into the view. Non-decreasing, and capped once the maximum is known.
    pub(crate) fn apply_score(&mut self, reported: u32) {
        let mut next = self.total_score.max(reported);
        if let Some(cap) = self.max_possible_score {
            next = next.min(cap);
        }
        self.total_score = next;
    }

    /// Install the score cap from the first authoritative score event.
    /// Later calls are ignored — the cap is written exactly once.
    pub(crate) fn set_score_cap(&mut self, cap: u32) {
        if self.max_possible_score.is_none() {
            self.max_possible_score = Some(cap);
            self.total_score = self.total_score.min(cap);
        }
    }
}

// ── VoteTally ───────────────────────────────────────────────────────

/// Vote state for the active question.
///
/// Keeps the latest vote per participant plus the per-answer counts. The two
/// maps are kept consistent by construction: pushes replace the tally
/// wholesale with server-computed counts, and the poll path derives counts
/// locally from the participant map. Resubmitting the same vote is
/// idempotent — each participant is counted exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoteTally {
    votes: BTreeMap<ParticipantId, AnswerId>,
    counts: BTreeMap<AnswerId, u32>,
}

impl VoteTally {
    /// An empty tally, as installed on every question transition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wholesale replacement from a pushed `vote_update` payload.
    /// Counts are taken verbatim — the server computed them.
    pub fn from_payload(payload: &VoteTallyPayload) -> Self {
        Self {
            votes: payload.votes.clone(),
            counts: payload.counts.clone(),
        }
    }

    /// Build a tally from a polled participant→answer map, deriving counts
    /// locally. Used when recovering mid-question from a snapshot.
    pub fn from_votes(votes: BTreeMap<ParticipantId, AnswerId>) -> Self {
        let mut counts: BTreeMap<AnswerId, u32> = BTreeMap::new();
        for answer in votes.values() {
            *counts.entry(*answer).or_insert(0) += 1;
        }
        Self { votes, counts }
    }

    /// Latest vote cast by a participant, if any.
    pub fn vote_of(&self, participant: &ParticipantId) -> Option<AnswerId> {
        self.votes.get(participant).copied()
    }

    /// Current count for one answer.
    pub fn count_for(&self, answer: &AnswerId) -> u32 {
        self.counts.get(answer).copied().unwrap_or(0)
    }

    /// Per-answer counts, for rendering.
    pub fn counts(&self) -> &BTreeMap<AnswerId, u32> {
        &self.counts
    }

    /// Number of participants that have voted.
    pub fn voter_count(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty() && self.counts.is_empty()
    }
}

// ── GameState ───────────────────────────────────────────────────────

/// Everything the store tracks for one mounted session.
///
/// Single writer (the session loop's dispatcher), arbitrarily many readers
/// via cloned-out copies.
#[derive(Debug, Clone, Default)]
pub struct GameState {
    /// Authoritative game progress; `None` until seeded by a snapshot or a
    /// `game_started` envelope.
    pub view: Option<GameView>,
    /// The in-flight question, replaced wholesale per transition.
    pub question: Option<QuestionPayload>,
    /// Vote state for the in-flight question.
    pub tally: VoteTally,
    /// This client's own latest vote, cleared on every question transition.
    pub my_vote: Option<AnswerId>,
    /// Result of the most recently closed question.
    pub result: Option<QuestionResultPayload>,
    /// Terminal result, present once the game finished.
    pub final_result: Option<GameResultPayload>,
    /// The authenticated user, once known.
    pub me: Option<ParticipantId>,
    /// The session host, once known from the session snapshot.
    pub host_id: Option<ParticipantId>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the local user is authorized to issue game-control commands.
    /// `false` until both identities are known.
    pub fn is_host(&self) -> bool {
        matches!((self.me, self.host_id), (Some(me), Some(host)) if me == host)
    }

    /// Record the authenticated user's identity.
    pub fn set_identity(&mut self, identity: &UserIdentity) {
        self.me = Some(identity.id);
    }

    /// Fold session metadata from a polled session snapshot.
    pub fn seed_session(&mut self, snapshot: &SessionSnapshot) {
        self.host_id = Some(snapshot.host_id);
    }

    /// Fold a polled game snapshot into the store.
    ///
    /// The view merge is field-scoped per the ownership rule. The snapshot's
    /// vote map is installed only when the store has no live tally — a push
    /// `vote_update` is strictly fresher than any poll, so a non-empty tally
    /// is never replaced by a polled one.
    pub fn merge_game_snapshot(&mut self, snapshot: &GameStateSnapshot) {
        match &mut self.view {
            Some(view) => view.merge_snapshot(snapshot),
            None => self.view = Some(GameView::from_snapshot(snapshot)),
        }

        if let Some(votes) = &snapshot.votes {
            if self.tally.is_empty() {
                self.tally = VoteTally::from_votes(votes.clone());
                if let Some(me) = self.me {
                    self.my_vote = self.tally.vote_of(&me);
                }
            }
        }
    }

    /// Drop all per-question artifacts. Called on every question transition.
    pub(crate) fn clear_question_artifacts(&mut self) {
        self.tally = VoteTally::new();
        self.my_vote = None;
        self.result = None;
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
    use uuid::Uuid;

    fn snapshot(status: SessionStatus, index: u32) -> GameStateSnapshot {
        GameStateSnapshot {
            status,
            current_question_index: index,
            current_flashcard_id: Some(Uuid::from_u128(7)),
            total_score: None,
            max_possible_score: None,
            votes: None,
        }
    }

    #[test]
    fn initial_view_honors_snapshot_scores() {
        let mut snap = snapshot(SessionStatus::Playing, 2);
        snap.total_score = Some(200);
        snap.max_possible_score = Some(500);

        let view = GameView::from_snapshot(&snap);
        assert_eq!(view.total_score, 200);
        assert_eq!(view.max_possible_score, Some(500));
        assert_eq!(view.current_question_index, 2);
    }

    #[test]
    fn merge_never_touches_scores() {
        let mut view = GameView {
            status: SessionStatus::Playing,
            current_question_index: 3,
            current_flashcard_id: None,
            total_score: 300,
            max_possible_score: Some(500),
        };

        // A stale snapshot that disagrees on every field, scores included.
        let mut snap = snapshot(SessionStatus::Waiting, 0);
        snap.total_score = Some(0);
        snap.max_possible_score = Some(100);

        view.merge_snapshot(&snap);
        assert_eq!(view.status, SessionStatus::Waiting);
        assert_eq!(view.current_question_index, 0);
        assert_eq!(view.total_score, 300, "total_score is push-event-owned");
        assert_eq!(view.max_possible_score, Some(500));
    }

    #[test]
    fn apply_score_is_monotonic() {
        let mut view = GameView {
            max_possible_score: Some(500),
            total_score: 300,
            ..GameView::default()
        };
        view.apply_score(200); // stale, lower report
        assert_eq!(view.total_score, 300);
        view.apply_score(400);
        assert_eq!(view.total_score, 400);
    }

    #[test]
    fn apply_score_respects_cap() {
        let mut view = GameView {
            max_possible_score: Some(500),
            ..GameView::default()
        };
        view.apply_score(700);
        assert_eq!(view.total_score, 500);
    }

    #[test]
    fn score_cap_is_written_once() {
        let mut view = GameView::default();
        view.set_score_cap(500);
        view.set_score_cap(900);
        assert_eq!(view.max_possible_score, Some(500));
    }

    #[test]
    fn late_cap_clamps_bootstrap_total() {
        let mut view = GameView {
            total_score: 600,
            ..GameView::default()
        };
        view.set_score_cap(500);
        assert_eq!(view.total_score, 500);
    }

    #[test]
    fn tally_from_votes_derives_counts() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let mut votes = BTreeMap::new();
        votes.insert(Uuid::from_u128(10), a);
        votes.insert(Uuid::from_u128(11), a);
        votes.insert(Uuid::from_u128(12), b);

        let tally = VoteTally::from_votes(votes);
        assert_eq!(tally.count_for(&a), 2);
        assert_eq!(tally.count_for(&b), 1);
        assert_eq!(tally.voter_count(), 3);
    }

    #[test]
    fn resubmitted_vote_counts_once() {
        let answer = Uuid::from_u128(1);
        let participant = Uuid::from_u128(10);

        // The participant map can only hold one entry per voter, so casting
        // the same answer twice produces an identical tally.
        let mut votes = BTreeMap::new();
        votes.insert(participant, answer);
        let first = VoteTally::from_votes(votes.clone());
        votes.insert(participant, answer);
        let second = VoteTally::from_votes(votes);

        assert_eq!(first, second);
        assert_eq!(second.count_for(&answer), 1);
    }

    #[test]
    fn payload_replaces_tally_wholesale() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        let mut payload = VoteTallyPayload {
            flashcard_id: Uuid::from_u128(7),
            ..VoteTallyPayload::default()
        };
        payload.counts.insert(a, 2);
        payload.counts.insert(b, 1);
        let tally = VoteTally::from_payload(&payload);
        assert_eq!(tally.count_for(&a), 2);

        // A later payload with different counts replaces, never adds.
        payload.counts.insert(a, 1);
        payload.counts.insert(b, 2);
        let tally = VoteTally::from_payload(&payload);
        assert_eq!(tally.count_for(&a), 1);
        assert_eq!(tally.count_for(&b), 2);
    }

    #[test]
    fn poll_tally_does_not_clobber_live_tally() {
        let answer = Uuid::from_u128(1);
        let voter = Uuid::from_u128(10);

        let mut state = GameState::new();
        let mut payload = VoteTallyPayload::default();
        payload.votes.insert(voter, answer);
        payload.counts.insert(answer, 1);
        state.tally = VoteTally::from_payload(&payload);

        let mut snap = snapshot(SessionStatus::Playing, 0);
        snap.votes = Some(BTreeMap::new()); // stale poll: empty vote map

        state.merge_game_snapshot(&snap);
        assert_eq!(state.tally.count_for(&answer), 1);
    }

    #[test]
    fn poll_tally_seeds_empty_store_and_own_vote() {
        let answer = Uuid::from_u128(1);
        let me = Uuid::from_u128(10);

        let mut state = GameState::new();
        state.me = Some(me);

        let mut votes = BTreeMap::new();
        votes.insert(me, answer);
        let mut snap = snapshot(SessionStatus::Playing, 0);
        snap.votes = Some(votes);

        state.merge_game_snapshot(&snap);
        assert_eq!(state.tally.count_for(&answer), 1);
        assert_eq!(state.my_vote, Some(answer));
    }

    #[test]
    fn host_detection_needs_both_identities() {
        let host = Uuid::from_u128(1);
        let mut state = GameState::new();
        assert!(!state.is_host());

        state.host_id = Some(host);
        assert!(!state.is_host());

        state.me = Some(host);
        assert!(state.is_host());

        state.me = Some(Uuid::from_u128(2));
        assert!(!state.is_host());
    }
}
