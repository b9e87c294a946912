//! The event dispatcher: a pure reducer over channel envelopes.
//!
//! [`step`] folds exactly one inbound [`ServerEnvelope`] into a
//! [`GameState`]. It performs no I/O and never blocks, which keeps the whole
//! state machine unit-testable without any network mocking. The session loop
//! calls it for every delivery, in arrival order, so reductions are
//! deterministic.
//!
//! Game progress moves `waiting → playing → question_ended → playing → … →
//! finished`; `finished` is terminal. Envelopes that fail their precondition
//! are logged and dropped — receiving one means the server and client
//! disagree about the phase, and the next snapshot refresh resolves that.

use tracing::{debug, warn};

use crate::protocol::{ServerEnvelope, SessionStatus};
use crate::view::{GameState, GameView, VoteTally};

/// Follow-up work a reduction asks the session loop to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEffect {
    /// Nothing beyond the state change itself.
    None,
    /// Schedule a fresh game-snapshot poll. Emitted for `game_joined`, which
    /// confirms membership but carries no game state — the poll bridges races
    /// where the server auto-joined this client after the game started.
    RefreshSnapshot,
}

/// Fold one envelope into the state. Returns the follow-up effect.
pub fn step(state: &mut GameState, envelope: &ServerEnvelope) -> StepEffect {
    match envelope {
        ServerEnvelope::GameJoined { session_id } => {
            debug!(%session_id, "join confirmed, requesting snapshot refresh");
            StepEffect::RefreshSnapshot
        }

        ServerEnvelope::GameStarted(payload) => {
            let startable = match &state.view {
                None => true,
                Some(view) => view.status == SessionStatus::Waiting,
            };
            if !startable {
                warn!(status = ?state.view.as_ref().map(|v| v.status), "dropping game_started: game already in progress");
                return StepEffect::None;
            }

            state.view = Some(GameView {
                status: SessionStatus::Playing,
                current_question_index: payload.question.question_index,
                current_flashcard_id: Some(payload.question.flashcard_id),
                total_score: payload.total_score,
                max_possible_score: Some(payload.max_possible_score),
            });
            state.question = Some(payload.question.clone());
            state.clear_question_artifacts();
            state.final_result = None;
            debug!(
                question_index = payload.question.question_index,
                total_questions = payload.question.total_questions,
                "game started"
            );
            StepEffect::None
        }

        ServerEnvelope::NewQuestion { question } => {
            let Some(view) = &mut state.view else {
                warn!("dropping question transition: no game view");
                return StepEffect::None;
            };
            if !matches!(
                view.status,
                SessionStatus::Playing | SessionStatus::QuestionEnded
            ) {
                warn!(status = ?view.status, "dropping question transition: game not running");
                return StepEffect::None;
            }

            view.status = SessionStatus::Playing;
            view.current_question_index = question.question_index;
            view.current_flashcard_id = Some(question.flashcard_id);
            state.question = Some(question.clone());
            state.clear_question_artifacts();
            debug!(
                question_index = question.question_index,
                is_last = question.is_last(),
                "question replaced"
            );
            StepEffect::None
        }

        ServerEnvelope::VoteUpdate(payload) => {
            let playing = state
                .view
                .as_ref()
                .is_some_and(|v| v.status == SessionStatus::Playing);
            let Some(question) = &state.question else {
                warn!("dropping vote_update: no active question");
                return StepEffect::None;
            };
            if !playing {
                warn!("dropping vote_update: not playing");
                return StepEffect::None;
            }
            if payload.flashcard_id != question.flashcard_id {
                // A tally for an already-replaced question.
                warn!(flashcard_id = %payload.flashcard_id, "dropping vote_update for stale question");
                return StepEffect::None;
            }

            state.tally = VoteTally::from_payload(payload);
            if let Some(me) = state.me {
                state.my_vote = state.tally.vote_of(&me);
            }
            StepEffect::None
        }

        ServerEnvelope::QuestionEnded(payload) => {
            match &mut state.view {
                Some(view) => {
                    if view.status != SessionStatus::Playing {
                        warn!(status = ?view.status, "dropping question_ended: no question in flight");
                        return StepEffect::None;
                    }
                    view.apply_score(payload.total_score);
                    view.status = SessionStatus::QuestionEnded;
                }
                None => {
                    // Reconnected mid-question: rebuild a minimal view from
                    // the result alone. The completed-question count inferred
                    // from the score is a best-effort guess (wrong answers
                    // earn nothing) and the next snapshot merge replaces
                    // every non-score field.
                    let completed = match payload.points_per_question {
                        0 => 0,
                        per => payload.total_score / per,
                    };
                    state.view = Some(GameView {
                        status: SessionStatus::QuestionEnded,
                        current_question_index: completed,
                        current_flashcard_id: Some(payload.flashcard_id),
                        total_score: payload.total_score,
                        max_possible_score: None,
                    });
                    debug!(completed, "bootstrapped game view from question result");
                }
            }
            state.result = Some((**payload).clone());
            StepEffect::None
        }

        ServerEnvelope::GameFinished(payload) => {
            let view = state.view.get_or_insert_with(GameView::default);
            if view.status == SessionStatus::Finished {
                warn!("dropping game_finished: game already finished");
                return StepEffect::None;
            }

            view.set_score_cap(payload.max_possible_score);
            view.apply_score(payload.total_score);
            view.status = SessionStatus::Finished;
            view.current_flashcard_id = None;
            state.question = None;
            state.tally = VoteTally::new();
            state.my_vote = None;
            state.final_result = Some(payload.clone());
            debug!(
                total_score = payload.total_score,
                outcome = ?payload.status,
                "game finished"
            );
            StepEffect::None
        }

        // Presence and chat ride the same channel but never touch game state;
        // the event layer forwards them to the consumer.
        ServerEnvelope::OnlineUsersUpdate { group_id, users } => {
            debug!(%group_id, roster_len = users.len(), "roster update received");
            StepEffect::None
        }
        ServerEnvelope::ChatMessage(message) => {
            debug!(group_id = %message.group_id, "chat message received");
            StepEffect::None
        }

        ServerEnvelope::Unknown => {
            warn!("ignoring unknown envelope type");
            StepEffect::None
        }
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
        AnswerOption, GameOutcome, GameResultPayload, GameStartedPayload, QuestionPayload,
        QuestionResultPayload, VoteTallyPayload,
    };
    use uuid::Uuid;

    fn question(index: u32, total: u32) -> QuestionPayload {
        QuestionPayload {
            flashcard_id: Uuid::from_u128(100 + u128::from(index)),
            question_text: format!("question {index}"),
            question_index: index,
            total_questions: total,
            answers: vec![
                AnswerOption {
                    id: Uuid::from_u128(1),
                    text: "a".into(),
                },
                AnswerOption {
                    id: Uuid::from_u128(2),
                    text: "b".into(),
                },
            ],
        }
    }

    fn started(total_questions: u32, max_possible_score: u32) -> ServerEnvelope {
        ServerEnvelope::GameStarted(Box::new(GameStartedPayload {
            session_id: Uuid::from_u128(9),
            question: question(0, total_questions),
            total_score: 0,
            max_possible_score,
        }))
    }

    fn ended(index: u32, points: u32, total: u32) -> ServerEnvelope {
        let q = question(index, 5);
        ServerEnvelope::QuestionEnded(Box::new(QuestionResultPayload {
            flashcard_id: q.flashcard_id,
            correct_answer_id: Uuid::from_u128(1),
            winning_answer_id: Some(Uuid::from_u128(1)),
            was_correct: points > 0,
            points_earned: points,
            total_score: total,
            points_per_question: 100,
        }))
    }

    fn vote_update(flashcard_id: Uuid, pairs: &[(u128, u128)]) -> ServerEnvelope {
        let mut payload = VoteTallyPayload {
            flashcard_id,
            ..VoteTallyPayload::default()
        };
        for (participant, answer) in pairs {
            payload
                .votes
                .insert(Uuid::from_u128(*participant), Uuid::from_u128(*answer));
            *payload
                .counts
                .entry(Uuid::from_u128(*answer))
                .or_insert(0) += 1;
        }
        ServerEnvelope::VoteUpdate(payload)
    }

    fn playing_state() -> GameState {
        let mut state = GameState::new();
        step(&mut state, &started(5, 500));
        state
    }

    #[test]
    fn game_joined_requests_refresh_without_state_change() {
        let mut state = GameState::new();
        let effect = step(
            &mut state,
            &ServerEnvelope::GameJoined {
                session_id: Uuid::from_u128(9),
            },
        );
        assert_eq!(effect, StepEffect::RefreshSnapshot);
        assert!(state.view.is_none());
    }

    #[test]
    fn game_started_installs_initial_view() {
        let mut state = GameState::new();
        let effect = step(&mut state, &started(5, 500));
        assert_eq!(effect, StepEffect::None);

        let view = state.view.unwrap();
        assert_eq!(view.status, SessionStatus::Playing);
        assert_eq!(view.current_question_index, 0);
        assert_eq!(view.total_score, 0);
        assert_eq!(view.max_possible_score, Some(500));
        assert!(state.tally.is_empty());
        assert_eq!(state.question.unwrap().total_questions, 5);
    }

    #[test]
    fn game_started_ignored_mid_game() {
        let mut state = playing_state();
        step(&mut state, &ended(0, 100, 100));

        step(&mut state, &started(5, 900));
        let view = state.view.unwrap();
        assert_eq!(view.max_possible_score, Some(500));
        assert_eq!(view.total_score, 100);
    }

    #[test]
    fn question_transition_resets_votes_and_own_vote() {
        let mut state = playing_state();
        let flashcard = state.question.as_ref().unwrap().flashcard_id;
        state.me = Some(Uuid::from_u128(10));
        step(&mut state, &vote_update(flashcard, &[(10, 1), (11, 2)]));
        assert_eq!(state.my_vote, Some(Uuid::from_u128(1)));
        assert_eq!(state.tally.voter_count(), 2);

        step(
            &mut state,
            &ServerEnvelope::NewQuestion {
                question: question(1, 5),
            },
        );
        assert!(state.tally.is_empty());
        assert!(state.my_vote.is_none());
        assert!(state.result.is_none());
        let view = state.view.unwrap();
        assert_eq!(view.status, SessionStatus::Playing);
        assert_eq!(view.current_question_index, 1);
    }

    #[test]
    fn question_transition_requires_running_game() {
        let mut state = GameState::new();
        step(
            &mut state,
            &ServerEnvelope::NewQuestion {
                question: question(1, 5),
            },
        );
        assert!(state.view.is_none());
        assert!(state.question.is_none());
    }

    #[test]
    fn vote_update_replaces_wholesale() {
        let mut state = playing_state();
        let flashcard = state.question.as_ref().unwrap().flashcard_id;

        step(
            &mut state,
            &vote_update(flashcard, &[(10, 1), (11, 1), (12, 2)]),
        );
        assert_eq!(state.tally.count_for(&Uuid::from_u128(1)), 2);
        assert_eq!(state.tally.count_for(&Uuid::from_u128(2)), 1);

        // {A:2, B:1} then a payload saying {A:1, B:2}: replaced, not added.
        step(
            &mut state,
            &vote_update(flashcard, &[(10, 1), (11, 2), (12, 2)]),
        );
        assert_eq!(state.tally.count_for(&Uuid::from_u128(1)), 1);
        assert_eq!(state.tally.count_for(&Uuid::from_u128(2)), 2);
    }

    #[test]
    fn vote_update_for_stale_question_is_dropped() {
        let mut state = playing_state();
        step(&mut state, &vote_update(Uuid::from_u128(999), &[(10, 1)]));
        assert!(state.tally.is_empty());
    }

    #[test]
    fn vote_update_ignored_after_question_ended() {
        let mut state = playing_state();
        let flashcard = state.question.as_ref().unwrap().flashcard_id;
        step(&mut state, &ended(0, 100, 100));
        step(&mut state, &vote_update(flashcard, &[(10, 1)]));
        assert!(state.tally.is_empty());
    }

    #[test]
    fn question_ended_is_the_only_score_mutation_site() {
        let mut state = playing_state();
        step(&mut state, &ended(0, 100, 100));

        let view = state.view.as_ref().unwrap();
        assert_eq!(view.status, SessionStatus::QuestionEnded);
        assert_eq!(view.total_score, 100);
        assert_eq!(view.max_possible_score, Some(500), "cap untouched");
        assert_eq!(state.result.as_ref().unwrap().points_earned, 100);
    }

    #[test]
    fn score_is_monotonic_across_question_results() {
        let mut state = playing_state();
        let rounds = [(0, 100u32), (1, 200), (2, 200), (3, 300)];
        for (index, total) in rounds {
            step(
                &mut state,
                &ServerEnvelope::NewQuestion {
                    question: question(index, 5),
                },
            );
            step(&mut state, &ended(index, 0, total));
            let view = state.view.as_ref().unwrap();
            assert!(view.total_score <= view.max_possible_score.unwrap());
        }
        assert_eq!(state.view.unwrap().total_score, 300);
    }

    #[test]
    fn stale_question_ended_cannot_roll_score_back() {
        let mut state = playing_state();
        step(&mut state, &ended(0, 300, 300));
        step(
            &mut state,
            &ServerEnvelope::NewQuestion {
                question: question(1, 5),
            },
        );
        // A duplicate of the previous result, replayed out of order.
        step(&mut state, &ended(1, 0, 100));
        assert_eq!(state.view.unwrap().total_score, 300);
    }

    #[test]
    fn question_ended_without_view_bootstraps_best_effort() {
        let mut state = GameState::new();
        step(&mut state, &ended(3, 100, 400));

        let view = state.view.as_ref().unwrap();
        assert_eq!(view.status, SessionStatus::QuestionEnded);
        assert_eq!(view.total_score, 400);
        // 400 points at 100 per question → four completed questions.
        assert_eq!(view.current_question_index, 4);
        assert_eq!(view.max_possible_score, None, "cap unknown until a score event carries it");
        assert!(state.result.is_some());
    }

    #[test]
    fn bootstrap_guards_zero_points_per_question() {
        let mut state = GameState::new();
        let mut payload = match ended(0, 0, 0) {
            ServerEnvelope::QuestionEnded(p) => p,
            _ => unreachable!(),
        };
        payload.points_per_question = 0;
        step(&mut state, &ServerEnvelope::QuestionEnded(payload));
        assert_eq!(state.view.unwrap().current_question_index, 0);
    }

    #[test]
    fn bootstrap_view_yields_to_snapshot_for_non_score_fields() {
        let mut state = GameState::new();
        step(&mut state, &ended(3, 100, 400));

        let snap = crate::protocol::GameStateSnapshot {
            status: SessionStatus::Playing,
            current_question_index: 2,
            current_flashcard_id: None,
            total_score: Some(0),
            max_possible_score: None,
            votes: None,
        };
        state.merge_game_snapshot(&snap);

        let view = state.view.unwrap();
        assert_eq!(view.current_question_index, 2);
        assert_eq!(view.status, SessionStatus::Playing);
        assert_eq!(view.total_score, 400, "score survives the merge");
    }

    #[test]
    fn game_finished_is_terminal() {
        let mut state = playing_state();
        step(&mut state, &ended(4, 100, 400));
        step(
            &mut state,
            &ServerEnvelope::GameFinished(GameResultPayload {
                total_score: 400,
                max_possible_score: 500,
                percentage: 80.0,
                status: GameOutcome::Won,
            }),
        );

        let result = state.final_result.as_ref().unwrap();
        assert_eq!(result.total_score, 400);
        assert_eq!(result.status, GameOutcome::Won);
        let view = state.view.clone().unwrap();
        assert_eq!(view.status, SessionStatus::Finished);
        assert!(state.question.is_none());

        // Terminal: nothing moves the state afterwards.
        step(&mut state, &started(5, 900));
        step(
            &mut state,
            &ServerEnvelope::NewQuestion {
                question: question(0, 5),
            },
        );
        step(&mut state, &ended(0, 100, 500));
        assert_eq!(state.view.unwrap(), view);
    }

    #[test]
    fn game_finished_fills_missing_cap_after_bootstrap() {
        let mut state = GameState::new();
        step(&mut state, &ended(3, 100, 400));
        step(
            &mut state,
            &ServerEnvelope::GameFinished(GameResultPayload {
                total_score: 400,
                max_possible_score: 500,
                percentage: 80.0,
                status: GameOutcome::Won,
            }),
        );
        let view = state.view.unwrap();
        assert_eq!(view.max_possible_score, Some(500));
        assert_eq!(view.total_score, 400);
    }

    #[test]
    fn presence_and_unknown_envelopes_leave_state_alone() {
        let mut state = playing_state();
        let before = state.clone();

        step(
            &mut state,
            &ServerEnvelope::OnlineUsersUpdate {
                group_id: Uuid::from_u128(5),
                users: vec![],
            },
        );
        step(&mut state, &ServerEnvelope::Unknown);

        assert_eq!(state.view, before.view);
        assert_eq!(state.tally, before.tally);
        assert_eq!(state.question, before.question);
    }

    #[test]
    fn last_question_detection() {
        assert!(question(4, 5).is_last());
        assert!(!question(3, 5).is_last());
        assert!(question(0, 1).is_last());
    }
}
