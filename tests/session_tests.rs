#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the live-session engine.
//!
//! Each test drives a [`common::MockTransport`] envelope by envelope and
//! scripts the snapshot API, then observes the emitted [`SessionEvent`]s and
//! the reconciled state through the public handle.

mod common;

use std::time::Duration;

use common::{
    answer, game_finished_json, game_joined_json, game_started_json, mock_transport,
    next_question_json, playing_snapshot, question_ended_json, vote_update_json,
    waiting_snapshot, MockApi, ME, SESSION,
};
use quizcast_client::protocol::GameOutcome;
use quizcast_client::{
    LiveSession, SessionConfig, SessionContext, SessionEvent, SessionStatus,
};
use tokio::sync::mpsc;

fn start(
    transport: common::MockTransport,
    api: MockApi,
) -> (LiveSession, mpsc::Receiver<SessionEvent>) {
    LiveSession::start(
        transport,
        api,
        SessionContext::new(SESSION, "test-token"),
        SessionConfig::new().with_poll_retry(3, Duration::from_millis(1)),
    )
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

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

#[tokio::test]
async fn full_game_lifecycle() {
    let (transport, driver) = mock_transport();
    let (mut session, mut events) = start(transport, MockApi::new(vec![Ok(waiting_snapshot())]));

    wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;
    assert!(session.is_host().await);
    assert_eq!(
        session.view().await.unwrap().status,
        SessionStatus::Waiting
    );

    // Round one: start, votes come in, the question closes.
    driver.push(game_started_json(2, 200));
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::GameStarted { .. })).await;
    if let SessionEvent::GameStarted { question } = event {
        assert_eq!(question.question_index, 0);
        assert!(!question.is_last());
    }

    driver.push(vote_update_json(0, &[(ME, answer(1))]));
    wait_for(&mut events, |e| matches!(e, SessionEvent::TallyUpdated { .. })).await;
    let state = session.state().await;
    assert_eq!(state.my_vote, Some(answer(1)));
    assert_eq!(state.tally.count_for(&answer(1)), 1);

    driver.push(question_ended_json(0, 100, 100));
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::QuestionEnded { .. })).await;
    if let SessionEvent::QuestionEnded { result } = event {
        assert!(result.was_correct);
        assert_eq!(result.total_score, 100);
    }

    // Round two: advancing clears the per-question artifacts.
    driver.push(next_question_json(1, 2));
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::QuestionChanged { .. })
    })
    .await;
    let state = session.state().await;
    assert!(state.tally.is_empty());
    assert!(state.my_vote.is_none());
    assert!(state.result.is_none());
    assert!(state.question.as_ref().unwrap().is_last());

    driver.push(question_ended_json(1, 100, 200));
    wait_for(&mut events, |e| matches!(e, SessionEvent::QuestionEnded { .. })).await;

    // Terminal transition.
    driver.push(game_finished_json(200, 200, 100.0, true));
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::GameFinished { .. })).await;
    if let SessionEvent::GameFinished { result } = event {
        assert_eq!(result.status, GameOutcome::Won);
        assert_eq!(result.percentage, 100.0);
    }

    let state = session.state().await;
    let view = state.view.unwrap();
    assert_eq!(view.status, SessionStatus::Finished);
    assert_eq!(view.total_score, 200);
    assert!(state.question.is_none());
    assert_eq!(state.final_result.unwrap().total_score, 200);

    session.shutdown().await;
}

#[tokio::test]
async fn question_ended_then_game_finished_yields_final_result() {
    let (transport, driver) = mock_transport();
    let (mut session, mut events) = start(transport, MockApi::new(vec![]));

    wait_for(&mut events, |e| *e == SessionEvent::Connected).await;

    driver.push(game_started_json(5, 500));
    wait_for(&mut events, |e| matches!(e, SessionEvent::GameStarted { .. })).await;
    driver.push(question_ended_json(0, 100, 400));
    wait_for(&mut events, |e| matches!(e, SessionEvent::QuestionEnded { .. })).await;
    driver.push(game_finished_json(400, 500, 80.0, true));
    wait_for(&mut events, |e| matches!(e, SessionEvent::GameFinished { .. })).await;

    let state = session.state().await;
    let result = state.final_result.unwrap();
    assert_eq!(result.total_score, 400);
    assert_eq!(result.status, GameOutcome::Won);
    assert_eq!(state.view.unwrap().status, SessionStatus::Finished);

    session.shutdown().await;
}

#[tokio::test]
async fn reconnect_mid_question_bootstraps_then_defers_to_snapshot() {
    // Every seed poll loses the auto-join race, so no view exists when the
    // question result lands.
    let api = MockApi::new(vec![
        Err(quizcast_client::QuizcastError::NotYetJoined),
        Err(quizcast_client::QuizcastError::NotYetJoined),
        Err(quizcast_client::QuizcastError::NotYetJoined),
        Ok(playing_snapshot(2)),
    ]);
    let (transport, driver) = mock_transport();
    let (mut session, mut events) = start(transport, api);

    wait_for(&mut events, |e| matches!(e, SessionEvent::SnapshotFailed { .. })).await;

    driver.push(question_ended_json(3, 100, 400));
    wait_for(&mut events, |e| matches!(e, SessionEvent::QuestionEnded { .. })).await;

    let view = session.view().await.unwrap();
    assert_eq!(view.status, SessionStatus::QuestionEnded);
    assert_eq!(view.total_score, 400);
    assert_eq!(view.current_question_index, 4, "best-effort guess from the score");
    assert_eq!(view.max_possible_score, None);

    // The join confirmation triggers a poll; the authoritative snapshot
    // replaces the guessed pointer fields but not the score.
    driver.push(game_joined_json());
    wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;

    let view = session.view().await.unwrap();
    assert_eq!(view.current_question_index, 2);
    assert_eq!(view.status, SessionStatus::Playing);
    assert_eq!(view.total_score, 400);

    session.shutdown().await;
}

#[tokio::test]
async fn participant_is_not_host() {
    let (transport, _driver) = mock_transport();
    let (mut session, mut events) = start(
        transport,
        MockApi::new(vec![Ok(waiting_snapshot())]).with_other_host(),
    );

    wait_for(&mut events, |e| *e == SessionEvent::ViewRefreshed).await;
    assert!(!session.is_host().await);
    let state = session.state().await;
    assert_eq!(state.me, Some(ME));
    assert_ne!(state.host_id, state.me);

    session.shutdown().await;
}

#[tokio::test]
async fn transport_error_surfaces_reason_and_ends_stream() {
    let (transport, driver) = mock_transport();
    let (_session, mut events) = start(transport, MockApi::new(vec![]));

    wait_for(&mut events, |e| *e == SessionEvent::Connected).await;
    driver.fail("connection reset");

    let event = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Disconnected { .. })
    })
    .await;
    if let SessionEvent::Disconnected { reason } = event {
        assert!(reason.unwrap().contains("connection reset"));
    }

    // The loop exited; the channel drains to None.
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn vote_events_keep_arrival_order() {
    let (transport, driver) = mock_transport();
    let (mut session, mut events) = start(transport, MockApi::new(vec![]));

    wait_for(&mut events, |e| *e == SessionEvent::Connected).await;
    driver.push(game_started_json(5, 500));
    wait_for(&mut events, |e| matches!(e, SessionEvent::GameStarted { .. })).await;

    // Two tallies in quick succession: the second must win wholesale.
    driver.push(vote_update_json(0, &[(ME, answer(1)), (common::OTHER_HOST, answer(1))]));
    driver.push(vote_update_json(0, &[(ME, answer(2))]));

    wait_for(&mut events, |e| matches!(e, SessionEvent::TallyUpdated { .. })).await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::TallyUpdated { .. })).await;

    let state = session.state().await;
    assert_eq!(state.tally.voter_count(), 1);
    assert_eq!(state.tally.count_for(&answer(2)), 1);
    assert_eq!(state.tally.count_for(&answer(1)), 0);
    assert_eq!(state.my_vote, Some(answer(2)));

    session.shutdown().await;
}
