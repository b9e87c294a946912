#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Protocol serialization tests for the Quizcast client.
//!
//! Verifies the `{ "type": ..., ...payload }` envelope shape, round-trip
//! serialization of every envelope variant, the `next_question` alias, the
//! forward-compatible `Unknown` fallback, and raw JSON fixtures matching
//! real server output.

use std::collections::BTreeMap;

use quizcast_client::protocol::{
    AnswerOption, ChatMessagePayload, ClientEnvelope, GameOutcome, GameResultPayload,
    GameStartedPayload, GameStateSnapshot, OnlineUser, QuestionPayload, QuestionResultPayload,
    ServerEnvelope, SessionSnapshot, SessionStatus, UserIdentity, VoteTallyPayload,
};
use uuid::Uuid;

fn round_trip<T: serde::Serialize + serde::de::DeserializeOwned>(val: &T) -> T {
    let json = serde_json::to_string(val).expect("serialize");
    serde_json::from_str(&json).expect("deserialize")
}

fn test_uuid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn sample_question() -> QuestionPayload {
    QuestionPayload {
        flashcard_id: test_uuid(0x100),
        question_text: "Which year did the wall fall?".into(),
        question_index: 2,
        total_questions: 5,
        answers: vec![
            AnswerOption {
                id: test_uuid(1),
                text: "1987".into(),
            },
            AnswerOption {
                id: test_uuid(2),
                text: "1989".into(),
            },
        ],
    }
}

// ════════════════════════════════════════════════════════════════════
// ClientEnvelope
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_game_wire_shape_is_flat() {
    let envelope = ClientEnvelope::JoinGame {
        session_id: test_uuid(7),
    };
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["type"], "join_game");
    assert_eq!(
        value["session_id"],
        "00000000-0000-0000-0000-000000000007"
    );
    // The payload sits next to the tag, not inside a wrapper object.
    assert_eq!(value.as_object().unwrap().len(), 2);
}

#[test]
fn group_envelopes_round_trip() {
    let join = round_trip(&ClientEnvelope::JoinGroup {
        group_id: test_uuid(9),
    });
    assert_eq!(
        join,
        ClientEnvelope::JoinGroup {
            group_id: test_uuid(9)
        }
    );

    let leave = round_trip(&ClientEnvelope::LeaveGroup {
        group_id: test_uuid(9),
    });
    assert_eq!(
        leave,
        ClientEnvelope::LeaveGroup {
            group_id: test_uuid(9)
        }
    );
}

// ════════════════════════════════════════════════════════════════════
// ServerEnvelope
// ════════════════════════════════════════════════════════════════════

#[test]
fn game_started_round_trip() {
    let envelope = ServerEnvelope::GameStarted(Box::new(GameStartedPayload {
        session_id: test_uuid(7),
        question: sample_question(),
        total_score: 0,
        max_possible_score: 500,
    }));
    let deser = round_trip(&envelope);
    if let ServerEnvelope::GameStarted(payload) = deser {
        assert_eq!(payload.max_possible_score, 500);
        assert_eq!(payload.question.question_index, 2);
        assert_eq!(payload.question.answers.len(), 2);
    } else {
        panic!("expected GameStarted variant");
    }
}

#[test]
fn game_started_fixture_parses() {
    let json = r#"{
        "type": "game_started",
        "session_id": "00000000-0000-0000-0000-0000000000a5",
        "question": {
            "flashcard_id": "00000000-0000-0000-0000-000000000100",
            "question_text": "2 + 2?",
            "question_index": 0,
            "total_questions": 3,
            "answers": [
                {"id": "00000000-0000-0000-0000-000000000001", "text": "4"},
                {"id": "00000000-0000-0000-0000-000000000002", "text": "5"}
            ]
        },
        "max_possible_score": 300
    }"#;
    let envelope: ServerEnvelope = serde_json::from_str(json).unwrap();
    if let ServerEnvelope::GameStarted(payload) = envelope {
        assert_eq!(payload.total_score, 0, "omitted total_score defaults to 0");
        assert_eq!(payload.question.total_questions, 3);
    } else {
        panic!("expected GameStarted variant");
    }
}

#[test]
fn new_question_and_next_question_are_equivalent() {
    let new_json = serde_json::json!({
        "type": "new_question",
        "question": sample_question(),
    })
    .to_string();
    let next_json = new_json.replace("new_question", "next_question");

    let a: ServerEnvelope = serde_json::from_str(&new_json).unwrap();
    let b: ServerEnvelope = serde_json::from_str(&next_json).unwrap();
    assert!(matches!(a, ServerEnvelope::NewQuestion { .. }));
    assert_eq!(a, b, "both wire names map to the same variant");
}

#[test]
fn vote_update_round_trip_keeps_maps() {
    let mut votes = BTreeMap::new();
    votes.insert(test_uuid(10), test_uuid(1));
    votes.insert(test_uuid(11), test_uuid(2));
    let mut counts = BTreeMap::new();
    counts.insert(test_uuid(1), 1u32);
    counts.insert(test_uuid(2), 1u32);

    let envelope = ServerEnvelope::VoteUpdate(VoteTallyPayload {
        flashcard_id: test_uuid(0x100),
        votes,
        counts,
    });
    let deser = round_trip(&envelope);
    if let ServerEnvelope::VoteUpdate(payload) = deser {
        assert_eq!(payload.votes.len(), 2);
        assert_eq!(payload.counts[&test_uuid(2)], 1);
    } else {
        panic!("expected VoteUpdate variant");
    }
}

#[test]
fn vote_update_fixture_with_empty_maps() {
    let json = r#"{"type":"vote_update","flashcard_id":"00000000-0000-0000-0000-000000000100"}"#;
    let envelope: ServerEnvelope = serde_json::from_str(json).unwrap();
    if let ServerEnvelope::VoteUpdate(payload) = envelope {
        assert!(payload.votes.is_empty());
        assert!(payload.counts.is_empty());
    } else {
        panic!("expected VoteUpdate variant");
    }
}

#[test]
fn question_ended_round_trip() {
    let envelope = ServerEnvelope::QuestionEnded(Box::new(QuestionResultPayload {
        flashcard_id: test_uuid(0x100),
        correct_answer_id: test_uuid(1),
        winning_answer_id: None,
        was_correct: false,
        points_earned: 0,
        total_score: 200,
        points_per_question: 100,
    }));
    let json = serde_json::to_string(&envelope).unwrap();
    assert!(
        !json.contains("winning_answer_id"),
        "absent winner is omitted from the wire"
    );
    let deser: ServerEnvelope = serde_json::from_str(&json).unwrap();
    if let ServerEnvelope::QuestionEnded(payload) = deser {
        assert_eq!(payload.winning_answer_id, None);
        assert_eq!(payload.total_score, 200);
    } else {
        panic!("expected QuestionEnded variant");
    }
}

#[test]
fn game_finished_fixture_parses() {
    let json = r#"{
        "type": "game_finished",
        "total_score": 400,
        "max_possible_score": 500,
        "percentage": 80.0,
        "status": "won"
    }"#;
    let envelope: ServerEnvelope = serde_json::from_str(json).unwrap();
    if let ServerEnvelope::GameFinished(result) = envelope {
        assert_eq!(result.total_score, 400);
        assert_eq!(result.percentage, 80.0);
        assert_eq!(result.status, GameOutcome::Won);
    } else {
        panic!("expected GameFinished variant");
    }
}

#[test]
fn game_outcome_is_snake_case() {
    assert_eq!(serde_json::to_string(&GameOutcome::Won).unwrap(), r#""won""#);
    assert_eq!(
        serde_json::to_string(&GameOutcome::Lost).unwrap(),
        r#""lost""#
    );
}

#[test]
fn session_status_is_snake_case() {
    assert_eq!(
        serde_json::to_string(&SessionStatus::QuestionEnded).unwrap(),
        r#""question_ended""#
    );
    let status: SessionStatus = serde_json::from_str(r#""waiting""#).unwrap();
    assert_eq!(status, SessionStatus::Waiting);
}

#[test]
fn roster_and_chat_round_trip() {
    let roster = ServerEnvelope::OnlineUsersUpdate {
        group_id: test_uuid(5),
        users: vec![OnlineUser {
            id: test_uuid(1),
            username: "alice".into(),
        }],
    };
    let deser = round_trip(&roster);
    if let ServerEnvelope::OnlineUsersUpdate { users, .. } = deser {
        assert_eq!(users[0].username, "alice");
    } else {
        panic!("expected OnlineUsersUpdate variant");
    }

    let chat = ServerEnvelope::ChatMessage(ChatMessagePayload {
        group_id: test_uuid(5),
        sender_id: test_uuid(1),
        sender_name: "alice".into(),
        text: "gg".into(),
        sent_at: Some("2025-03-01T12:00:00Z".into()),
    });
    let deser = round_trip(&chat);
    if let ServerEnvelope::ChatMessage(message) = deser {
        assert_eq!(message.text, "gg");
        assert_eq!(message.sent_at.as_deref(), Some("2025-03-01T12:00:00Z"));
    } else {
        panic!("expected ChatMessage variant");
    }
}

#[test]
fn unknown_envelope_types_fall_through() {
    for json in [
        r#"{"type":"server_maintenance","at":"soon"}"#,
        r#"{"type":"reactions_enabled"}"#,
    ] {
        let envelope: ServerEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope, ServerEnvelope::Unknown);
    }
}

#[test]
fn missing_type_is_an_error() {
    let result = serde_json::from_str::<ServerEnvelope>(r#"{"session_id":"x"}"#);
    assert!(result.is_err());
}

// ════════════════════════════════════════════════════════════════════
// Snapshot DTOs
// ════════════════════════════════════════════════════════════════════

#[test]
fn session_snapshot_fixture_parses() {
    let json = r#"{
        "session_id": "00000000-0000-0000-0000-0000000000a5",
        "subject_name": "world history",
        "host_id": "00000000-0000-0000-0000-000000000002",
        "status": "playing"
    }"#;
    let snapshot: SessionSnapshot = serde_json::from_str(json).unwrap();
    assert_eq!(snapshot.status, SessionStatus::Playing);
    assert_eq!(snapshot.host_id, test_uuid(2));
}

#[test]
fn game_snapshot_minimal_fixture_parses() {
    // The waiting-room shape: no flashcard, no scores, no votes.
    let json = r#"{"status":"waiting","current_question_index":0}"#;
    let snapshot: GameStateSnapshot = serde_json::from_str(json).unwrap();
    assert_eq!(snapshot.status, SessionStatus::Waiting);
    assert!(snapshot.current_flashcard_id.is_none());
    assert!(snapshot.total_score.is_none());
    assert!(snapshot.votes.is_none());
}

#[test]
fn game_snapshot_with_votes_round_trips() {
    let mut votes = BTreeMap::new();
    votes.insert(test_uuid(10), test_uuid(1));
    let snapshot = GameStateSnapshot {
        status: SessionStatus::Playing,
        current_question_index: 3,
        current_flashcard_id: Some(test_uuid(0x103)),
        total_score: Some(300),
        max_possible_score: Some(500),
        votes: Some(votes),
    };
    let deser = round_trip(&snapshot);
    assert_eq!(deser, snapshot);
}

#[test]
fn user_identity_round_trips() {
    let identity = UserIdentity {
        id: test_uuid(1),
        username: "alice".into(),
    };
    assert_eq!(round_trip(&identity), identity);
}

#[test]
fn game_result_survives_round_trip() {
    let result = GameResultPayload {
        total_score: 400,
        max_possible_score: 500,
        percentage: 80.0,
        status: GameOutcome::Lost,
    };
    let deser = round_trip(&result);
    assert_eq!(deser, result);
}

#[test]
fn is_last_question_boundary() {
    let mut question = sample_question();
    question.question_index = 4;
    question.total_questions = 5;
    assert!(question.is_last());
    question.question_index = 3;
    assert!(!question.is_last());
}
