//! HTTP implementation of the snapshot and command contracts.
//!
//! [`RestClient`] talks to the Quizcast REST API with `reqwest`, presenting
//! the bearer credential on every request. It implements both
//! [`SnapshotApi`] (reads) and [`CommandApi`] (writes): the two concerns
//! share a connection pool and base URL but nothing else — command responses
//! are acknowledged and dropped, never folded into game state.
//!
//! Only available with the `rest-client` feature (on by default).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;

use std::collections::BTreeMap;

use crate::commands::CommandApi;
use crate::context::AuthToken;
use crate::error::QuizcastError;
use crate::protocol::{
    AnswerId, FlashcardId, GameResultPayload, GameStateSnapshot, GroupId, OnlineUser,
    ParticipantId, SessionId, SessionSnapshot, SessionStatus, UserIdentity,
};
use crate::snapshot::SnapshotApi;

/// A `reqwest`-backed client for the Quizcast REST API.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: Arc<str>,
    auth: AuthToken,
}

impl RestClient {
    /// Create a client for the API at `base_url` (scheme + host + optional
    /// prefix, no trailing slash required).
    ///
    /// # Errors
    ///
    /// Returns [`QuizcastError::Http`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(base_url: &str, auth: AuthToken) -> Result<Self, QuizcastError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, self.auth.header_value())
    }

    /// Map a non-success response to the error taxonomy. `403` is the
    /// not-yet-a-participant race; callers retry it, nothing else.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, QuizcastError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::FORBIDDEN => Err(QuizcastError::NotYetJoined),
            StatusCode::UNAUTHORIZED => Err(QuizcastError::Unauthorized),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(QuizcastError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn read<T: DeserializeOwned>(&self, path: &str) -> Result<T, QuizcastError> {
        let response = self.request(Method::GET, path).send().await?;
        Ok(Self::check(response).await?.json::<T>().await?)
    }

    /// Issue a command. The acknowledged response body is dropped on the
    /// floor: confirmed state arrives over the real-time channel only.
    async fn command(&self, path: &str) -> Result<(), QuizcastError> {
        let response = self.request(Method::POST, path).send().await?;
        Self::check(response).await.map(drop)
    }
}

#[async_trait]
impl SnapshotApi for RestClient {
    async fn fetch_session(
        &self,
        session_id: SessionId,
    ) -> Result<SessionSnapshot, QuizcastError> {
        self.read(&format!("sessions/{session_id}")).await
    }

    async fn fetch_game(
        &self,
        session_id: SessionId,
    ) -> Result<GameStateSnapshot, QuizcastError> {
        let mut snapshot: GameStateSnapshot =
            self.read(&format!("sessions/{session_id}/game")).await?;

        // The vote tally lives on its own endpoint and only exists while a
        // question is in flight. A miss here is not worth failing the whole
        // snapshot over — the next vote_update push carries the tally anyway.
        if snapshot.status == SessionStatus::Playing && snapshot.votes.is_none() {
            if let Some(flashcard_id) = snapshot.current_flashcard_id {
                let path = format!("sessions/{session_id}/flashcards/{flashcard_id}/votes");
                match self.read::<BTreeMap<ParticipantId, AnswerId>>(&path).await {
                    Ok(votes) => snapshot.votes = Some(votes),
                    Err(e) => tracing::warn!("vote tally read failed: {e}"),
                }
            }
        }

        Ok(snapshot)
    }

    async fn fetch_identity(&self) -> Result<UserIdentity, QuizcastError> {
        self.read("users/me").await
    }

    async fn fetch_group_roster(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<OnlineUser>, QuizcastError> {
        self.read(&format!("groups/{group_id}/online")).await
    }
}

#[async_trait]
impl CommandApi for RestClient {
    async fn start_game(&self, session_id: SessionId) -> Result<(), QuizcastError> {
        self.command(&format!("sessions/{session_id}/game/start"))
            .await
    }

    async fn cast_vote(
        &self,
        session_id: SessionId,
        flashcard_id: FlashcardId,
        answer_id: AnswerId,
    ) -> Result<(), QuizcastError> {
        let response = self
            .request(Method::POST, &format!("sessions/{session_id}/game/vote"))
            .json(&serde_json::json!({
                "flashcard_id": flashcard_id,
                "answer_id": answer_id,
            }))
            .send()
            .await?;
        Self::check(response).await.map(drop)
    }

    async fn end_question(&self, session_id: SessionId) -> Result<(), QuizcastError> {
        self.command(&format!("sessions/{session_id}/game/end-question"))
            .await
    }

    async fn next_question(&self, session_id: SessionId) -> Result<(), QuizcastError> {
        self.command(&format!("sessions/{session_id}/game/next-question"))
            .await
    }

    async fn end_game(&self, session_id: SessionId) -> Result<(), QuizcastError> {
        self.command(&format!("sessions/{session_id}/game/end")).await
    }

    async fn fetch_final_result(
        &self,
        session_id: SessionId,
    ) -> Result<GameResultPayload, QuizcastError> {
        self.read(&format!("sessions/{session_id}/game/result"))
            .await
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
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    /// Serve exactly one canned HTTP response and capture the raw request.
    /// Returns the base URL and a receiver for the captured request text.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (req_tx, req_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            // Read headers, then any content-length body.
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let header_end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = req_tx.send(String::from_utf8_lossy(&buf).to_string());

            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        (format!("http://{addr}"), req_rx)
    }

    /// Serve one canned response per incoming connection, in order, and
    /// capture every raw request.
    async fn serve_script(
        responses: Vec<(&'static str, &'static str)>,
    ) -> (String, Arc<StdMutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(StdMutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status_line, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = stream.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                captured
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf).to_string());

                let response = format!(
                    "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });

        (format!("http://{addr}"), requests)
    }

    fn client(base_url: &str) -> RestClient {
        RestClient::new(base_url, AuthToken::new("tok-xyz")).unwrap()
    }

    #[tokio::test]
    async fn fetch_game_parses_snapshot_and_sends_bearer() {
        let body = r#"{"status":"playing","current_question_index":2,"current_flashcard_id":null}"#;
        let (base, req_rx) = serve_once("HTTP/1.1 200 OK", body).await;

        let snapshot = client(&base)
            .fetch_game(Uuid::from_u128(7))
            .await
            .unwrap();
        assert_eq!(snapshot.current_question_index, 2);
        assert!(snapshot.votes.is_none());

        let request = req_rx.await.unwrap();
        let first_line = request.lines().next().unwrap();
        assert!(
            first_line.starts_with("GET /sessions/00000000-0000-0000-0000-000000000007/game"),
            "unexpected request line: {first_line}"
        );
        assert!(request.to_ascii_lowercase().contains("bearer tok-xyz"));
    }

    #[tokio::test]
    async fn fetch_game_pulls_tally_while_question_is_active() {
        let game = r#"{"status":"playing","current_question_index":1,"current_flashcard_id":"00000000-0000-0000-0000-000000000015"}"#;
        let votes = r#"{"00000000-0000-0000-0000-000000000001":"00000000-0000-0000-0000-0000000000aa"}"#;
        let (base, requests) = serve_script(vec![
            ("HTTP/1.1 200 OK", game),
            ("HTTP/1.1 200 OK", votes),
        ])
        .await;

        let snapshot = client(&base).fetch_game(Uuid::from_u128(7)).await.unwrap();
        let votes = snapshot.votes.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(
            votes[&Uuid::from_u128(1)],
            Uuid::from_u128(0xAA)
        );

        let requests = requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].contains("/flashcards/00000000-0000-0000-0000-000000000015/votes"));
    }

    #[tokio::test]
    async fn fetch_game_survives_a_failed_tally_read() {
        let game = r#"{"status":"playing","current_question_index":1,"current_flashcard_id":"00000000-0000-0000-0000-000000000015"}"#;
        let (base, _requests) = serve_script(vec![
            ("HTTP/1.1 200 OK", game),
            ("HTTP/1.1 500 Internal Server Error", "boom"),
        ])
        .await;

        let snapshot = client(&base).fetch_game(Uuid::from_u128(7)).await.unwrap();
        assert_eq!(snapshot.current_question_index, 1);
        assert!(snapshot.votes.is_none());
    }

    #[tokio::test]
    async fn forbidden_maps_to_not_yet_joined() {
        let (base, _req_rx) = serve_once("HTTP/1.1 403 Forbidden", "{}").await;
        let err = client(&base)
            .fetch_game(Uuid::from_u128(7))
            .await
            .unwrap_err();
        assert!(matches!(err, QuizcastError::NotYetJoined));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let (base, _req_rx) = serve_once("HTTP/1.1 500 Internal Server Error", "boom").await;
        let err = client(&base)
            .fetch_session(Uuid::from_u128(7))
            .await
            .unwrap_err();
        match err {
            QuizcastError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_game_posts_to_command_path() {
        let (base, req_rx) = serve_once("HTTP/1.1 204 No Content", "").await;
        client(&base).start_game(Uuid::from_u128(7)).await.unwrap();

        let request = req_rx.await.unwrap();
        let first_line = request.lines().next().unwrap();
        assert!(first_line
            .starts_with("POST /sessions/00000000-0000-0000-0000-000000000007/game/start"));
    }

    #[tokio::test]
    async fn cast_vote_carries_flashcard_and_answer() {
        let (base, req_rx) = serve_once("HTTP/1.1 200 OK", "{}").await;
        let flashcard = Uuid::from_u128(21);
        let answer = Uuid::from_u128(42);
        client(&base)
            .cast_vote(Uuid::from_u128(7), flashcard, answer)
            .await
            .unwrap();

        let request = req_rx.await.unwrap();
        assert!(request.contains(&flashcard.to_string()));
        assert!(request.contains(&answer.to_string()));
    }

    #[tokio::test]
    async fn command_failure_has_no_side_channel() {
        let (base, _req_rx) = serve_once("HTTP/1.1 409 Conflict", "no active question").await;
        let err = client(&base)
            .end_question(Uuid::from_u128(7))
            .await
            .unwrap_err();
        match err {
            QuizcastError::Api { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "no active question");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_final_result_parses_payload() {
        let body = r#"{"total_score":400,"max_possible_score":500,"percentage":80.0,"status":"won"}"#;
        let (base, _req_rx) = serve_once("HTTP/1.1 200 OK", body).await;

        let result = client(&base)
            .fetch_final_result(Uuid::from_u128(7))
            .await
            .unwrap();
        assert_eq!(result.total_score, 400);
        assert_eq!(result.percentage, 80.0);
    }
}
