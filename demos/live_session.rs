//! # Live Session Example
//!
//! Demonstrates a complete Quizcast client lifecycle:
//!
//! 1. Connect to the real-time channel with a bearer token
//! 2. Mount a live session (join + snapshot seed happen automatically)
//! 3. React to game events, voting for the first answer of each question
//! 4. If this user is the host, drive the game with commands
//! 5. Shut down gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! QUIZCAST_TOKEN=<bearer> QUIZCAST_SESSION=<uuid> cargo run --example live_session
//!
//! # Override the endpoints:
//! QUIZCAST_API_URL=https://my-server/api \
//! QUIZCAST_CHANNEL_URL=ws://my-server/channel \
//! cargo run --example live_session
//! ```

use quizcast_client::{
    CommandApi, LiveSession, RestClient, SessionConfig, SessionContext, SessionEvent,
    WebSocketTransport,
};

/// Default REST endpoint when `QUIZCAST_API_URL` is not set.
const DEFAULT_API_URL: &str = "http://localhost:4000/api";

/// Default channel endpoint when `QUIZCAST_CHANNEL_URL` is not set.
const DEFAULT_CHANNEL_URL: &str = "ws://localhost:4000/channel";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let api_url = std::env::var("QUIZCAST_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
    let channel_url =
        std::env::var("QUIZCAST_CHANNEL_URL").unwrap_or_else(|_| DEFAULT_CHANNEL_URL.into());
    let token = std::env::var("QUIZCAST_TOKEN")?;
    let session_id: uuid::Uuid = std::env::var("QUIZCAST_SESSION")?.parse()?;

    let ctx = SessionContext::new(session_id, token);

    // ── Connect ─────────────────────────────────────────────────────
    tracing::info!("Connecting to {channel_url}");
    let transport = WebSocketTransport::connect_authenticated(&channel_url, &ctx.auth).await?;
    let api = RestClient::new(&api_url, ctx.auth.clone())?;

    // Commands share the credential but are a separate concern from the
    // session loop: their effects arrive back as channel events.
    let commands = api.clone();

    let (mut session, mut events) =
        LiveSession::start(transport, api, ctx, SessionConfig::new());

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    SessionEvent::Connected => {
                        tracing::info!("Channel connected, waiting for the snapshot seed…");
                    }

                    SessionEvent::ViewRefreshed => {
                        let state = session.state().await;
                        tracing::info!(
                            "View refreshed: status={:?} host={}",
                            state.view.as_ref().map(|v| v.status),
                            state.is_host()
                        );
                        // Hosts kick the game off from the waiting room.
                        if state.is_host()
                            && state.view.is_some_and(|v| {
                                v.status == quizcast_client::SessionStatus::Waiting
                            })
                        {
                            commands.start_game(session.session_id()).await?;
                            tracing::info!("Start-game command sent");
                        }
                    }

                    SessionEvent::GameStarted { question }
                    | SessionEvent::QuestionChanged { question } => {
                        tracing::info!(
                            "Question {}/{}: {}",
                            question.question_index + 1,
                            question.total_questions,
                            question.question_text
                        );
                        // Demo strategy: always vote for the first answer.
                        if let Some(choice) = question.answers.first() {
                            commands
                                .cast_vote(session.session_id(), question.flashcard_id, choice.id)
                                .await?;
                            tracing::info!("Voted for: {}", choice.text);
                        }
                    }

                    SessionEvent::TallyUpdated { tally } => {
                        tracing::info!("{} vote(s) in", tally.votes.len());
                    }

                    SessionEvent::QuestionEnded { result } => {
                        tracing::info!(
                            "Question over — {} (+{} points, total {})",
                            if result.was_correct { "correct!" } else { "wrong" },
                            result.points_earned,
                            result.total_score
                        );
                        if session.is_host().await {
                            let last = session
                                .state()
                                .await
                                .question
                                .is_some_and(|q| q.is_last());
                            if last {
                                commands.end_game(session.session_id()).await?;
                            } else {
                                commands.next_question(session.session_id()).await?;
                            }
                        }
                    }

                    SessionEvent::GameFinished { result } => {
                        tracing::info!(
                            "Game over: {:?} with {}/{} ({}%)",
                            result.status,
                            result.total_score,
                            result.max_possible_score,
                            result.percentage
                        );
                        break;
                    }

                    SessionEvent::SnapshotFailed { reason } => {
                        tracing::warn!("Snapshot poll failed: {reason}");
                    }

                    SessionEvent::Disconnected { reason } => {
                        tracing::warn!(
                            "Disconnected: {}",
                            reason.as_deref().unwrap_or("unknown")
                        );
                        break;
                    }

                    other => {
                        tracing::debug!("Event: {other:?}");
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    session.shutdown().await;
    tracing::info!("Session shut down. Goodbye!");
    Ok(())
}
