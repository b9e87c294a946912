//! # Quizcast Client
//!
//! Transport-agnostic Rust client for Quizcast live trivia sessions.
//!
//! Quizcast sessions are synchronized from two independent sources: a
//! pollable REST snapshot and a push-based real-time event stream. This
//! crate keeps a client's view of an in-progress quiz consistent across
//! both, guaranteeing that authoritative game progress — scores, question
//! transitions, vote tallies — is never corrupted by a stale or
//! out-of-order read.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any
//!   backend; the default `transport-websocket` feature provides
//!   [`WebSocketTransport`]
//! - **Field-scoped reconciliation** — push events own the score fields;
//!   polls may only refresh the question pointer and status, so a late
//!   snapshot is harmless by construction
//! - **Pure dispatcher** — every envelope folds into the store through one
//!   reducer, deterministic and unit-testable without a network
//! - **Fire-and-forget commands** — host/participant intents go out over
//!   REST and their confirmed effects come back over the channel, never
//!   from the command response itself
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quizcast_client::{
//!     LiveSession, RestClient, SessionConfig, SessionContext, SessionEvent,
//!     WebSocketTransport,
//! };
//!
//! let ctx = SessionContext::new(session_id, token);
//! let transport =
//!     WebSocketTransport::connect_authenticated("wss://api.quizcast.app/channel", &ctx.auth)
//!         .await?;
//! let api = RestClient::new("https://api.quizcast.app", ctx.auth.clone())?;
//!
//! let (session, mut events) = LiveSession::start(transport, api, ctx, SessionConfig::new());
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::QuestionChanged { question } => { /* render */ }
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod commands;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod presence;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod snapshot;
pub mod transport;
pub mod transports;
pub mod view;

#[cfg(feature = "rest-client")]
pub mod rest;

// Re-export primary types for ergonomic imports.
pub use commands::CommandApi;
pub use context::{AuthToken, SessionContext};
pub use error::QuizcastError;
pub use event::{GroupEvent, SessionEvent};
pub use presence::{GroupChannel, GroupChannelConfig, RosterPoller};
pub use protocol::{ClientEnvelope, ServerEnvelope, SessionStatus};
pub use session::{LiveSession, SessionConfig};
pub use snapshot::SnapshotApi;
pub use transport::Transport;
pub use view::{GameState, GameView, VoteTally};

#[cfg(feature = "rest-client")]
pub use rest::RestClient;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
