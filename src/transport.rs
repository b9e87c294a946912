//! Transport abstraction for the Quizcast real-time channel.
//!
//! The [`Transport`] trait is a bidirectional text-message channel between
//! the client and the Quizcast server. The channel speaks JSON envelopes, so
//! every implementation must handle message framing internally (WebSocket
//! frames, length-prefixed TCP, and so on).
//!
//! Connection setup is intentionally NOT part of this trait — different
//! transports have fundamentally different connection parameters. Construct
//! a connected transport externally, then hand it to
//! [`LiveSession::start`](crate::session::LiveSession::start) or
//! [`GroupChannel::start`](crate::presence::GroupChannel::start), which take
//! over ownership and drive it from a background loop.

use async_trait::async_trait;

use crate::error::QuizcastError;

/// A bidirectional text-message transport for the Quizcast channel.
///
/// Implementors shuttle serialized JSON envelopes between client and server:
/// one complete envelope per [`send`](Transport::send) call, one complete
/// envelope per [`recv`](Transport::recv) result.
///
/// # Object Safety
///
/// The trait is object-safe, so `Box<dyn Transport>` works for dynamic
/// dispatch; the session constructors accept `impl Transport` for the common
/// monomorphized case.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the session
/// loop polls it inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose a message. Channel-backed
/// implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON envelope to the server.
    ///
    /// # Errors
    ///
    /// Returns [`QuizcastError::TransportSend`] if the message could not be
    /// sent (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), QuizcastError>;

    /// Receive the next JSON envelope from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete envelope was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait docs](Transport)).
    async fn recv(&mut self) -> Option<Result<String, QuizcastError>>;

    /// Close the transport gracefully.
    ///
    /// After this call, [`send`](Transport::send) and
    /// [`recv`](Transport::recv) may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources when that happens.
    async fn close(&mut self) -> Result<(), QuizcastError>;
}
