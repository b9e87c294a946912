//! Error types for the Quizcast client.

use thiserror::Error;

/// Errors that can occur when using the Quizcast client.
#[derive(Debug, Error)]
pub enum QuizcastError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The server rejected a read because this client is not (yet) a
    /// participant of the session.
    ///
    /// During session startup the server auto-joins connecting clients, so a
    /// `403` on a snapshot read usually races an in-flight join rather than
    /// signalling a real permission problem. Callers treat it as transient —
    /// see [`QuizcastError::is_transient`].
    #[error("not yet a participant of the session")]
    NotYetJoined,

    /// The bearer credential was rejected by the server.
    #[error("credential rejected by server")]
    Unauthorized,

    /// The server answered a request with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code returned by the server.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// An HTTP request could not be completed.
    #[cfg(feature = "rest-client")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuizcastError {
    /// Returns `true` if retrying the same operation may succeed.
    ///
    /// Only the not-yet-a-participant race qualifies; every other error is
    /// surfaced to the caller unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuizcastError::NotYetJoined)
    }
}

/// A specialized [`Result`] type for Quizcast client operations.
pub type Result<T> = std::result::Result<T, QuizcastError>;
