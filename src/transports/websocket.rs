//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] translates between the Quizcast JSON-envelope
//! channel and WebSocket text frames. Both `ws://` and `wss://` URLs are
//! supported; TLS is handled transparently via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! The Quizcast channel endpoint authenticates connections by bearer token
//! carried as the final path segment — use
//! [`WebSocketTransport::connect_authenticated`] to build that URL from a
//! base endpoint and an [`AuthToken`].
//!
//! Only available with the `transport-websocket` feature (on by default).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::context::AuthToken;
use crate::error::QuizcastError;
use crate::transport::Transport;

/// Type alias for the underlying WebSocket stream.
///
/// Public so callers can construct a [`WebSocketTransport`] from an existing
/// stream via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe: dropping its future
/// before completion does not consume or lose messages, so it is safe inside
/// `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`QuizcastError::Io`] if the URL is invalid or the connection
    /// cannot be established. The [`ErrorKind`](std::io::ErrorKind) of an
    /// underlying I/O error is preserved; other handshake errors map to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, QuizcastError> {
        tracing::debug!(url = %url, "connecting to Quizcast channel");

        match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _response)) => {
                tracing::info!(url = %url, "channel connection established");
                Ok(Self {
                    stream,
                    closed: false,
                })
            }
            Err(e) => {
                let kind = match &e {
                    tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                    _ => std::io::ErrorKind::Other,
                };
                Err(QuizcastError::Io(std::io::Error::new(kind, e)))
            }
        }
    }

    /// Connect to a channel endpoint, presenting the bearer credential as
    /// the final path segment (the form the Quizcast server expects).
    ///
    /// ```text
    /// connect_authenticated("wss://api.quizcast.app/channel", &token)
    ///   → wss://api.quizcast.app/channel/<token>
    /// ```
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_authenticated(
        base_url: &str,
        auth: &AuthToken,
    ) -> Result<Self, QuizcastError> {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), auth.as_str());
        Self::connect(&url).await
    }

    /// Create a [`WebSocketTransport`] from an already-established stream.
    ///
    /// Useful for custom TLS configuration, proxies, or extra headers that
    /// [`connect`](Self::connect) does not expose.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Establish a new WebSocket connection with a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`QuizcastError::Timeout`] if the deadline elapses, or any
    /// error [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, QuizcastError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| QuizcastError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), QuizcastError> {
        if self.closed {
            return Err(QuizcastError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| QuizcastError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, QuizcastError>> {
        // Non-text frames are handled here so callers only ever see complete
        // JSON envelopes.
        loop {
            match self.stream.next().await? {
                // `Utf8Bytes::to_string()` copies the payload because the
                // inner buffer is not exposed by value.
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "channel closed by server");
                    return None;
                }
                // tungstenite auto-queues the Pong reply to a Ping; both
                // heartbeat frames are invisible to the protocol layer.
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Binary(_)) => {
                    tracing::warn!("unexpected binary frame on the channel, skipping");
                }
                // Never produced by the read half; the arm exists for
                // exhaustiveness against future `Message` variants.
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    return Some(Err(QuizcastError::TransportReceive(e.to_string())));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), QuizcastError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| QuizcastError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        assert!(matches!(result.unwrap_err(), QuizcastError::Io(_)));
    }

    /// Start a local WebSocket server running `handler` on the accepted
    /// connection; returns the URL to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_receives_text_messages() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"type":"game_joined"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"type":"game_joined"}"#);
    }

    #[tokio::test]
    async fn recv_returns_none_on_close_frame() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, "after_binary");
    }

    #[tokio::test]
    async fn authenticated_connect_appends_token_path_segment() {
        // The mock server only accepts the handshake, which is enough to
        // observe the request path.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (path_tx, path_rx) = tokio::sync::oneshot::channel::<String>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = |req: &tokio_tungstenite::tungstenite::handshake::server::Request,
                            resp| {
                let _ = path_tx.send(req.uri().path().to_string());
                Ok(resp)
            };
            let _ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
        });

        let token = AuthToken::new("tok-123");
        let base = format!("ws://{addr}/channel");
        let _transport = WebSocketTransport::connect_authenticated(&base, &token)
            .await
            .unwrap();

        assert_eq!(path_rx.await.unwrap(), "/channel/tok-123");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, QuizcastError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address guarantees a timeout.
        let result = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result.unwrap_err(), QuizcastError::Timeout));
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .send(r#"{"type":"join_game"}"#.to_string())
            .await
            .unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"type":"join_game"}"#);
    }
}
