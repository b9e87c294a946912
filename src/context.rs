//! Per-session context shared by every component.
//!
//! There is deliberately no ambient "current session" anywhere in this crate:
//! a [`SessionContext`] is constructed once per mounted session and handed
//! explicitly to the transport channel, the snapshot fetcher, the command
//! issuer, and the session loop.

use crate::protocol::SessionId;

/// An opaque bearer credential obtained from the external auth provider.
///
/// The client never inspects the token: it is usable verbatim as an HTTP
/// `Authorization` header value and as a channel-connection path parameter.
/// `Debug` output redacts the token so it cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a credential issued by the auth provider.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for use as a path parameter.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The token formatted as an HTTP `Authorization` header value.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(****)")
    }
}

impl From<String> for AuthToken {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<&str> for AuthToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Everything a component needs to act on behalf of one mounted session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The live session this context is scoped to.
    pub session_id: SessionId,
    /// Credential presented on every request and on channel connect.
    pub auth: AuthToken,
}

impl SessionContext {
    /// Create a context for one session.
    pub fn new(session_id: SessionId, auth: impl Into<AuthToken>) -> Self {
        Self {
            session_id,
            auth: auth.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let token = AuthToken::new("secret-bearer-value");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn header_value_uses_bearer_scheme() {
        let token = AuthToken::new("abc123");
        assert_eq!(token.header_value(), "Bearer abc123");
    }

    #[test]
    fn context_debug_redacts_token_too() {
        let ctx = SessionContext::new(uuid::Uuid::nil(), "secret");
        assert!(!format!("{ctx:?}").contains("secret"));
    }
}
