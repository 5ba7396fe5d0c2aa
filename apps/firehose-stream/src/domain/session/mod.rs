//! Session Credentials
//!
//! The token pair and expiry returned by a login or refresh call. Sessions
//! are replaced wholesale on renewal, never mutated in place, so a reader
//! holding one always sees a consistent token pair and expiry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Shortest session lifetime accepted from the server.
pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(60);

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while obtaining or renewing a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No session has been installed yet.
    #[error("no active session")]
    NoSession,

    /// The server rejected the login.
    #[error("failed to create session: {0}")]
    LoginFailed(String),

    /// The server rejected the refresh.
    #[error("failed to refresh session: {0}")]
    RefreshFailed(String),

    /// The refresh call did not complete in time.
    #[error("session refresh timed out after {0:?}")]
    Timeout(Duration),

    /// The access token could not be decoded.
    #[error("invalid access token: {0}")]
    InvalidToken(String),

    /// The session expires too soon to be useful.
    #[error("session duration {remaining:?} is below the {minimum:?} minimum")]
    TooShort {
        /// Time left on the session.
        remaining: Duration,
        /// Required minimum.
        minimum: Duration,
    },
}

// =============================================================================
// Session
// =============================================================================

/// Authenticated session.
///
/// `Debug` redacts both tokens for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    access_token: String,
    refresh_token: String,
    did: String,
    handle: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session from its parts.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        did: impl Into<String>,
        handle: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            did: did.into(),
            handle: handle.into(),
            expires_at,
        }
    }

    /// Bearer token for outbound requests.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Token used to obtain the next session.
    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Account identity.
    #[must_use]
    pub fn did(&self) -> &str {
        &self.did
    }

    /// Account handle.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Access token expiry.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Time left before expiry, zero if already expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Check the session lives at least `MIN_SESSION_DURATION` from `now`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::TooShort` otherwise.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<(), SessionError> {
        let remaining = self.remaining(now);
        if remaining < MIN_SESSION_DURATION {
            return Err(SessionError::TooShort {
                remaining,
                minimum: MIN_SESSION_DURATION,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("expires_at", &self.expires_at)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in: chrono::Duration) -> Session {
        Session::new(
            "access-secret",
            "refresh-secret",
            "did:plc:me",
            "me.bsky.social",
            Utc::now() + expires_in,
        )
    }

    #[test]
    fn debug_redacts_tokens() {
        let debug = format!("{:?}", session(chrono::Duration::hours(1)));
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("did:plc:me"));
    }

    #[test]
    fn short_session_rejected() {
        let err = session(chrono::Duration::seconds(30))
            .ensure_usable(Utc::now())
            .unwrap_err();
        assert!(matches!(err, SessionError::TooShort { .. }));
    }

    #[test]
    fn long_session_accepted() {
        session(chrono::Duration::minutes(10))
            .ensure_usable(Utc::now())
            .unwrap();
    }

    #[test]
    fn expired_session_has_zero_remaining() {
        let s = session(chrono::Duration::minutes(-5));
        assert_eq!(s.remaining(Utc::now()), Duration::ZERO);
    }
}
