//! Access Token Inspection
//!
//! Session expiry comes from the access token's `exp` claim. The token is
//! only read here, never verified; the issuing server is the authority and
//! any tampering simply makes the next request fail.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::session::{Session, SessionError};

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Read the expiry claim from an unverified JWT.
///
/// # Errors
///
/// Returns `SessionError::InvalidToken` if the token is not three
/// dot-separated segments, the payload is not base64url JSON, or `exp` is
/// missing or out of range.
pub fn token_expiry(token: &str) -> Result<DateTime<Utc>, SessionError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(SessionError::InvalidToken(
            "expected header.payload.signature".to_string(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| SessionError::InvalidToken(format!("payload decode: {e}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::InvalidToken(format!("payload parse: {e}")))?;

    let exp = claims
        .exp
        .ok_or_else(|| SessionError::InvalidToken("missing exp claim".to_string()))?;
    DateTime::from_timestamp(exp, 0)
        .ok_or_else(|| SessionError::InvalidToken(format!("exp {exp} out of range")))
}

/// Build a session from a login or refresh response.
///
/// # Errors
///
/// Returns `SessionError::InvalidToken` if the access token's expiry cannot
/// be read, or `SessionError::TooShort` if it expires within a minute.
pub fn session_from_tokens(
    access_token: &str,
    refresh_token: &str,
    did: &str,
    handle: &str,
) -> Result<Session, SessionError> {
    let expires_at = token_expiry(access_token)?;
    let session = Session::new(access_token, refresh_token, did, handle, expires_at);
    session.ensure_usable(Utc::now())?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256K","typ":"at+jwt"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn reads_exp_claim() {
        let token = token_with_payload(r#"{"scope":"com.atproto.access","sub":"did:plc:a","exp":1725911162}"#);
        let expiry = token_expiry(&token).unwrap();
        assert_eq!(expiry.timestamp(), 1_725_911_162);
    }

    #[test]
    fn missing_exp_rejected() {
        let token = token_with_payload(r#"{"sub":"did:plc:a"}"#);
        assert!(matches!(
            token_expiry(&token),
            Err(SessionError::InvalidToken(msg)) if msg.contains("exp")
        ));
    }

    #[test]
    fn malformed_token_rejected() {
        assert!(token_expiry("not-a-jwt").is_err());
        assert!(token_expiry("a.b.c.d").is_err());
        assert!(token_expiry("a.!!!.c").is_err());
    }

    #[test]
    fn session_from_fresh_tokens() {
        let exp = (Utc::now() + chrono::Duration::hours(2)).timestamp();
        let token = token_with_payload(&format!(r#"{{"exp":{exp}}}"#));

        let session = session_from_tokens(&token, "refresh", "did:plc:a", "a.test").unwrap();
        assert_eq!(session.expires_at().timestamp(), exp);
        assert_eq!(session.handle(), "a.test");
    }

    #[test]
    fn session_expiring_soon_rejected() {
        let exp = (Utc::now() + chrono::Duration::seconds(20)).timestamp();
        let token = token_with_payload(&format!(r#"{{"exp":{exp}}}"#));

        assert!(matches!(
            session_from_tokens(&token, "refresh", "did:plc:a", "a.test"),
            Err(SessionError::TooShort { .. })
        ));
    }
}
