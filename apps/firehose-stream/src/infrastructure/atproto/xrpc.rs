//! XRPC Session Provider
//!
//! Logs in with `com.atproto.server.createSession` and renews with
//! `com.atproto.server.refreshSession`. Both calls return a token pair; the
//! session's expiry is read from the new access token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::token::session_from_tokens;
use crate::application::ports::SessionProvider;
use crate::domain::session::{Session, SessionError};

/// Default account service.
pub const DEFAULT_SERVICE: &str = "https://bsky.social";

const CREATE_SESSION: &str = "com.atproto.server.createSession";
const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";

/// Per-request bound, matching the renewal scheduler's own timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct CreateSessionInput<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionOutput {
    access_jwt: String,
    refresh_jwt: String,
    did: String,
    handle: String,
}

#[derive(Debug, Deserialize)]
struct XrpcErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Session provider backed by an account service's XRPC endpoints.
#[derive(Debug, Clone)]
pub struct XrpcSessionProvider {
    http: Client,
    service: String,
}

impl XrpcSessionProvider {
    /// Create a provider for `service` (for example `https://bsky.social`).
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LoginFailed` if the HTTP client cannot be built.
    pub fn new(service: &str) -> Result<Self, SessionError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SessionError::LoginFailed(e.to_string()))?;

        Ok(Self {
            http,
            service: service.trim_end_matches('/').to_string(),
        })
    }

    /// Log in with an identifier (handle, DID or email) and app password.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LoginFailed` if the server rejects the
    /// credentials, or a token error if the response cannot be used.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Session, SessionError> {
        let request = self
            .http
            .post(self.url(CREATE_SESSION))
            .json(&CreateSessionInput {
                identifier,
                password,
            });
        self.exchange(request, SessionError::LoginFailed).await
    }

    fn url(&self, method: &str) -> String {
        format!("{}/xrpc/{method}", self.service)
    }

    async fn exchange(
        &self,
        request: RequestBuilder,
        failed: fn(String) -> SessionError,
    ) -> Result<Session, SessionError> {
        let response = request.send().await.map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<XrpcErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message.or(body.error))
                .unwrap_or_default();
            return Err(failed(format!("{status} {detail}").trim_end().to_string()));
        }

        let output: SessionOutput = response
            .json()
            .await
            .map_err(|e| failed(format!("unexpected response: {e}")))?;
        tracing::debug!(did = %output.did, service = %self.service, "Session issued");

        session_from_tokens(
            &output.access_jwt,
            &output.refresh_jwt,
            &output.did,
            &output.handle,
        )
    }
}

#[async_trait]
impl SessionProvider for XrpcSessionProvider {
    async fn refresh(&self, current: &Session) -> Result<Session, SessionError> {
        let request = self
            .http
            .post(self.url(REFRESH_SESSION))
            .bearer_auth(current.refresh_token());
        self.exchange(request, SessionError::RefreshFailed).await
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::routing::post;
    use axum::{Json, Router};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::Utc;
    use serde_json::{Value, json};

    use super::*;

    fn access_token(expires_in_secs: i64) -> String {
        let exp = (Utc::now() + chrono::Duration::seconds(expires_in_secs)).timestamp();
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256K","typ":"at+jwt"}"#),
            URL_SAFE_NO_PAD.encode(format!(r#"{{"scope":"com.atproto.access","exp":{exp}}}"#))
        )
    }

    fn session_body(refresh: &str, expires_in_secs: i64) -> Value {
        json!({
            "accessJwt": access_token(expires_in_secs),
            "refreshJwt": refresh,
            "did": "did:plc:alice",
            "handle": "alice.test",
            "active": true
        })
    }

    async fn create_session(Json(input): Json<Value>) -> (StatusCode, Json<Value>) {
        if input["identifier"] == "alice.test" && input["password"] == "app-pass" {
            (StatusCode::OK, Json(session_body("refresh-1", 7200)))
        } else {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "AuthenticationRequired", "message": "Invalid identifier or password" })),
            )
        }
    }

    async fn refresh_session(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some("Bearer refresh-1") => (StatusCode::OK, Json(session_body("refresh-2", 7200))),
            Some("Bearer short-lived") => (StatusCode::OK, Json(session_body("refresh-3", 10))),
            _ => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "ExpiredToken", "message": "Token has expired" })),
            ),
        }
    }

    async fn serve() -> XrpcSessionProvider {
        let app = Router::new()
            .route("/xrpc/com.atproto.server.createSession", post(create_session))
            .route("/xrpc/com.atproto.server.refreshSession", post(refresh_session));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        XrpcSessionProvider::new(&format!("http://{addr}/")).unwrap()
    }

    fn session_with_refresh(refresh: &str) -> Session {
        Session::new(
            "access",
            refresh,
            "did:plc:alice",
            "alice.test",
            Utc::now() + chrono::Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn login_reads_expiry_from_access_token() {
        let provider = serve().await;

        let session = provider.login("alice.test", "app-pass").await.unwrap();
        assert_eq!(session.did(), "did:plc:alice");
        assert_eq!(session.refresh_token(), "refresh-1");
        let remaining = session.remaining(Utc::now());
        assert!(remaining > Duration::from_secs(7000) && remaining <= Duration::from_secs(7200));
    }

    #[tokio::test]
    async fn rejected_login_carries_server_message() {
        let provider = serve().await;

        let err = provider.login("alice.test", "wrong").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::LoginFailed(ref msg) if msg.contains("401") && msg.contains("Invalid identifier")
        ));
    }

    #[tokio::test]
    async fn refresh_presents_refresh_token() {
        let provider = serve().await;

        let renewed = provider.refresh(&session_with_refresh("refresh-1")).await.unwrap();
        assert_eq!(renewed.refresh_token(), "refresh-2");
        assert_eq!(renewed.handle(), "alice.test");
    }

    #[tokio::test]
    async fn expired_refresh_token_fails() {
        let provider = serve().await;

        let err = provider.refresh(&session_with_refresh("stale")).await.unwrap_err();
        assert!(matches!(err, SessionError::RefreshFailed(ref msg) if msg.contains("Token has expired")));
    }

    #[tokio::test]
    async fn short_lived_refresh_is_rejected() {
        let provider = serve().await;

        let err = provider.refresh(&session_with_refresh("short-lived")).await.unwrap_err();
        assert!(matches!(err, SessionError::TooShort { .. }));
    }

    #[tokio::test]
    async fn unreachable_service_fails_login() {
        let provider = XrpcSessionProvider::new("http://127.0.0.1:1").unwrap();
        let err = provider.login("alice.test", "app-pass").await.unwrap_err();
        assert!(matches!(err, SessionError::LoginFailed(_)));
    }
}
