//! Firehose Configuration Settings
//!
//! Configuration types for the firehose service, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults, and
//! so do zero durations, since every timing setting must be positive. A
//! malformed resume cursor is an error because silently replaying from the
//! live tail would lose events.

use std::time::Duration;

use crate::domain::subscription::{Cursor, DEFAULT_BUFFER_SIZE, SubscriptionError, SubscriptionRequest};
use crate::infrastructure::atproto::{DEFAULT_BLOB_HOST, DEFAULT_SERVICE};
use crate::infrastructure::delivery::DEFAULT_ERROR_BUFFER_SIZE;
use crate::infrastructure::jetstream::{BackoffConfig, ClientConfig, HeartbeatConfig, SupervisorConfig};

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Collection NSIDs; empty selects the default set.
    pub collections: Vec<String>,
    /// Author DIDs; empty means everyone.
    pub authors: Vec<String>,
    /// Resume position.
    pub cursor: Option<Cursor>,
    /// Delivery queue capacity.
    pub buffer_size: usize,
    /// Request compressed frames. The subscription is refused when set.
    pub compress: bool,
    /// Hold events until the options message is sent.
    pub require_hello: bool,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            authors: Vec::new(),
            cursor: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            compress: false,
            require_hello: false,
        }
    }
}

impl SubscriptionSettings {
    /// Turn these settings into a subscription request.
    #[must_use]
    pub fn to_request(&self) -> SubscriptionRequest {
        let request = SubscriptionRequest::new()
            .with_collections(self.collections.iter().cloned())
            .with_authors(self.authors.iter().cloned())
            .with_buffer_size(self.buffer_size)
            .with_compression(self.compress)
            .with_require_hello(self.require_hello);
        match self.cursor {
            Some(cursor) => request.with_cursor(cursor.as_micros()),
            None => request,
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Endpoint overrides; empty selects the public instances.
    pub endpoints: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// Silence before the connection is considered dead.
    pub read_timeout: Duration,
    /// Connect plus upgrade deadline.
    pub handshake_timeout: Duration,
    /// Error sink capacity.
    pub error_buffer_size: usize,
    /// Host serving blobs referenced by records.
    pub blob_host: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(120),
            ping_interval: Duration::from_secs(60),
            read_timeout: Duration::from_secs(300),
            handshake_timeout: Duration::from_secs(10),
            error_buffer_size: DEFAULT_ERROR_BUFFER_SIZE,
            blob_host: DEFAULT_BLOB_HOST.to_string(),
        }
    }
}

impl StreamSettings {
    /// Client configuration derived from these settings.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoints: self.endpoints.clone(),
            supervisor: SupervisorConfig {
                backoff: BackoffConfig::new(self.reconnect_delay_initial, self.reconnect_delay_max),
                heartbeat: HeartbeatConfig {
                    ping_interval: self.ping_interval,
                    read_timeout: self.read_timeout,
                },
                handshake_timeout: self.handshake_timeout,
                ..SupervisorConfig::default()
            },
            error_buffer_size: self.error_buffer_size,
        }
    }
}

/// Account credentials for session login and renewal.
///
/// Renewal is enabled only when both the identifier and the password are set.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSettings {
    /// Account service base URL.
    pub service: String,
    /// Handle, DID or email.
    pub identifier: Option<String>,
    /// App password.
    pub password: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            identifier: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("service", &self.service)
            .field("identifier", &self.identifier)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AuthSettings {
    /// Identifier and password, if both are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.identifier.as_deref()?, self.password.as_deref()?))
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete firehose configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirehoseConfig {
    /// Subscription filters and options.
    pub subscription: SubscriptionSettings,
    /// Connection settings.
    pub stream: StreamSettings,
    /// Session credentials.
    pub auth: AuthSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl FirehoseConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `FIREHOSE_CURSOR` is set but not a valid cursor.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `FIREHOSE_CURSOR` is set but not a valid cursor.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let cursor = env
            .get("FIREHOSE_CURSOR")
            .map(|raw| Cursor::parse(&raw))
            .transpose()
            .map_err(|source| ConfigError::InvalidCursor {
                key: "FIREHOSE_CURSOR",
                source,
            })?;

        let subscription = SubscriptionSettings {
            collections: env.list("FIREHOSE_COLLECTIONS"),
            authors: env.list("FIREHOSE_AUTHORS"),
            cursor,
            buffer_size: env.parse("FIREHOSE_BUFFER_SIZE", defaults.subscription.buffer_size),
            compress: env.flag("FIREHOSE_COMPRESS", defaults.subscription.compress),
            require_hello: env.flag("FIREHOSE_REQUIRE_HELLO", defaults.subscription.require_hello),
        };

        let stream = StreamSettings {
            endpoints: env.list("FIREHOSE_ENDPOINTS"),
            reconnect_delay_initial: env.millis(
                "FIREHOSE_RECONNECT_DELAY_INITIAL_MS",
                defaults.stream.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "FIREHOSE_RECONNECT_DELAY_MAX_SECS",
                defaults.stream.reconnect_delay_max,
            ),
            ping_interval: env.secs("FIREHOSE_PING_INTERVAL_SECS", defaults.stream.ping_interval),
            read_timeout: env.secs("FIREHOSE_READ_TIMEOUT_SECS", defaults.stream.read_timeout),
            handshake_timeout: env.secs(
                "FIREHOSE_HANDSHAKE_TIMEOUT_SECS",
                defaults.stream.handshake_timeout,
            ),
            error_buffer_size: env.parse(
                "FIREHOSE_ERROR_BUFFER_SIZE",
                defaults.stream.error_buffer_size,
            ),
            blob_host: env
                .get("FIREHOSE_BLOB_HOST")
                .unwrap_or(defaults.stream.blob_host),
        };

        let auth = AuthSettings {
            service: env.get("FIREHOSE_PDS_HOST").unwrap_or(defaults.auth.service),
            identifier: env.get("FIREHOSE_IDENTIFIER"),
            password: env.get("FIREHOSE_APP_PASSWORD"),
        };

        let server = ServerSettings {
            health_port: env.parse("FIREHOSE_HEALTH_PORT", defaults.server.health_port),
        };

        Ok(Self {
            subscription,
            stream,
            auth,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Resume cursor is not a non-negative integer.
    #[error("invalid {key}: {source}")]
    InvalidCursor {
        /// Variable name.
        key: &'static str,
        /// Parse failure.
        source: SubscriptionError,
    },
}

// =============================================================================
// Variable Parsing
// =============================================================================

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-blank value of `key`.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |v| {
            matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Positive whole seconds.
    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.positive(key).map_or(default, Duration::from_secs)
    }

    /// Positive whole milliseconds.
    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.positive(key).map_or(default, Duration::from_millis)
    }

    fn positive(&self, key: &str) -> Option<u64> {
        let value = self.get(key)?.parse::<u64>().ok()?;
        if value == 0 {
            tracing::warn!(key, "Zero duration ignored, using default");
            return None;
        }
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<FirehoseConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FirehoseConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, FirehoseConfig::default());
        assert_eq!(config.subscription.buffer_size, 1000);
        assert_eq!(config.stream.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(config.stream.reconnect_delay_max, Duration::from_secs(120));
        assert_eq!(config.stream.read_timeout, Duration::from_secs(300));
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn lists_are_split_and_trimmed() {
        let config = load(&[
            ("FIREHOSE_COLLECTIONS", "app.bsky.feed.post, app.bsky.feed.like,,"),
            ("FIREHOSE_AUTHORS", "did:plc:a"),
            ("FIREHOSE_ENDPOINTS", "ws://localhost:6008/subscribe"),
        ])
        .unwrap();
        assert_eq!(
            config.subscription.collections,
            ["app.bsky.feed.post", "app.bsky.feed.like"]
        );
        assert_eq!(config.subscription.authors, ["did:plc:a"]);
        assert_eq!(config.stream.endpoints, ["ws://localhost:6008/subscribe"]);
    }

    #[test]
    fn cursor_is_parsed() {
        let config = load(&[("FIREHOSE_CURSOR", "1725911162329308")]).unwrap();
        assert_eq!(
            config.subscription.cursor.map(Cursor::as_micros),
            Some(1_725_911_162_329_308)
        );
    }

    #[test_case("yesterday" ; "not a number")]
    #[test_case("-10" ; "negative")]
    fn malformed_cursor_is_fatal(raw: &str) {
        let err = load(&[("FIREHOSE_CURSOR", raw)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCursor { key: "FIREHOSE_CURSOR", .. }));
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = load(&[
            ("FIREHOSE_BUFFER_SIZE", "lots"),
            ("FIREHOSE_HEALTH_PORT", "99999"),
        ])
        .unwrap();
        assert_eq!(config.subscription.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.server.health_port, 8083);
    }

    #[test_case("true", true)]
    #[test_case("1", true)]
    #[test_case("ON", true)]
    #[test_case("false", false)]
    #[test_case("nope", false)]
    fn flags(raw: &str, expected: bool) {
        let config = load(&[("FIREHOSE_REQUIRE_HELLO", raw)]).unwrap();
        assert_eq!(config.subscription.require_hello, expected);
    }

    #[test]
    fn client_config_carries_timing() {
        let config = load(&[
            ("FIREHOSE_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("FIREHOSE_RECONNECT_DELAY_MAX_SECS", "5"),
            ("FIREHOSE_PING_INTERVAL_SECS", "15"),
            ("FIREHOSE_ERROR_BUFFER_SIZE", "7"),
        ])
        .unwrap();
        let client = config.stream.client_config();
        assert_eq!(client.supervisor.backoff.floor, Duration::from_millis(250));
        assert_eq!(client.supervisor.backoff.ceiling, Duration::from_secs(5));
        assert_eq!(client.supervisor.heartbeat.ping_interval, Duration::from_secs(15));
        assert_eq!(client.error_buffer_size, 7);
    }

    #[test_case("FIREHOSE_PING_INTERVAL_SECS" ; "ping interval")]
    #[test_case("FIREHOSE_READ_TIMEOUT_SECS" ; "read timeout")]
    #[test_case("FIREHOSE_RECONNECT_DELAY_INITIAL_MS" ; "reconnect floor")]
    #[test_case("FIREHOSE_RECONNECT_DELAY_MAX_SECS" ; "reconnect ceiling")]
    #[test_case("FIREHOSE_HANDSHAKE_TIMEOUT_SECS" ; "handshake timeout")]
    fn zero_durations_fall_back(key: &str) {
        let config = load(&[(key, "0")]).unwrap();
        assert_eq!(config.stream, StreamSettings::default());
    }

    #[test]
    fn zero_timings_never_reach_the_supervisor() {
        let config = load(&[
            ("FIREHOSE_PING_INTERVAL_SECS", "0"),
            ("FIREHOSE_RECONNECT_DELAY_INITIAL_MS", "0"),
        ])
        .unwrap();
        let client = config.stream.client_config();
        assert_eq!(client.supervisor.heartbeat.ping_interval, Duration::from_secs(60));
        assert_eq!(client.supervisor.backoff.floor, Duration::from_secs(1));
    }

    #[test]
    fn compression_flag_is_refused() {
        let config = load(&[("FIREHOSE_COMPRESS", "true")]).unwrap();
        assert!(config.subscription.compress);
        assert_eq!(
            config.subscription.to_request().into_subscription().unwrap_err(),
            SubscriptionError::CompressionUnsupported
        );
    }

    #[test]
    fn credentials_need_both_parts() {
        let config = load(&[("FIREHOSE_IDENTIFIER", "alice.test")]).unwrap();
        assert!(config.auth.credentials().is_none());
        assert_eq!(config.auth.service, DEFAULT_SERVICE);

        let config = load(&[
            ("FIREHOSE_IDENTIFIER", "alice.test"),
            ("FIREHOSE_APP_PASSWORD", "abcd-efgh-ijkl-mnop"),
            ("FIREHOSE_PDS_HOST", "https://pds.example"),
        ])
        .unwrap();
        assert_eq!(config.auth.credentials(), Some(("alice.test", "abcd-efgh-ijkl-mnop")));
        assert_eq!(config.auth.service, "https://pds.example");
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let config = load(&[
            ("FIREHOSE_IDENTIFIER", "alice.test"),
            ("FIREHOSE_APP_PASSWORD", "abcd-efgh-ijkl-mnop"),
        ])
        .unwrap();
        let debug = format!("{:?}", config.auth);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("abcd-efgh"));
    }

    #[test]
    fn settings_become_a_valid_request() {
        let config = load(&[
            ("FIREHOSE_COLLECTIONS", "app.bsky.actor.profile"),
            ("FIREHOSE_CURSOR", "42"),
            ("FIREHOSE_BUFFER_SIZE", "16"),
        ])
        .unwrap();
        let subscription = config.subscription.to_request().into_subscription().unwrap();
        assert_eq!(subscription.collections(), ["app.bsky.actor.profile"]);
        assert_eq!(subscription.cursor().map(Cursor::as_micros), Some(42));
        assert_eq!(subscription.buffer_size(), 16);
    }
}
