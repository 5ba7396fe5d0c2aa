//! Connection Targets
//!
//! Picks one of several equivalent Jetstream instances per connection
//! attempt and serializes a [`Subscription`] into its query string.
//!
//! # Query Parameters
//!
//! - `wantedCollections`: repeated, at most [`MAX_COLLECTIONS`]
//! - `wantedDids`: repeated, at most [`MAX_AUTHORS`]
//! - `cursor`: resume position in Unix microseconds
//! - `requireHello=true`: sent only when enabled
//!
//! Oversized filter lists are truncated, not rejected. The server enforces
//! the same limits and would otherwise refuse the connection.

use rand::Rng;

use crate::domain::subscription::{Cursor, MAX_AUTHORS, MAX_COLLECTIONS, Subscription};

/// Public Jetstream instances.
pub const DEFAULT_ENDPOINTS: [&str; 4] = [
    "wss://jetstream1.us-east.bsky.network/subscribe",
    "wss://jetstream2.us-east.bsky.network/subscribe",
    "wss://jetstream1.us-west.bsky.network/subscribe",
    "wss://jetstream2.us-west.bsky.network/subscribe",
];

/// Random choice among equivalent endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPool {
    endpoints: Vec<String>,
}

impl Default for EndpointPool {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl EndpointPool {
    /// Create a pool. Falls back to the public instances if `endpoints` is empty.
    #[must_use]
    pub fn new(endpoints: Vec<String>) -> Self {
        if endpoints.is_empty() {
            Self::default()
        } else {
            Self { endpoints }
        }
    }

    /// Pick an endpoint uniformly at random.
    #[must_use]
    pub fn pick(&self) -> &str {
        let index = rand::rng().random_range(0..self.endpoints.len());
        &self.endpoints[index]
    }
}

/// Build the connection URL for `subscription` against `endpoint`.
///
/// `cursor` overrides the subscription's own resume position, so a
/// reconnect can resume from the last event seen.
#[must_use]
pub fn connection_target(endpoint: &str, subscription: &Subscription, cursor: Option<Cursor>) -> String {
    let collections = subscription.collections();
    if collections.len() > MAX_COLLECTIONS {
        tracing::debug!(
            requested = collections.len(),
            max = MAX_COLLECTIONS,
            "Truncating collection filters"
        );
    }
    let authors = subscription.authors();
    if authors.len() > MAX_AUTHORS {
        tracing::debug!(
            requested = authors.len(),
            max = MAX_AUTHORS,
            "Truncating author filters"
        );
    }

    let mut params: Vec<String> = collections
        .iter()
        .take(MAX_COLLECTIONS)
        .map(|c| format!("wantedCollections={c}"))
        .chain(
            authors
                .iter()
                .take(MAX_AUTHORS)
                .map(|did| format!("wantedDids={did}")),
        )
        .collect();

    if let Some(cursor) = cursor.or_else(|| subscription.cursor()) {
        params.push(format!("cursor={cursor}"));
    }
    if subscription.require_hello() {
        params.push("requireHello=true".to_string());
    }

    if params.is_empty() {
        return endpoint.to_string();
    }
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}{}", params.join("&"))
}

/// Subscriber options message that starts a `requireHello` stream.
#[must_use]
pub fn options_update(subscription: &Subscription) -> serde_json::Value {
    serde_json::json!({
        "type": "options_update",
        "payload": {
            "wantedCollections": subscription.collections().iter().take(MAX_COLLECTIONS).collect::<Vec<_>>(),
            "wantedDids": subscription.authors().iter().take(MAX_AUTHORS).collect::<Vec<_>>(),
            "maxMessageSizeBytes": 0,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SubscriptionRequest;

    const ENDPOINT: &str = "wss://jetstream.test/subscribe";

    fn count(url: &str, key: &str) -> usize {
        url.split(['?', '&']).filter(|p| p.starts_with(key)).count()
    }

    #[test]
    fn default_target_lists_default_collections() {
        let sub = SubscriptionRequest::new().into_subscription().unwrap();
        let url = connection_target(ENDPOINT, &sub, None);

        assert!(url.starts_with("wss://jetstream.test/subscribe?wantedCollections=app.bsky.feed.post&"));
        assert_eq!(count(&url, "wantedCollections="), 4);
        assert!(!url.contains("cursor="));
        assert!(!url.contains("compress"));
    }

    #[test]
    fn options_and_cursor_serialized() {
        let sub = SubscriptionRequest::new()
            .with_collections(["app.bsky.feed.like"])
            .with_authors(["did:plc:a", "did:plc:b"])
            .with_cursor(1_725_911_162_329_308)
            .with_require_hello(true)
            .into_subscription()
            .unwrap();

        let url = connection_target(ENDPOINT, &sub, None);
        assert_eq!(
            url,
            "wss://jetstream.test/subscribe?wantedCollections=app.bsky.feed.like\
             &wantedDids=did:plc:a&wantedDids=did:plc:b\
             &cursor=1725911162329308&requireHello=true"
        );
    }

    #[test]
    fn resume_cursor_overrides_initial() {
        let sub = SubscriptionRequest::new().with_cursor(100).into_subscription().unwrap();
        let resume = Cursor::from_micros(200).unwrap();

        let url = connection_target(ENDPOINT, &sub, Some(resume));
        assert!(url.contains("cursor=200"));
        assert!(!url.contains("cursor=100"));
    }

    #[test]
    fn oversized_filters_truncated() {
        let collections: Vec<String> = (0..150).map(|i| format!("com.example.c{i}")).collect();
        let authors: Vec<String> = (0..10_050).map(|i| format!("did:plc:{i}")).collect();
        let sub = SubscriptionRequest::new()
            .with_collections(collections)
            .with_authors(authors)
            .into_subscription()
            .unwrap();

        let url = connection_target(ENDPOINT, &sub, None);
        assert_eq!(count(&url, "wantedCollections="), MAX_COLLECTIONS);
        assert_eq!(count(&url, "wantedDids="), MAX_AUTHORS);
        // The first entries are kept.
        assert!(url.contains("wantedCollections=com.example.c0&"));
        assert!(!url.contains("com.example.c100"));
    }

    #[test]
    fn options_update_lists_filters() {
        let sub = SubscriptionRequest::new()
            .with_collections(["app.bsky.feed.post"])
            .with_authors(["did:plc:a"])
            .with_require_hello(true)
            .into_subscription()
            .unwrap();

        let message = options_update(&sub);
        assert_eq!(message["type"], "options_update");
        assert_eq!(message["payload"]["wantedCollections"][0], "app.bsky.feed.post");
        assert_eq!(message["payload"]["wantedDids"][0], "did:plc:a");
    }

    #[test]
    fn pool_picks_member() {
        let pool = EndpointPool::default();
        for _ in 0..32 {
            assert!(DEFAULT_ENDPOINTS.contains(&pool.pick()));
        }
    }

    #[test]
    fn empty_pool_falls_back_to_public_instances() {
        let pool = EndpointPool::new(Vec::new());
        assert_eq!(pool, EndpointPool::default());

        let single = EndpointPool::new(vec![ENDPOINT.to_string()]);
        assert_eq!(single.pick(), ENDPOINT);
    }
}
