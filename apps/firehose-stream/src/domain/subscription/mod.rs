//! Subscription Request
//!
//! Caller-supplied configuration for one firehose subscription: which
//! collections and authors to receive, where to resume, how large the
//! delivery queue is, and which transport options to request.
//!
//! # Lifecycle
//!
//! A `SubscriptionRequest` is built with `with_*` methods and checked once
//! by [`SubscriptionRequest::into_subscription`]. The resulting
//! [`Subscription`] is immutable and shared by every connection attempt of
//! the stream.
//!
//! Filter lists larger than the server maxima are accepted here and
//! truncated when the connection target is built.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::collection::Collection;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of collection filters the server accepts.
pub const MAX_COLLECTIONS: usize = 100;

/// Maximum number of author filters the server accepts.
pub const MAX_AUTHORS: usize = 10_000;

/// Delivery queue capacity when the caller does not choose one.
pub const DEFAULT_BUFFER_SIZE: usize = 1_000;

// =============================================================================
// Errors
// =============================================================================

/// Structurally invalid subscription configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Resume position is negative.
    #[error("invalid cursor {0}: must be a non-negative Unix microsecond timestamp")]
    NegativeCursor(i64),

    /// Resume position could not be parsed.
    #[error("invalid cursor {0:?}: expected an integer Unix microsecond timestamp")]
    MalformedCursor(String),

    /// Collection filter is empty or contains characters that would corrupt the query.
    #[error("invalid collection filter {0:?}")]
    InvalidCollection(String),

    /// Author filter is empty or contains characters that would corrupt the query.
    #[error("invalid author filter {0:?}")]
    InvalidAuthor(String),

    /// Compressed frames need the server's zstd dictionary, which is not bundled.
    #[error("compressed subscriptions are not supported")]
    CompressionUnsupported,
}

// =============================================================================
// Cursor
// =============================================================================

/// Resume position: a Unix microsecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(i64);

impl Cursor {
    /// Create a cursor from Unix microseconds.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::NegativeCursor` for negative values.
    pub const fn from_micros(micros: i64) -> Result<Self, SubscriptionError> {
        if micros < 0 {
            return Err(SubscriptionError::NegativeCursor(micros));
        }
        Ok(Self(micros))
    }

    /// Parse a cursor from its decimal string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not an integer or is negative.
    pub fn parse(value: &str) -> Result<Self, SubscriptionError> {
        let micros = value
            .trim()
            .parse::<i64>()
            .map_err(|_| SubscriptionError::MalformedCursor(value.to_string()))?;
        Self::from_micros(micros)
    }

    /// Cursor positioned at a wall-clock time.
    #[must_use]
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let micros = time.timestamp_micros();
        Self(micros.max(0))
    }

    /// Unix microseconds.
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Subscription Request
// =============================================================================

/// Builder-style subscription configuration supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRequest {
    collections: Vec<String>,
    authors: Vec<String>,
    cursor: Option<i64>,
    buffer_size: Option<usize>,
    compression: bool,
    require_hello: bool,
}

impl SubscriptionRequest {
    /// Empty request: default collections, no author filter, live tail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by collection NSIDs.
    #[must_use]
    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    /// Filter by author identities.
    #[must_use]
    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    /// Resume from a Unix microsecond timestamp.
    #[must_use]
    pub const fn with_cursor(mut self, micros: i64) -> Self {
        self.cursor = Some(micros);
        self
    }

    /// Delivery queue capacity; zero selects the default.
    #[must_use]
    pub const fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Request compressed frames. Refused by [`Self::into_subscription`].
    #[must_use]
    pub const fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Ask the server to hold events until the client sends its options.
    #[must_use]
    pub const fn with_require_hello(mut self, enabled: bool) -> Self {
        self.require_hello = enabled;
        self
    }

    /// Validate and apply defaults.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError` if the cursor is negative, a filter
    /// value is empty or contains query metacharacters, or compression was
    /// requested.
    pub fn into_subscription(self) -> Result<Subscription, SubscriptionError> {
        let cursor = self.cursor.map(Cursor::from_micros).transpose()?;
        if self.compression {
            return Err(SubscriptionError::CompressionUnsupported);
        }

        for collection in &self.collections {
            if !is_query_safe(collection) {
                return Err(SubscriptionError::InvalidCollection(collection.clone()));
            }
        }
        for author in &self.authors {
            if !is_query_safe(author) {
                return Err(SubscriptionError::InvalidAuthor(author.clone()));
            }
        }

        let collections = if self.collections.is_empty() {
            Collection::DEFAULT_SUBSCRIBED
                .iter()
                .map(|c| c.nsid().to_string())
                .collect()
        } else {
            self.collections
        };

        let buffer_size = match self.buffer_size {
            Some(0) | None => DEFAULT_BUFFER_SIZE,
            Some(size) => size,
        };

        Ok(Subscription {
            collections,
            authors: self.authors,
            cursor,
            buffer_size,
            require_hello: self.require_hello,
        })
    }
}

fn is_query_safe(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '&' | '=' | '?' | '#'))
}

// =============================================================================
// Subscription
// =============================================================================

/// Validated, immutable subscription configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    collections: Vec<String>,
    authors: Vec<String>,
    cursor: Option<Cursor>,
    buffer_size: usize,
    require_hello: bool,
}

impl Subscription {
    /// Collection filters, never empty.
    #[must_use]
    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    /// Author filters; empty means all authors.
    #[must_use]
    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    /// Initial resume position.
    #[must_use]
    pub const fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Delivery queue capacity.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether the server should wait for an options message.
    #[must_use]
    pub const fn require_hello(&self) -> bool {
        self.require_hello
    }
}
