//! Port Interfaces
//!
//! Defines the interfaces (ports) for external collaborators following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RecordConverter`: Turns a raw post record into a [`FeedPost`]
//! - `SessionProvider`: Refreshes an authenticated session

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::post::FeedPost;
use crate::domain::session::{Session, SessionError};

// =============================================================================
// Record Conversion
// =============================================================================

/// Errors raised while converting a record into a domain object.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The record does not match the expected shape.
    #[error("record does not match expected shape: {0}")]
    Shape(#[from] serde_json::Error),

    /// The record's creation time is not RFC 3339.
    #[error("invalid createdAt {value:?}: {reason}")]
    InvalidCreatedAt {
        /// Raw value on the wire.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A rich text facet does not carry exactly one feature.
    #[error("facet {index} has {features} features, expected exactly 1")]
    InvalidFacet {
        /// Position of the facet in the record.
        index: usize,
        /// Number of features found.
        features: usize,
    },
}

/// Converts raw post-shaped records into rich posts.
///
/// The pipeline treats implementations as opaque and reports their errors
/// verbatim as per-message classification failures.
#[cfg_attr(test, mockall::automock)]
pub trait RecordConverter: Send + Sync {
    /// Convert a raw post record authored by `author`.
    ///
    /// The returned post's `uri` and `cid` are filled in by the caller.
    ///
    /// # Errors
    ///
    /// Returns `ConversionError` if the record is malformed.
    fn convert_post(
        &self,
        record: &serde_json::Value,
        author: &str,
    ) -> Result<FeedPost, ConversionError>;
}

// =============================================================================
// Session API
// =============================================================================

/// Source of renewed sessions.
///
/// The renewal scheduler depends only on "give me a new session, or an
/// error"; login and token storage live behind this port.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Exchange `current`'s refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the server rejects the refresh or the
    /// response cannot be interpreted.
    async fn refresh(&self, current: &Session) -> Result<Session, SessionError>;
}
