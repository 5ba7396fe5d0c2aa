//! Domain Events
//!
//! The typed unit delivered to consumers. Each event carries exactly one
//! kind-specific payload; the payload is a sum type so a multiply-populated
//! or empty event cannot be constructed. The event kind is derived from the
//! payload instead of being stored next to it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::envelope::Envelope;
use super::post::{FeedPost, StrongRef};

// =============================================================================
// Event Kind
// =============================================================================

/// Closed enumeration of domain event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A post was created or updated.
    ContentCreated,
    /// A like was created.
    ReactionCreated,
    /// A repost was created.
    ShareCreated,
    /// A follow was created.
    RelationshipCreated,
    /// A profile record was created or updated.
    ProfileUpdated,
    /// A record in a recognized collection was deleted.
    RecordDeleted,
    /// An identity (handle) changed.
    IdentityChanged,
    /// An account's active status changed.
    AccountStatusChanged,
    /// Well-formed message of a kind or collection this client does not classify.
    Unrecognized,
}

impl EventKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContentCreated => "content_created",
            Self::ReactionCreated => "reaction_created",
            Self::ShareCreated => "share_created",
            Self::RelationshipCreated => "relationship_created",
            Self::ProfileUpdated => "profile_updated",
            Self::RecordDeleted => "record_deleted",
            Self::IdentityChanged => "identity_changed",
            Self::AccountStatusChanged => "account_status_changed",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sub-events
// =============================================================================

/// Deletion of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteEvent {
    /// Collection NSID of the deleted record.
    pub collection: String,
    /// Record key of the deleted record.
    pub record_key: String,
    /// Content address of the deleted record.
    pub uri: String,
}

/// A like or repost pointing at a subject record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectEvent {
    /// The record being liked or reposted.
    pub subject: StrongRef,
    /// Content address of the like/repost record itself.
    pub uri: String,
    /// Client-declared creation time, if parseable.
    pub created_at: Option<DateTime<Utc>>,
}

/// A follow of another identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipEvent {
    /// Identity being followed.
    pub subject: String,
    /// Content address of the follow record.
    pub uri: String,
    /// Client-declared creation time, if parseable.
    pub created_at: Option<DateTime<Utc>>,
}

/// A profile record change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileEvent {
    /// Identity owning the profile.
    pub did: String,
    /// Display name, if set.
    pub display_name: Option<String>,
    /// Profile description, if set.
    pub description: Option<String>,
    /// Content hash of the avatar blob, if set.
    pub avatar: Option<String>,
}

/// Out-of-band identity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityEvent {
    /// Identity that changed.
    pub did: String,
    /// Updated handle, if provided.
    pub handle: Option<String>,
    /// Server-assigned sequence number.
    pub seq: i64,
    /// Time of the change, if parseable.
    pub time: Option<DateTime<Utc>>,
}

/// Out-of-band account status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountEvent {
    /// Account identity.
    pub did: String,
    /// Whether the account is active.
    pub active: bool,
    /// Status reason when inactive.
    pub status: Option<String>,
    /// Server-assigned sequence number.
    pub seq: i64,
    /// Time of the change, if parseable.
    pub time: Option<DateTime<Utc>>,
}

// =============================================================================
// Payload
// =============================================================================

/// Kind-specific payload; exactly one case per event kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Post created or updated.
    Post(Box<FeedPost>),
    /// Like created.
    Reaction(SubjectEvent),
    /// Repost created.
    Share(SubjectEvent),
    /// Follow created.
    Relationship(RelationshipEvent),
    /// Profile created or updated.
    Profile(ProfileEvent),
    /// Record deleted.
    Delete(DeleteEvent),
    /// Identity changed.
    Identity(IdentityEvent),
    /// Account status changed.
    Account(AccountEvent),
    /// Not classified; inspect the raw envelope.
    Unrecognized,
}

impl EventPayload {
    /// The event kind this payload represents.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Post(_) => EventKind::ContentCreated,
            Self::Reaction(_) => EventKind::ReactionCreated,
            Self::Share(_) => EventKind::ShareCreated,
            Self::Relationship(_) => EventKind::RelationshipCreated,
            Self::Profile(_) => EventKind::ProfileUpdated,
            Self::Delete(_) => EventKind::RecordDeleted,
            Self::Identity(_) => EventKind::IdentityChanged,
            Self::Account(_) => EventKind::AccountStatusChanged,
            Self::Unrecognized => EventKind::Unrecognized,
        }
    }
}

// =============================================================================
// Domain Event
// =============================================================================

/// A classified firehose event.
///
/// Constructed once per wire message and never mutated afterwards. The
/// original envelope is shared, not copied, so retaining it for
/// diagnostics costs one reference count.
#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent {
    /// Time marker in Unix microseconds; usable as a resume cursor.
    pub sequence: i64,
    /// Originating identity.
    pub repo: String,
    /// `sequence` as a UTC timestamp.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload.
    pub payload: EventPayload,
    /// The envelope this event was classified from.
    #[serde(skip)]
    pub raw: Arc<Envelope>,
}

impl DomainEvent {
    /// Build an event from its envelope and classified payload.
    #[must_use]
    pub fn new(raw: Arc<Envelope>, payload: EventPayload) -> Self {
        let timestamp = DateTime::from_timestamp_micros(raw.time_us).unwrap_or(DateTime::UNIX_EPOCH);
        Self {
            sequence: raw.time_us,
            repo: raw.did.clone(),
            timestamp,
            payload,
            raw,
        }
    }

    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// The post payload, if this is a content event.
    #[must_use]
    pub fn post(&self) -> Option<&FeedPost> {
        match &self.payload {
            EventPayload::Post(post) => Some(post),
            _ => None,
        }
    }

    /// The deletion payload, if this is a delete event.
    #[must_use]
    pub const fn deletion(&self) -> Option<&DeleteEvent> {
        match &self.payload {
            EventPayload::Delete(delete) => Some(delete),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(time_us: i64) -> Arc<Envelope> {
        Arc::new(Envelope {
            did: "did:plc:abc".to_string(),
            time_us,
            kind: "mystery".to_string(),
            commit: None,
            identity: None,
            account: None,
        })
    }

    #[test]
    fn kind_follows_payload() {
        let event = DomainEvent::new(envelope(1), EventPayload::Unrecognized);
        assert_eq!(event.kind(), EventKind::Unrecognized);

        let event = DomainEvent::new(
            envelope(1),
            EventPayload::Delete(DeleteEvent {
                collection: "app.bsky.feed.post".to_string(),
                record_key: "abc".to_string(),
                uri: "at://did:plc:abc/app.bsky.feed.post/abc".to_string(),
            }),
        );
        assert_eq!(event.kind(), EventKind::RecordDeleted);
        assert!(event.deletion().is_some());
        assert!(event.post().is_none());
    }

    #[test]
    fn timestamp_from_microseconds() {
        let event = DomainEvent::new(envelope(1_725_911_162_329_308), EventPayload::Unrecognized);
        assert_eq!(event.sequence, 1_725_911_162_329_308);
        assert_eq!(event.timestamp.timestamp(), 1_725_911_162);
        assert_eq!(event.timestamp.timestamp_subsec_micros(), 329_308);
        assert_eq!(event.repo, "did:plc:abc");
    }

    #[test]
    fn kind_labels_are_snake_case() {
        assert_eq!(EventKind::AccountStatusChanged.as_str(), "account_status_changed");
        assert_eq!(EventKind::RecordDeleted.to_string(), "record_deleted");
    }
}
