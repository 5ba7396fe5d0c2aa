//! Event Classifier
//!
//! Maps a decoded [`Envelope`] to exactly one [`DomainEvent`] using the
//! taxonomy `kind -> collection -> operation`:
//!
//! | kind       | collection               | operation | payload            |
//! |------------|--------------------------|-----------|--------------------|
//! | `commit`   | `app.bsky.feed.post`     | create    | `Post`             |
//! | `commit`   | `app.bsky.feed.like`     | create    | `Reaction`         |
//! | `commit`   | `app.bsky.feed.repost`   | create    | `Share`            |
//! | `commit`   | `app.bsky.graph.follow`  | create    | `Relationship`     |
//! | `commit`   | `app.bsky.actor.profile` | create    | `Profile`          |
//! | `commit`   | any recognized           | `delete`  | `Delete`           |
//! | `commit`   | anything else            | any       | `Unrecognized`     |
//! | `identity` |                          |           | `Identity`         |
//! | `account`  |                          |           | `Account`          |
//! | other      |                          |           | `Unrecognized`     |
//!
//! Any operation other than `delete` is treated as create-or-update and
//! needs a record body. Unknown kinds and collections are never errors; they
//! surface as unrecognized events so upstream additions do not break the
//! stream.
//!
//! Identity and account events carry only what the envelope itself says
//! (identity, handle, status, sequence). No profile lookup is attempted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::application::ports::{ConversionError, RecordConverter};
use crate::domain::collection::{Collection, content_address};
use crate::domain::envelope::{AccountInfo, CommitInfo, Envelope, IdentityInfo};
use crate::domain::event::{
    AccountEvent, DeleteEvent, DomainEvent, EventPayload, IdentityEvent, ProfileEvent,
    RelationshipEvent, SubjectEvent,
};
use crate::infrastructure::atproto::records::{FollowRecord, ProfileRecord, SubjectRecord};

/// Repository mutation.
pub const KIND_COMMIT: &str = "commit";
/// Handle or identity document change.
pub const KIND_IDENTITY: &str = "identity";
/// Account status change.
pub const KIND_ACCOUNT: &str = "account";
/// The only operation that carries no record.
pub const OPERATION_DELETE: &str = "delete";

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while classifying a well-formed envelope.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// A `commit` envelope without its `commit` object.
    #[error("commit event is missing commit data")]
    MissingCommit,

    /// An `identity` envelope without its `identity` object.
    #[error("identity event is missing identity data")]
    MissingIdentity,

    /// An `account` envelope without its `account` object.
    #[error("account event is missing account data")]
    MissingAccount,

    /// A create or update without a record body.
    #[error("{operation} on {collection} is missing its record")]
    MissingPayload {
        /// Collection NSID.
        collection: String,
        /// Declared operation.
        operation: String,
    },

    /// The record does not match the collection's shape.
    #[error("malformed {collection} record: {source}")]
    Record {
        /// Collection the record was decoded as.
        collection: Collection,
        /// Shape mismatch.
        source: serde_json::Error,
    },

    /// The post converter rejected the record.
    #[error("post conversion failed: {0}")]
    Conversion(#[from] ConversionError),
}

// =============================================================================
// Classifier
// =============================================================================

/// Stateless envelope classifier.
#[derive(Clone)]
pub struct EventClassifier {
    converter: Arc<dyn RecordConverter>,
}

impl std::fmt::Debug for EventClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventClassifier").finish_non_exhaustive()
    }
}

impl EventClassifier {
    /// Create a classifier delegating post records to `converter`.
    #[must_use]
    pub fn new(converter: Arc<dyn RecordConverter>) -> Self {
        Self { converter }
    }

    /// Classify one envelope.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError` if a recognized kind lacks its sub-object, a
    /// recognized create/update lacks its record, or the record is malformed.
    pub fn classify(&self, envelope: Envelope) -> Result<DomainEvent, ClassifyError> {
        self.classify_shared(Arc::new(envelope))
    }

    /// Classify an envelope the caller keeps a handle to.
    ///
    /// # Errors
    ///
    /// Same as [`EventClassifier::classify`].
    pub fn classify_shared(&self, envelope: Arc<Envelope>) -> Result<DomainEvent, ClassifyError> {
        let payload = self.payload(&envelope)?;
        Ok(DomainEvent::new(envelope, payload))
    }

    fn payload(&self, envelope: &Envelope) -> Result<EventPayload, ClassifyError> {
        match envelope.kind.as_str() {
            KIND_COMMIT => {
                let commit = envelope.commit.as_ref().ok_or(ClassifyError::MissingCommit)?;
                self.commit_payload(&envelope.did, commit)
            }
            KIND_IDENTITY => {
                let identity = envelope
                    .identity
                    .as_ref()
                    .ok_or(ClassifyError::MissingIdentity)?;
                Ok(EventPayload::Identity(identity_event(identity)))
            }
            KIND_ACCOUNT => {
                let account = envelope
                    .account
                    .as_ref()
                    .ok_or(ClassifyError::MissingAccount)?;
                Ok(EventPayload::Account(account_event(account)))
            }
            _ => Ok(EventPayload::Unrecognized),
        }
    }

    fn commit_payload(&self, did: &str, commit: &CommitInfo) -> Result<EventPayload, ClassifyError> {
        let Some(collection) = Collection::from_nsid(&commit.collection) else {
            return Ok(EventPayload::Unrecognized);
        };

        let uri = content_address(did, &commit.collection, &commit.rkey);

        if commit.operation == OPERATION_DELETE {
            return Ok(EventPayload::Delete(DeleteEvent {
                collection: commit.collection.clone(),
                record_key: commit.rkey.clone(),
                uri,
            }));
        }

        let record = commit
            .record
            .as_ref()
            .filter(|record| !is_empty_record(record))
            .ok_or_else(|| ClassifyError::MissingPayload {
                collection: commit.collection.clone(),
                operation: commit.operation.clone(),
            })?;

        let payload = match collection {
            Collection::Post => {
                let mut post = self.converter.convert_post(record, did)?;
                post.uri = uri;
                post.cid.clone_from(&commit.cid);
                EventPayload::Post(Box::new(post))
            }
            Collection::Like => {
                let like: SubjectRecord = decode_record(collection, record)?;
                EventPayload::Reaction(SubjectEvent {
                    subject: like.subject,
                    uri,
                    created_at: parse_time(&like.created_at),
                })
            }
            Collection::Repost => {
                let repost: SubjectRecord = decode_record(collection, record)?;
                EventPayload::Share(SubjectEvent {
                    subject: repost.subject,
                    uri,
                    created_at: parse_time(&repost.created_at),
                })
            }
            Collection::Follow => {
                let follow: FollowRecord = decode_record(collection, record)?;
                EventPayload::Relationship(RelationshipEvent {
                    subject: follow.subject,
                    uri,
                    created_at: parse_time(&follow.created_at),
                })
            }
            Collection::Profile => {
                let profile: ProfileRecord = decode_record(collection, record)?;
                EventPayload::Profile(ProfileEvent {
                    did: did.to_string(),
                    display_name: profile.display_name,
                    description: profile.description,
                    avatar: profile.avatar.map(|blob| blob.cid().to_string()),
                })
            }
        };

        Ok(payload)
    }
}

fn decode_record<T: DeserializeOwned>(
    collection: Collection,
    record: &serde_json::Value,
) -> Result<T, ClassifyError> {
    T::deserialize(record).map_err(|source| ClassifyError::Record { collection, source })
}

fn is_empty_record(record: &serde_json::Value) -> bool {
    record.is_null() || record.as_object().is_some_and(serde_json::Map::is_empty)
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn identity_event(identity: &IdentityInfo) -> IdentityEvent {
    IdentityEvent {
        did: identity.did.clone(),
        handle: identity.handle.clone(),
        seq: identity.seq,
        time: parse_time(&identity.time),
    }
}

fn account_event(account: &AccountInfo) -> AccountEvent {
    AccountEvent {
        did: account.did.clone(),
        active: account.active,
        status: account.status.clone(),
        seq: account.seq,
        time: parse_time(&account.time),
    }
}
