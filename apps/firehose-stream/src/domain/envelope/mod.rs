//! Wire Envelope
//!
//! The generic shape every Jetstream message shares before kind-specific
//! interpretation. Only the routing fields are typed here; commit records
//! stay as raw JSON until the classifier picks a decoder for them.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "did": "did:plc:abc",
//!   "time_us": 1725911162329308,
//!   "kind": "commit",
//!   "commit": {
//!     "rev": "3l3qo2vutsw2b",
//!     "operation": "create",
//!     "collection": "app.bsky.feed.like",
//!     "rkey": "3l3qo2vuowo2b",
//!     "record": { "...": "..." },
//!     "cid": "bafyreidwaivazkwu67xztlmuobx35hs2lnfh3kolmgfmucldvhd3sgzcqi"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Top-level envelope of a single Jetstream message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating repository identity (DID).
    pub did: String,

    /// Server time marker in Unix microseconds.
    pub time_us: i64,

    /// Top-level event kind ("commit", "identity", "account", ...).
    pub kind: String,

    /// Repository mutation, present for `commit` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitInfo>,

    /// Identity change, present for `identity` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityInfo>,

    /// Account status change, present for `account` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountInfo>,
}

/// A single repository mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Repository revision.
    #[serde(default)]
    pub rev: String,

    /// Operation name ("create", "update", "delete").
    pub operation: String,

    /// Collection NSID of the affected record.
    pub collection: String,

    /// Record key within the collection.
    pub rkey: String,

    /// Record body for create/update operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,

    /// Content hash of the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Handle or identity document change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    /// Identity whose document changed.
    pub did: String,

    /// Updated handle, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,

    /// Server-assigned sequence number.
    pub seq: i64,

    /// RFC 3339 time of the change.
    #[serde(default)]
    pub time: String,
}

/// Account lifecycle status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Whether the account is active.
    pub active: bool,

    /// Identity of the account.
    pub did: String,

    /// Server-assigned sequence number.
    pub seq: i64,

    /// Status reason when inactive ("takendown", "suspended", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// RFC 3339 time of the change.
    #[serde(default)]
    pub time: String,
}
