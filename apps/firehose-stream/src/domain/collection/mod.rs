//! Recognized Collections
//!
//! The closed set of record collections the classifier understands. Every
//! other collection NSID maps to `None` and surfaces downstream as an
//! unrecognized event rather than an error.

use serde::{Deserialize, Serialize};

/// URI scheme used for content addresses.
pub const AT_URI_SCHEME: &str = "at";

/// A record collection with a dedicated payload decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// `app.bsky.feed.post`
    Post,
    /// `app.bsky.feed.like`
    Like,
    /// `app.bsky.feed.repost`
    Repost,
    /// `app.bsky.graph.follow`
    Follow,
    /// `app.bsky.actor.profile`
    Profile,
}

impl Collection {
    /// All recognized collections.
    pub const ALL: [Self; 5] = [
        Self::Post,
        Self::Like,
        Self::Repost,
        Self::Follow,
        Self::Profile,
    ];

    /// Collections subscribed to when the caller names none.
    pub const DEFAULT_SUBSCRIBED: [Self; 4] = [Self::Post, Self::Like, Self::Repost, Self::Follow];

    /// The NSID used on the wire.
    #[must_use]
    pub const fn nsid(self) -> &'static str {
        match self {
            Self::Post => "app.bsky.feed.post",
            Self::Like => "app.bsky.feed.like",
            Self::Repost => "app.bsky.feed.repost",
            Self::Follow => "app.bsky.graph.follow",
            Self::Profile => "app.bsky.actor.profile",
        }
    }

    /// Resolve a wire NSID by exact, case-sensitive match.
    #[must_use]
    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.nsid() == nsid)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.nsid())
    }
}

/// Build the content address `at://<did>/<collection>/<rkey>` of a record.
#[must_use]
pub fn content_address(did: &str, collection: &str, rkey: &str) -> String {
    format!("{AT_URI_SCHEME}://{did}/{collection}/{rkey}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nsid_round_trips_for_every_collection() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_nsid(collection.nsid()), Some(collection));
        }
    }

    #[test]
    fn from_nsid_is_exact() {
        assert_eq!(Collection::from_nsid("app.bsky.feed.post"), Some(Collection::Post));
        assert_eq!(Collection::from_nsid("APP.BSKY.FEED.POST"), None);
        assert_eq!(Collection::from_nsid("app.bsky.feed.post "), None);
        assert_eq!(Collection::from_nsid("app.bsky.feed.postgate"), None);
        assert_eq!(Collection::from_nsid("app.bsky.graph.block"), None);
    }

    #[test]
    fn content_address_format() {
        assert_eq!(
            content_address("id-123", "content-post", "abc"),
            "at://id-123/content-post/abc"
        );
        assert_eq!(
            content_address("did:plc:xyz", Collection::Like.nsid(), "3k2"),
            "at://did:plc:xyz/app.bsky.feed.like/3k2"
        );
    }
}
