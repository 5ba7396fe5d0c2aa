//! Post Types
//!
//! The rich, flattened representation of a feed post produced by record
//! conversion. Field shapes follow what consumers need (plain targets and
//! byte ranges for facets, direct URLs for embedded media) rather than the
//! lexicon's nested union structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content-addressed reference to a record: location plus content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrongRef {
    /// AT URI pointing at the record.
    pub uri: String,
    /// Content hash of the record.
    pub cid: String,
}

/// A feed post with its text, formatting, thread and embed information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPost {
    /// AT URI of the post record.
    pub uri: String,
    /// Content hash of the post record, when known.
    pub cid: Option<String>,
    /// Identity of the author.
    pub author: String,
    /// Client-declared creation time.
    pub created_at: DateTime<Utc>,
    /// Post text.
    pub text: String,
    /// Rich text annotations over `text`.
    pub facets: Vec<RichTextFacet>,
    /// Additional hashtags not present inline.
    pub tags: Vec<String>,
    /// Declared languages.
    pub languages: Vec<String>,
    /// Thread position, if this post is a reply.
    pub reply: Option<ReplyInfo>,
    /// Embedded media or record.
    pub embed: Option<Embed>,
}

impl FeedPost {
    /// Whether this post replies to another post.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        self.reply.is_some()
    }
}

/// Kind of rich text annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetKind {
    /// Hyperlink; target is the URI.
    Link,
    /// Account mention; target is the DID.
    Mention,
    /// Hashtag; target is the tag without `#`.
    Tag,
    /// Feature type not understood by this client.
    Unknown,
}

/// A rich text annotation over a UTF-8 byte range of the post text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextFacet {
    /// Annotation kind.
    pub kind: FacetKind,
    /// URI, DID or tag depending on `kind`.
    pub target: String,
    /// Inclusive start byte offset.
    pub byte_start: u64,
    /// Exclusive end byte offset.
    pub byte_end: u64,
}

/// Thread information for a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyInfo {
    /// The post being replied to.
    pub parent: StrongRef,
    /// The top-level post of the thread.
    pub root: Option<StrongRef>,
}

/// An image embedded in a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedImage {
    /// Alt text.
    pub alt_text: String,
    /// Blob URL, empty if the blob reference was missing.
    pub url: String,
}

/// An external link card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedLink {
    /// Target URL.
    pub url: String,
    /// Card title.
    pub title: String,
    /// Card description.
    pub description: String,
    /// Thumbnail blob URL, if any.
    pub thumb_url: Option<String>,
}

/// An embedded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedVideo {
    /// Blob URL, empty if the blob reference was missing.
    pub url: String,
    /// Alt text, if any.
    pub alt_text: Option<String>,
}

/// Embedded content of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Embed {
    /// One or more images.
    Images {
        /// The images, in display order.
        images: Vec<EmbedImage>,
    },
    /// External link card.
    External(EmbedLink),
    /// Quoted record.
    Record(StrongRef),
    /// Quoted record together with media.
    RecordWithMedia {
        /// The quoted record.
        record: StrongRef,
        /// The attached media.
        media: Box<Embed>,
    },
    /// Video.
    Video(EmbedVideo),
    /// Embed type not understood by this client.
    Unknown,
}

impl std::fmt::Display for Embed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Images { images } => write!(f, "Images({})", images.len()),
            Self::External(link) => write!(f, "External({})", link.url),
            Self::Record(record) => write!(f, "Record({})", record.uri),
            Self::RecordWithMedia { record, media } => {
                write!(f, "RecordWithMedia({}, {media})", record.uri)
            }
            Self::Video(video) => write!(f, "Video({})", video.url),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}
