//! Lexicon Records
//!
//! Serde shapes for the record bodies carried in commit events. Decoding is
//! strict about required fields and lenient about unknown ones, so newer
//! clients adding fields do not break classification.

use serde::Deserialize;

use crate::domain::post::StrongRef;

// =============================================================================
// Shared
// =============================================================================

/// `$link` wrapper around a CID.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CidLink {
    /// The CID string.
    #[serde(rename = "$link")]
    pub link: String,
}

/// Reference to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlobRef {
    /// Content hash of the blob.
    #[serde(rename = "ref")]
    pub reference: CidLink,
}

impl BlobRef {
    /// The blob's CID.
    #[must_use]
    pub fn cid(&self) -> &str {
        &self.reference.link
    }
}

// =============================================================================
// Interaction Records
// =============================================================================

/// `app.bsky.feed.like` and `app.bsky.feed.repost`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    /// The liked or reposted record.
    pub subject: StrongRef,
    /// Client-declared creation time.
    pub created_at: String,
}

/// `app.bsky.graph.follow`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRecord {
    /// DID being followed.
    pub subject: String,
    /// Client-declared creation time.
    pub created_at: String,
}

/// `app.bsky.actor.profile`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<BlobRef>,
}

// =============================================================================
// Post Record
// =============================================================================

/// `app.bsky.feed.post`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub text: String,
    pub created_at: String,
    #[serde(default)]
    pub facets: Vec<FacetRecord>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub langs: Vec<String>,
    #[serde(default)]
    pub embed: Option<EmbedRecord>,
    #[serde(default)]
    pub reply: Option<ReplyRecord>,
}

/// Reply thread references.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyRecord {
    pub parent: StrongRef,
    #[serde(default)]
    pub root: Option<StrongRef>,
}

/// `app.bsky.richtext.facet`.
#[derive(Debug, Clone, Deserialize)]
pub struct FacetRecord {
    pub index: ByteSlice,
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

/// UTF-8 byte range of a facet.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: u64,
    pub byte_end: u64,
}

/// A facet feature, discriminated by `$type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
    #[serde(other)]
    Unknown,
}

/// An embed union, discriminated by `$type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum EmbedRecord {
    #[serde(rename = "app.bsky.embed.images")]
    Images { images: Vec<ImageRecord> },
    #[serde(rename = "app.bsky.embed.external")]
    External { external: ExternalRecord },
    #[serde(rename = "app.bsky.embed.record")]
    Record { record: StrongRef },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia {
        record: QuotedRecord,
        media: Box<EmbedRecord>,
    },
    #[serde(rename = "app.bsky.embed.video")]
    Video {
        #[serde(default)]
        video: Option<BlobRef>,
        #[serde(default)]
        alt: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageRecord {
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub image: Option<BlobRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalRecord {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumb: Option<BlobRef>,
}

/// `app.bsky.embed.record` nested inside a record-with-media embed.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotedRecord {
    pub record: StrongRef,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn blob_ref_exposes_cid() {
        let blob: BlobRef = serde_json::from_value(json!({
            "$type": "blob",
            "ref": { "$link": "bafkreiabc" },
            "mimeType": "image/jpeg",
            "size": 1024
        }))
        .unwrap();
        assert_eq!(blob.cid(), "bafkreiabc");
    }

    #[test]
    fn unknown_facet_feature_tolerated() {
        let facet: FacetRecord = serde_json::from_value(json!({
            "index": { "byteStart": 0, "byteEnd": 4 },
            "features": [{ "$type": "app.bsky.richtext.facet#bold" }]
        }))
        .unwrap();
        assert!(matches!(facet.features[0], FacetFeature::Unknown));
    }

    #[test]
    fn unknown_embed_tolerated() {
        let embed: EmbedRecord = serde_json::from_value(json!({
            "$type": "app.bsky.embed.gallery",
            "items": []
        }))
        .unwrap();
        assert!(matches!(embed, EmbedRecord::Unknown));
    }

    #[test]
    fn like_requires_subject() {
        let result: Result<SubjectRecord, _> = serde_json::from_value(json!({
            "$type": "app.bsky.feed.like",
            "createdAt": "2024-09-09T19:46:02.102Z"
        }));
        assert!(result.is_err());
    }
}
