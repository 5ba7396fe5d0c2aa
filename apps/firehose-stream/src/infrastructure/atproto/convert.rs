//! Post Conversion
//!
//! Turns a raw `app.bsky.feed.post` record into a [`FeedPost`]: flattens
//! facet and embed unions and resolves blob references into fetchable URLs.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::records::{BlobRef, EmbedRecord, FacetFeature, FacetRecord, PostRecord};
use crate::application::ports::{ConversionError, RecordConverter};
use crate::domain::post::{
    Embed, EmbedImage, EmbedLink, EmbedVideo, FacetKind, FeedPost, ReplyInfo, RichTextFacet,
};

/// Service host used to build blob URLs when none is configured.
pub const DEFAULT_BLOB_HOST: &str = "https://bsky.social";

/// `RecordConverter` for AT Protocol post records.
#[derive(Debug, Clone)]
pub struct AtprotoConverter {
    blob_host: String,
}

impl Default for AtprotoConverter {
    fn default() -> Self {
        Self::new(DEFAULT_BLOB_HOST)
    }
}

impl AtprotoConverter {
    /// Create a converter resolving blobs against `blob_host`.
    #[must_use]
    pub fn new(blob_host: impl Into<String>) -> Self {
        let blob_host: String = blob_host.into();
        Self {
            blob_host: blob_host.trim_end_matches('/').to_string(),
        }
    }

    /// Host blob URLs are built against.
    #[must_use]
    pub fn blob_host(&self) -> &str {
        &self.blob_host
    }

    /// Fetch URL for a blob owned by `did`, empty if either part is missing.
    #[must_use]
    pub(crate) fn blob_url(&self, did: &str, blob: Option<&BlobRef>) -> String {
        match blob {
            Some(blob) if !did.is_empty() && !blob.cid().is_empty() => format!(
                "{}/xrpc/com.atproto.sync.getBlob?did={did}&cid={}",
                self.blob_host,
                blob.cid()
            ),
            _ => String::new(),
        }
    }

    fn convert_embed(&self, embed: EmbedRecord, author: &str) -> Embed {
        match embed {
            EmbedRecord::Images { images } => Embed::Images {
                images: images
                    .into_iter()
                    .map(|image| EmbedImage {
                        url: self.blob_url(author, image.image.as_ref()),
                        alt_text: image.alt,
                    })
                    .collect(),
            },
            EmbedRecord::External { external } => {
                let thumb_url = self.blob_url(author, external.thumb.as_ref());
                Embed::External(EmbedLink {
                    url: external.uri,
                    title: external.title,
                    description: external.description,
                    thumb_url: (!thumb_url.is_empty()).then_some(thumb_url),
                })
            }
            EmbedRecord::Record { record } => Embed::Record(record),
            EmbedRecord::RecordWithMedia { record, media } => Embed::RecordWithMedia {
                record: record.record,
                media: Box::new(self.convert_embed(*media, author)),
            },
            EmbedRecord::Video { video, alt } => Embed::Video(EmbedVideo {
                url: self.blob_url(author, video.as_ref()),
                alt_text: alt.filter(|a| !a.is_empty()),
            }),
            EmbedRecord::Unknown => Embed::Unknown,
        }
    }
}

impl RecordConverter for AtprotoConverter {
    fn convert_post(
        &self,
        record: &serde_json::Value,
        author: &str,
    ) -> Result<FeedPost, ConversionError> {
        let post = PostRecord::deserialize(record)?;

        let created_at = parse_created_at(&post.created_at)?;
        let facets = post
            .facets
            .into_iter()
            .enumerate()
            .map(|(index, facet)| convert_facet(index, facet))
            .collect::<Result<Vec<_>, _>>()?;
        let embed = post.embed.map(|embed| self.convert_embed(embed, author));
        let reply = post.reply.map(|reply| ReplyInfo {
            parent: reply.parent,
            root: reply.root,
        });

        Ok(FeedPost {
            uri: String::new(),
            cid: None,
            author: author.to_string(),
            created_at,
            text: post.text,
            facets,
            tags: post.tags,
            languages: post.langs,
            reply,
            embed,
        })
    }
}

/// Parse an RFC 3339 `createdAt` value.
///
/// # Errors
///
/// Returns `ConversionError::InvalidCreatedAt` if the value does not parse.
pub fn parse_created_at(value: &str) -> Result<DateTime<Utc>, ConversionError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ConversionError::InvalidCreatedAt {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn convert_facet(index: usize, facet: FacetRecord) -> Result<RichTextFacet, ConversionError> {
    let features = facet.features.len();
    let Ok([feature]) = <[FacetFeature; 1]>::try_from(facet.features) else {
        return Err(ConversionError::InvalidFacet { index, features });
    };

    let (kind, target) = match feature {
        FacetFeature::Mention { did } => (FacetKind::Mention, did),
        FacetFeature::Link { uri } => (FacetKind::Link, uri),
        FacetFeature::Tag { tag } => (FacetKind::Tag, tag),
        FacetFeature::Unknown => (FacetKind::Unknown, String::new()),
    };

    Ok(RichTextFacet {
        kind,
        target,
        byte_start: facet.index.byte_start,
        byte_end: facet.index.byte_end,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const AUTHOR: &str = "did:plc:author";

    fn convert(record: &serde_json::Value) -> Result<FeedPost, ConversionError> {
        AtprotoConverter::default().convert_post(record, AUTHOR)
    }

    #[test]
    fn converts_plain_post() {
        let post = convert(&json!({
            "$type": "app.bsky.feed.post",
            "text": "hello world",
            "createdAt": "2024-09-09T19:46:02.102Z",
            "langs": ["en"]
        }))
        .unwrap();

        assert_eq!(post.text, "hello world");
        assert_eq!(post.author, AUTHOR);
        assert_eq!(post.languages, vec!["en"]);
        assert_eq!(post.created_at.timestamp(), 1_725_911_162);
        assert!(post.facets.is_empty());
        assert!(post.embed.is_none());
        assert!(!post.is_reply());
    }

    #[test]
    fn converts_facets_and_reply() {
        let post = convert(&json!({
            "text": "hi @bob see https://x.test #rust",
            "createdAt": "2024-09-09T19:46:02Z",
            "facets": [
                {
                    "index": { "byteStart": 3, "byteEnd": 7 },
                    "features": [{ "$type": "app.bsky.richtext.facet#mention", "did": "did:plc:bob" }]
                },
                {
                    "index": { "byteStart": 12, "byteEnd": 26 },
                    "features": [{ "$type": "app.bsky.richtext.facet#link", "uri": "https://x.test" }]
                },
                {
                    "index": { "byteStart": 27, "byteEnd": 32 },
                    "features": [{ "$type": "app.bsky.richtext.facet#tag", "tag": "rust" }]
                }
            ],
            "reply": {
                "parent": { "uri": "at://did:plc:bob/app.bsky.feed.post/1", "cid": "bafyparent" },
                "root": { "uri": "at://did:plc:bob/app.bsky.feed.post/0", "cid": "bafyroot" }
            }
        }))
        .unwrap();

        let kinds: Vec<_> = post.facets.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FacetKind::Mention, FacetKind::Link, FacetKind::Tag]);
        assert_eq!(post.facets[0].target, "did:plc:bob");
        assert_eq!(post.facets[2].byte_start, 27);
        assert_eq!(post.facets[2].byte_end, 32);

        let reply = post.reply.unwrap();
        assert_eq!(reply.parent.cid, "bafyparent");
        assert_eq!(reply.root.unwrap().cid, "bafyroot");
    }

    #[test]
    fn facet_with_two_features_is_invalid() {
        let err = convert(&json!({
            "text": "x",
            "createdAt": "2024-09-09T19:46:02Z",
            "facets": [{
                "index": { "byteStart": 0, "byteEnd": 1 },
                "features": [
                    { "$type": "app.bsky.richtext.facet#tag", "tag": "a" },
                    { "$type": "app.bsky.richtext.facet#tag", "tag": "b" }
                ]
            }]
        }))
        .unwrap_err();

        assert!(matches!(
            err,
            ConversionError::InvalidFacet { index: 0, features: 2 }
        ));
    }

    #[test]
    fn image_embed_resolves_blob_urls() {
        let post = convert(&json!({
            "text": "look",
            "createdAt": "2024-09-09T19:46:02Z",
            "embed": {
                "$type": "app.bsky.embed.images",
                "images": [
                    { "alt": "a cat", "image": { "$type": "blob", "ref": { "$link": "bafkcat" }, "mimeType": "image/png", "size": 5 } },
                    { "alt": "" }
                ]
            }
        }))
        .unwrap();

        let Some(Embed::Images { images }) = post.embed else {
            panic!("expected image embed");
        };
        assert_eq!(images[0].alt_text, "a cat");
        assert_eq!(
            images[0].url,
            "https://bsky.social/xrpc/com.atproto.sync.getBlob?did=did:plc:author&cid=bafkcat"
        );
        assert_eq!(images[1].url, "");
    }

    #[test]
    fn record_with_media_keeps_both_parts() {
        let converter = AtprotoConverter::new("https://pds.example/");
        let post = converter
            .convert_post(
                &json!({
                    "text": "quote",
                    "createdAt": "2024-09-09T19:46:02Z",
                    "embed": {
                        "$type": "app.bsky.embed.recordWithMedia",
                        "record": { "record": { "uri": "at://did:plc:q/app.bsky.feed.post/9", "cid": "bafyq" } },
                        "media": {
                            "$type": "app.bsky.embed.video",
                            "video": { "ref": { "$link": "bafkvid" } },
                            "alt": "clip"
                        }
                    }
                }),
                AUTHOR,
            )
            .unwrap();

        let Some(Embed::RecordWithMedia { record, media }) = post.embed else {
            panic!("expected record with media");
        };
        assert_eq!(record.cid, "bafyq");
        let Embed::Video(video) = *media else {
            panic!("expected video media");
        };
        assert!(video.url.starts_with("https://pds.example/xrpc/"));
        assert_eq!(video.alt_text.as_deref(), Some("clip"));
    }

    #[test]
    fn external_link_without_thumb() {
        let post = convert(&json!({
            "text": "",
            "createdAt": "2024-09-09T19:46:02Z",
            "embed": {
                "$type": "app.bsky.embed.external",
                "external": { "uri": "https://news.test", "title": "News", "description": "d" }
            }
        }))
        .unwrap();

        let Some(Embed::External(link)) = post.embed else {
            panic!("expected external embed");
        };
        assert_eq!(link.url, "https://news.test");
        assert!(link.thumb_url.is_none());
    }

    #[test]
    fn missing_created_at_is_shape_error() {
        let err = convert(&json!({ "text": "x" })).unwrap_err();
        assert!(matches!(err, ConversionError::Shape(_)));
    }

    #[test]
    fn bad_created_at_rejected() {
        let err = convert(&json!({ "text": "x", "createdAt": "yesterday" })).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidCreatedAt { .. }));
    }

    #[test]
    fn non_object_record_rejected() {
        let err = convert(&json!("just a string")).unwrap_err();
        assert!(matches!(err, ConversionError::Shape(_)));
    }
}
