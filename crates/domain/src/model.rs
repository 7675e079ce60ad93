//! Domain models and value objects

use serde::{Deserialize, Serialize};

/// A canonical post, normalized from a raw source item and ready for
/// filtering and publication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    /// Platform-specific post ID, stable and unique within the source
    pub id: String,
    /// Post text after media-token removal and URL expansion
    pub body: String,
    /// Creation time as epoch seconds
    pub created_at: i64,
    /// Permalink of the quoted post, if any
    pub quoted_post_url: Option<String>,
    /// Fully normalized quoted post, if the source carried one
    pub quoted_post: Option<Box<Post>>,
    /// Photo attachments, in source order
    #[serde(default)]
    pub photos: Vec<MediaItem>,
    /// Video attachments, in source order
    #[serde(default)]
    pub videos: Vec<MediaItem>,
    /// Who/what this post replies to, if it is a reply
    pub reply_target: Option<ReplyTarget>,
}

impl Post {
    /// All media attachments of this post, photos first
    pub fn media(&self) -> impl Iterator<Item = &MediaItem> {
        self.photos.iter().chain(self.videos.iter())
    }

    /// Whether this post is a reply to anything
    pub fn is_reply(&self) -> bool {
        self.reply_target.is_some()
    }
}

/// A single photo or video attachment on a [`Post`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Canonical fetch location of the asset
    pub remote_url: String,
    /// Short token that appeared in the original body text
    pub display_url: String,
}

/// Reply linkage carried by a source item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    /// Author being replied to
    pub author_id: Option<String>,
    /// Post being replied to
    pub post_id: Option<String>,
}

/// A raw source item as delivered by the ingestion adapter, before
/// normalization. Required fields are optional here because the wire data
/// may omit them; [`normalize`](crate::usecases::normalize::normalize)
/// rejects such items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawItem {
    pub id: Option<String>,
    pub body: Option<String>,
    /// Epoch seconds
    pub created_at: Option<i64>,
    /// Media descriptors from the full entity container
    #[serde(default)]
    pub media: Vec<RawMedia>,
    /// Media descriptors from the legacy entity container; duplicates of
    /// full-container entries by media key are discarded
    #[serde(default)]
    pub legacy_media: Vec<RawMedia>,
    /// Shortened URL tokens with their expansions
    #[serde(default)]
    pub urls: Vec<RawUrl>,
    /// Permalink of the quoted item
    pub quoted_post_url: Option<String>,
    /// The quoted item itself, if the source inlined it
    pub quoted_item: Option<Box<RawItem>>,
    pub reply_to_author_id: Option<String>,
    pub reply_to_post_id: Option<String>,
}

/// A raw media descriptor from either entity container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMedia {
    /// Platform-assigned identity of the underlying asset
    pub media_key: String,
    pub kind: RawMediaKind,
    /// Direct fetch URL (photos)
    pub remote_url: String,
    /// Short token embedded in the body text
    pub display_url: String,
    /// Encoded variants (videos)
    #[serde(default)]
    pub variants: Vec<RawVariant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawMediaKind {
    Photo,
    Video,
    /// Anything else the source may introduce; dropped by normalization
    #[serde(other)]
    Other,
}

/// One encoding of a raw video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawVariant {
    pub content_type: String,
    pub bitrate: Option<u64>,
    pub url: String,
}

/// A shortened URL token and its expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUrl {
    pub short_url: String,
    pub expanded_url: String,
}

/// Outcome of processing a single post in one tick
#[derive(Debug)]
pub enum PostOutcome {
    /// At least one target accepted the post
    Published { targets: Vec<&'static str> },
    /// Every enabled target rejected the post; it stays eligible for the
    /// next tick
    AllTargetsFailed,
    /// Dry-run mode, nothing was attempted
    DryRun,
}
