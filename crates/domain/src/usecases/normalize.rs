//! Raw item normalization - converts source records into canonical posts

use thiserror::Error;

use crate::model::{MediaItem, Post, RawItem, RawMedia, RawMediaKind, ReplyTarget};

/// Normalization failure for a single raw item. The caller skips the item
/// and continues with the rest of the batch.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("source item is missing required field `{field}`")]
    MissingField { field: &'static str },
}

/// Convert a raw source item into a canonical [`Post`].
///
/// Pure function of its input. Quoted items are normalized recursively; the
/// recursion depth is whatever depth of quoting the source graph actually
/// contains.
pub fn normalize(raw: &RawItem) -> Result<Post, NormalizeError> {
    let id = raw
        .id
        .clone()
        .ok_or(NormalizeError::MissingField { field: "id" })?;
    let mut body = raw
        .body
        .clone()
        .ok_or(NormalizeError::MissingField { field: "body" })?;
    let created_at = raw.created_at.ok_or(NormalizeError::MissingField {
        field: "created_at",
    })?;

    let media = merge_media(&raw.media, &raw.legacy_media);

    let photos: Vec<MediaItem> = media
        .iter()
        .filter(|m| m.kind == RawMediaKind::Photo)
        .map(|m| MediaItem {
            remote_url: m.remote_url.clone(),
            display_url: m.display_url.clone(),
        })
        .collect();

    let videos: Vec<MediaItem> = media
        .iter()
        .filter(|m| m.kind == RawMediaKind::Video)
        .filter_map(|m| {
            select_mp4_variant(m).map(|url| MediaItem {
                remote_url: url,
                display_url: m.display_url.clone(),
            })
        })
        .collect();

    // Strip media display tokens before expanding URLs, otherwise an
    // expansion could substitute into a token that is about to be removed.
    for m in &media {
        if !m.display_url.is_empty() {
            body = body.replace(&m.display_url, "").trim().to_string();
        }
    }
    for u in &raw.urls {
        if !u.short_url.is_empty() {
            body = body.replace(&u.short_url, &u.expanded_url).trim().to_string();
        }
    }

    let quoted_post = match &raw.quoted_item {
        Some(inner) => Some(Box::new(normalize(inner)?)),
        None => None,
    };

    let reply_target =
        if raw.reply_to_author_id.is_some() || raw.reply_to_post_id.is_some() {
            Some(ReplyTarget {
                author_id: raw.reply_to_author_id.clone(),
                post_id: raw.reply_to_post_id.clone(),
            })
        } else {
            None
        };

    Ok(Post {
        id,
        body,
        created_at,
        quoted_post_url: raw.quoted_post_url.clone(),
        quoted_post,
        photos,
        videos,
        reply_target,
    })
}

/// Merge the full and legacy media containers. A legacy descriptor is
/// discarded when a full-container descriptor with the same platform
/// identity already exists.
fn merge_media(full: &[RawMedia], legacy: &[RawMedia]) -> Vec<RawMedia> {
    let mut merged: Vec<RawMedia> = full.to_vec();
    for m in legacy {
        if !merged.iter().any(|existing| existing.media_key == m.media_key) {
            merged.push(m.clone());
        }
    }
    merged
}

/// Pick the mp4 variant with the highest bitrate; `None` drops the video
fn select_mp4_variant(media: &RawMedia) -> Option<String> {
    media
        .variants
        .iter()
        .filter(|v| v.content_type == "video/mp4")
        .max_by_key(|v| v.bitrate.unwrap_or(0))
        .map(|v| v.url.clone())
}
