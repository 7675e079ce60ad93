//! Timeline ingestion adapter
//!
//! Fetches the watched user's timeline endpoint and maps the platform's
//! nested instruction/entry payload into raw items for normalization.
//! Session acquisition (browser login) happens outside this process; the
//! adapter only carries the resulting session token.

use async_trait::async_trait;
use mirrorpost_domain::{
    IngestError, IngestionSource, RawItem, RawMedia, RawMediaKind, RawUrl, RawVariant, ReadyGate,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

/// Ingestion source reading a user timeline over HTTP
pub struct TimelineSource {
    client: Client,
    base_url: String,
    user_id: String,
    handle: String,
    session_token: SecretString,
    gate: ReadyGate,
}

impl TimelineSource {
    pub fn new(handle: String, user_id: String, session_token: SecretString) -> Self {
        Self::with_base_url(
            handle,
            user_id,
            session_token,
            "https://twitter.com".to_string(),
        )
    }

    pub fn with_base_url(
        handle: String,
        user_id: String,
        session_token: SecretString,
        base_url: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url,
            user_id,
            handle,
            session_token,
            gate: ReadyGate::new(),
        }
    }

    /// Verify the session with one probe fetch and mark the source ready.
    /// On failure the gate never fires and the engine stays initializing.
    pub async fn connect(&self) -> Result<(), IngestError> {
        self.fetch_timeline().await?;
        tracing::info!(handle = %self.handle, "Source session verified");
        self.gate.set_ready();
        Ok(())
    }

    async fn fetch_timeline(&self) -> Result<TimelineResponse, IngestError> {
        let url = format!(
            "{}/i/api/graphql/UserTweets?user_id={}",
            self.base_url, self.user_id
        );

        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.session_token.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| IngestError::Network(e.to_string()))?;

        if response.status() == 401 || response.status() == 403 {
            return Err(IngestError::Auth("Session token rejected".to_string()));
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Api(format!(
                "Failed to fetch timeline: {}",
                body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| IngestError::Api(e.to_string()))
    }
}

#[async_trait]
impl IngestionSource for TimelineSource {
    fn readiness(&self) -> ReadyGate {
        self.gate.clone()
    }

    async fn fetch_recent(&self) -> Result<Vec<RawItem>, IngestError> {
        tracing::debug!(handle = %self.handle, "Fetching timeline");
        let response = self.fetch_timeline().await?;
        let items = collect_items(response, &self.user_id);
        tracing::debug!(handle = %self.handle, count = items.len(), "Mapped raw items");
        Ok(items)
    }
}

/// Flatten the timeline payload into the watched user's own, non-repost
/// wire records and map each to a raw item
fn collect_items(response: TimelineResponse, user_id: &str) -> Vec<RawItem> {
    let mut items = Vec::new();

    let instructions = response.data.user.result.timeline_v2.timeline.instructions;
    for instruction in instructions {
        if instruction.kind != "TimelineAddEntries" {
            continue;
        }
        for entry in instruction.entries {
            for tweet in entry_tweets(entry) {
                let author = tweet
                    .core
                    .as_ref()
                    .map(|c| c.user_results.result.rest_id.as_str());
                if author != Some(user_id) {
                    continue;
                }
                if tweet
                    .legacy
                    .as_ref()
                    .is_some_and(|l| l.retweeted_status_result.is_some())
                {
                    continue;
                }
                items.push(map_item(&tweet));
            }
        }
    }

    items
}

/// Standalone entries carry one record; conversation entries carry a group
fn entry_tweets(entry: Entry) -> Vec<WireTweet> {
    if entry.entry_id.starts_with("tweet-") {
        entry
            .content
            .item_content
            .and_then(|c| c.tweet_results)
            .and_then(|r| r.result)
            .map(|boxed| *boxed)
            .into_iter()
            .collect()
    } else if entry.entry_id.starts_with("profile-conversation-") {
        entry
            .content
            .items
            .into_iter()
            .filter_map(|i| i.item.item_content)
            .filter_map(|c| c.tweet_results)
            .filter_map(|r| r.result)
            .map(|boxed| *boxed)
            .collect()
    } else {
        vec![]
    }
}

fn map_item(tweet: &WireTweet) -> RawItem {
    let legacy = tweet.legacy.as_ref();

    let media = legacy
        .and_then(|l| l.extended_entities.as_ref())
        .map(|e| e.media.iter().map(map_media).collect())
        .unwrap_or_default();

    let legacy_media = legacy
        .map(|l| l.entities.media.iter().map(map_media).collect())
        .unwrap_or_default();

    let urls = legacy
        .map(|l| {
            l.entities
                .urls
                .iter()
                .map(|u| RawUrl {
                    short_url: u.url.clone(),
                    expanded_url: u.expanded_url.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let quoted_item = tweet
        .quoted_status_result
        .as_ref()
        .and_then(|r| r.result.as_deref())
        .map(|inner| Box::new(map_item(inner)));

    RawItem {
        id: Some(tweet.rest_id.clone()),
        body: legacy.and_then(|l| l.full_text.clone()),
        created_at: legacy
            .and_then(|l| l.created_at.as_deref())
            .and_then(parse_created_at),
        media,
        legacy_media,
        urls,
        quoted_post_url: legacy
            .and_then(|l| l.quoted_status_permalink.as_ref())
            .map(|p| p.url.clone()),
        quoted_item,
        reply_to_author_id: legacy.and_then(|l| l.in_reply_to_user_id_str.clone()),
        reply_to_post_id: legacy.and_then(|l| l.in_reply_to_status_id_str.clone()),
    }
}

fn map_media(media: &WireMedia) -> RawMedia {
    let kind = match media.kind.as_str() {
        "photo" => RawMediaKind::Photo,
        "video" => RawMediaKind::Video,
        _ => RawMediaKind::Other,
    };

    RawMedia {
        media_key: media.id_str.clone(),
        kind,
        remote_url: media.media_url_https.clone().unwrap_or_default(),
        display_url: media.url.clone().unwrap_or_default(),
        variants: media
            .video_info
            .as_ref()
            .map(|v| {
                v.variants
                    .iter()
                    .map(|variant| RawVariant {
                        content_type: variant.content_type.clone(),
                        bitrate: variant.bitrate,
                        url: variant.url.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Parse the platform's legacy timestamp format, e.g.
/// `Wed Oct 10 20:19:24 +0000 2018`, into epoch seconds
fn parse_created_at(value: &str) -> Option<i64> {
    let format = time::format_description::parse(
        "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] +0000 [year]",
    )
    .ok()?;
    let parsed = time::PrimitiveDateTime::parse(value, &format).ok()?;
    Some(parsed.assume_utc().unix_timestamp())
}

// Wire types for the timeline payload. Only the fields the mapper touches
// are modeled; everything else is ignored.

#[derive(Deserialize)]
struct TimelineResponse {
    data: TimelineData,
}

#[derive(Deserialize)]
struct TimelineData {
    user: TimelineUser,
}

#[derive(Deserialize)]
struct TimelineUser {
    result: TimelineUserResult,
}

#[derive(Deserialize)]
struct TimelineUserResult {
    timeline_v2: TimelineV2,
}

#[derive(Deserialize)]
struct TimelineV2 {
    timeline: Timeline,
}

#[derive(Deserialize)]
struct Timeline {
    #[serde(default)]
    instructions: Vec<Instruction>,
}

#[derive(Deserialize)]
struct Instruction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    entries: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    #[serde(rename = "entryId")]
    entry_id: String,
    #[serde(default)]
    content: EntryContent,
}

#[derive(Deserialize, Default)]
struct EntryContent {
    #[serde(rename = "itemContent")]
    item_content: Option<ItemContent>,
    #[serde(default)]
    items: Vec<ConversationItem>,
}

#[derive(Deserialize)]
struct ConversationItem {
    item: ConversationItemInner,
}

#[derive(Deserialize)]
struct ConversationItemInner {
    #[serde(rename = "itemContent")]
    item_content: Option<ItemContent>,
}

#[derive(Deserialize)]
struct ItemContent {
    tweet_results: Option<TweetResults>,
}

#[derive(Deserialize)]
struct TweetResults {
    result: Option<Box<WireTweet>>,
}

#[derive(Deserialize)]
struct WireTweet {
    rest_id: String,
    core: Option<WireCore>,
    legacy: Option<WireLegacy>,
    quoted_status_result: Option<TweetResults>,
}

#[derive(Deserialize)]
struct WireCore {
    user_results: WireUserResults,
}

#[derive(Deserialize)]
struct WireUserResults {
    result: WireUser,
}

#[derive(Deserialize)]
struct WireUser {
    rest_id: String,
}

#[derive(Deserialize)]
struct WireLegacy {
    full_text: Option<String>,
    created_at: Option<String>,
    #[serde(default)]
    entities: WireEntities,
    extended_entities: Option<WireExtendedEntities>,
    retweeted_status_result: Option<serde_json::Value>,
    quoted_status_permalink: Option<WirePermalink>,
    in_reply_to_user_id_str: Option<String>,
    in_reply_to_status_id_str: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireEntities {
    #[serde(default)]
    media: Vec<WireMedia>,
    #[serde(default)]
    urls: Vec<WireUrlEntity>,
}

#[derive(Deserialize)]
struct WireExtendedEntities {
    #[serde(default)]
    media: Vec<WireMedia>,
}

#[derive(Deserialize)]
struct WireMedia {
    id_str: String,
    #[serde(rename = "type")]
    kind: String,
    media_url_https: Option<String>,
    url: Option<String>,
    video_info: Option<WireVideoInfo>,
}

#[derive(Deserialize)]
struct WireVideoInfo {
    #[serde(default)]
    variants: Vec<WireVariant>,
}

#[derive(Deserialize)]
struct WireVariant {
    content_type: String,
    bitrate: Option<u64>,
    url: String,
}

#[derive(Deserialize)]
struct WireUrlEntity {
    url: String,
    expanded_url: String,
}

#[derive(Deserialize)]
struct WirePermalink {
    url: String,
}
