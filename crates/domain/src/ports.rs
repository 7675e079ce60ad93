//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external
//! systems. Adapters implement these traits to connect to real
//! infrastructure.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::RawItem;
use crate::readiness::ReadyGate;

/// Error type for ingestion operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
}

/// Port for fetching raw items from the source platform
#[async_trait]
pub trait IngestionSource: Send + Sync {
    /// Readiness signal; fires once the source has completed any required
    /// authentication
    fn readiness(&self) -> ReadyGate;

    /// Fetch recent raw items. Ordering is not guaranteed; the pipeline
    /// re-sorts.
    async fn fetch_recent(&self) -> Result<Vec<RawItem>, IngestError>;
}

/// Error type for media staging operations
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to fetch media from {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("media was never staged: {url}")]
    NotStaged { url: String },
}

/// Port for the transient media staging cache backing uploads
#[async_trait]
pub trait MediaCache: Send + Sync {
    /// Stage a remote asset locally. Idempotent: an already-staged URL
    /// returns its existing path without re-fetching. No mapping is
    /// recorded on failure.
    async fn stage(&self, remote_url: &str) -> Result<PathBuf, MediaError>;

    /// Look up the staged path for a URL. Read-only; never fetches.
    fn resolve(&self, remote_url: &str) -> Result<PathBuf, MediaError>;

    /// Delete the staged file and drop the mapping. No-op for URLs that
    /// were never staged.
    async fn release(&self, remote_url: &str);
}

/// Error type for ledger persistence
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Port for the persisted set of already-synced post ids.
///
/// The set only grows; `mark_synced` is the sole mutator and must persist
/// durably before returning. A persistence failure here is the one error
/// the sync engine escalates, since continuing would risk double
/// publication after a restart.
#[async_trait]
pub trait SyncLedger: Send + Sync {
    async fn contains(&self, id: &str) -> bool;

    async fn mark_synced(&self, id: &str) -> Result<(), LedgerError>;
}

/// Error type for publish target operations
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target is not ready")]
    NotReady,
    #[error("unsupported media type: {path}")]
    UnsupportedMediaType { path: PathBuf },
    #[error("media upload failed for {path}: {message}")]
    Upload { path: PathBuf, message: String },
    #[error("publish rejected: {message}")]
    Rejected { message: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited")]
    RateLimited,
}

/// Opaque media reference returned by a target's upload, consumed by its
/// publish
#[derive(Debug, Clone)]
pub struct MediaRef(pub String);

/// Result of a successful publish
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Platform-specific id of the published post
    pub id: String,
    /// URL of the published post, if the platform has one
    pub url: Option<String>,
}

/// Port for publishing to one target platform.
///
/// Targets are independent: the sync engine never lets one target's failure
/// affect another's attempt for the same post.
#[async_trait]
pub trait PublishTarget: Send + Sync {
    /// Short platform name used in logs (e.g. "mastodon")
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    /// Readiness signal; fires once authentication has completed
    fn readiness(&self) -> ReadyGate;

    /// Upload one staged media file, returning a target-specific reference
    async fn upload_media(&self, path: &Path) -> Result<MediaRef, TargetError>;

    /// Publish a post body with previously uploaded media
    async fn publish(
        &self,
        body: &str,
        media: &[MediaRef],
        quoted_url: Option<&str>,
    ) -> Result<PublishReceipt, TargetError>;
}
