//! Sync engine - orchestrates fetching, normalizing, filtering, and
//! fanning out each post to every enabled publish target

use std::sync::Arc;

use futures::future::join_all;

use crate::model::{Post, PostOutcome};
use crate::ports::{
    IngestError, IngestionSource, LedgerError, MediaCache, MediaRef, PublishTarget, SyncLedger,
    TargetError,
};
use crate::usecases::filter::FilterPipeline;
use crate::usecases::normalize::normalize;

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Posts created strictly before this epoch second are never synced
    pub cutoff_epoch: i64,
    /// Log what would be published without touching targets or the ledger
    pub dry_run: bool,
}

/// Errors a tick can surface to the caller.
///
/// Ingestion failures abort the tick but are safe to retry on the next one.
/// A ledger failure means a publication may not have been recorded durably;
/// callers must treat it as fatal rather than risk double publication after
/// a restart.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("ingestion failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("ledger persistence failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// The sync orchestrator
pub struct SyncEngine<S, M, L>
where
    S: IngestionSource + ?Sized,
    M: MediaCache + ?Sized,
    L: SyncLedger + ?Sized,
{
    source: Arc<S>,
    media_cache: Arc<M>,
    ledger: Arc<L>,
    targets: Vec<Arc<dyn PublishTarget>>,
    filter: FilterPipeline,
    config: SyncConfig,
}

impl<S, M, L> SyncEngine<S, M, L>
where
    S: IngestionSource + ?Sized,
    M: MediaCache + ?Sized,
    L: SyncLedger + ?Sized,
{
    pub fn new(
        source: Arc<S>,
        media_cache: Arc<M>,
        ledger: Arc<L>,
        targets: Vec<Arc<dyn PublishTarget>>,
        config: SyncConfig,
    ) -> Self {
        let filter = FilterPipeline::new(config.cutoff_epoch);
        Self {
            source,
            media_cache,
            ledger,
            targets,
            filter,
            config,
        }
    }

    fn enabled_targets(&self) -> impl Iterator<Item = &Arc<dyn PublishTarget>> {
        self.targets.iter().filter(|t| t.is_enabled())
    }

    /// Wait until the source and every enabled target reports ready.
    ///
    /// There is no timeout: a collaborator that never becomes ready stalls
    /// the engine here indefinitely.
    pub async fn wait_until_ready(&self) {
        let mut gates = vec![("source", self.source.readiness())];
        for target in self.enabled_targets() {
            gates.push((target.name(), target.readiness()));
        }

        for (name, gate) in &gates {
            if !gate.is_ready() {
                tracing::info!(collaborator = *name, "Waiting for readiness");
            }
        }

        join_all(gates.iter().map(|(_, gate)| gate.ready())).await;
        tracing::info!("All collaborators ready");
    }

    /// Run one full fetch-normalize-filter-publish cycle
    pub async fn run_tick(&self) -> Result<Vec<(String, PostOutcome)>, SyncError> {
        let raw_items = self.source.fetch_recent().await?;
        tracing::debug!(count = raw_items.len(), "Fetched raw items");

        let mut candidates = Vec::with_capacity(raw_items.len());
        for raw in &raw_items {
            match normalize(raw) {
                Ok(post) => candidates.push(post),
                Err(error) => {
                    tracing::warn!(item_id = ?raw.id, %error, "Skipping malformed source item");
                }
            }
        }

        let posts = self
            .filter
            .apply(self.ledger.as_ref(), candidates)
            .await;

        if posts.is_empty() {
            tracing::debug!("Nothing to sync this tick");
            return Ok(vec![]);
        }

        tracing::info!(count = posts.len(), "Syncing posts");

        // Posts are strictly sequential so the ascending publish order
        // holds and ledger writes never interleave.
        let mut results = Vec::with_capacity(posts.len());
        for post in &posts {
            let outcome = self.process_post(post).await?;
            results.push((post.id.clone(), outcome));
        }

        Ok(results)
    }

    /// Process one post: stage media, fan out to targets, record success,
    /// release media
    async fn process_post(&self, post: &Post) -> Result<PostOutcome, LedgerError> {
        if self.config.dry_run {
            tracing::info!(
                post_id = %post.id,
                body = %post.body,
                photos = post.photos.len(),
                videos = post.videos.len(),
                "[DRY RUN] Would publish"
            );
            return Ok(PostOutcome::DryRun);
        }

        // Media for one post is staged concurrently; failures are logged
        // and the publish attempt proceeds (targets see the miss when they
        // resolve).
        let stage_results = join_all(
            post.media()
                .map(|m| self.media_cache.stage(&m.remote_url)),
        )
        .await;
        for result in stage_results {
            if let Err(error) = result {
                tracing::warn!(post_id = %post.id, %error, "Media staging failed");
            }
        }

        // Targets are independent; attempts run concurrently and one
        // target's failure never affects another's.
        let attempts = join_all(self.enabled_targets().map(|target| async move {
            (target.name(), self.attempt_target(target.as_ref(), post).await)
        }))
        .await;

        let mut succeeded = Vec::new();
        for (name, attempt) in attempts {
            match attempt {
                Ok(receipt) => {
                    tracing::info!(
                        post_id = %post.id,
                        target = name,
                        published_id = %receipt.id,
                        published_url = ?receipt.url,
                        "Synced post to target"
                    );
                    succeeded.push(name);
                }
                Err(error) => {
                    tracing::error!(
                        post_id = %post.id,
                        target = name,
                        %error,
                        "Could not sync post to target"
                    );
                }
            }
        }

        // Any single success marks the post synced; a target that failed
        // it will not be retried on later ticks.
        let marked = if succeeded.is_empty() {
            Ok(())
        } else {
            self.ledger.mark_synced(&post.id).await
        };

        // Handles never outlive the attempt, whatever the outcome.
        for media in post.media() {
            self.media_cache.release(&media.remote_url).await;
        }

        marked?;

        if succeeded.is_empty() {
            Ok(PostOutcome::AllTargetsFailed)
        } else {
            Ok(PostOutcome::Published { targets: succeeded })
        }
    }

    /// One isolated publish attempt against a single target
    async fn attempt_target(
        &self,
        target: &dyn PublishTarget,
        post: &Post,
    ) -> Result<crate::ports::PublishReceipt, TargetError> {
        let mut refs: Vec<MediaRef> = Vec::new();
        for media in post.media() {
            let path = match self.media_cache.resolve(&media.remote_url) {
                Ok(path) => path,
                Err(error) => {
                    return Err(TargetError::Upload {
                        path: std::path::PathBuf::from(&media.remote_url),
                        message: error.to_string(),
                    });
                }
            };
            match target.upload_media(&path).await {
                Ok(media_ref) => refs.push(media_ref),
                Err(TargetError::UnsupportedMediaType { path }) => {
                    // The target cannot carry this media; publish without it.
                    tracing::warn!(
                        post_id = %post.id,
                        target = target.name(),
                        path = %path.display(),
                        "Skipping media unsupported by target"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        target
            .publish(&post.body, &refs, post.quoted_post_url.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawItem, RawMedia, RawMediaKind, RawVariant};
    use crate::ports::{MediaError, PublishReceipt};
    use crate::readiness::ReadyGate;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    struct FakeSource {
        items: Mutex<Vec<RawItem>>,
        gate: ReadyGate,
    }

    impl FakeSource {
        fn with_items(items: Vec<RawItem>) -> Self {
            Self {
                items: Mutex::new(items),
                gate: ReadyGate::ready_now(),
            }
        }
    }

    #[async_trait]
    impl IngestionSource for FakeSource {
        fn readiness(&self) -> ReadyGate {
            self.gate.clone()
        }

        async fn fetch_recent(&self) -> Result<Vec<RawItem>, IngestError> {
            Ok(self.items.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct FakeCache {
        staged: Mutex<HashMap<String, PathBuf>>,
        released: Mutex<Vec<String>>,
        fail_urls: HashSet<String>,
    }

    impl FakeCache {
        fn failing_on(urls: &[&str]) -> Self {
            Self {
                fail_urls: urls.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn released(&self) -> Vec<String> {
            self.released.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaCache for FakeCache {
        async fn stage(&self, remote_url: &str) -> Result<PathBuf, MediaError> {
            if self.fail_urls.contains(remote_url) {
                return Err(MediaError::Fetch {
                    url: remote_url.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            let path = PathBuf::from(format!("/staging/{}", remote_url.replace('/', "_")));
            self.staged
                .lock()
                .unwrap()
                .insert(remote_url.to_string(), path.clone());
            Ok(path)
        }

        fn resolve(&self, remote_url: &str) -> Result<PathBuf, MediaError> {
            self.staged
                .lock()
                .unwrap()
                .get(remote_url)
                .cloned()
                .ok_or_else(|| MediaError::NotStaged {
                    url: remote_url.to_string(),
                })
        }

        async fn release(&self, remote_url: &str) {
            self.staged.lock().unwrap().remove(remote_url);
            self.released.lock().unwrap().push(remote_url.to_string());
        }
    }

    struct FakeLedger {
        ids: Mutex<HashSet<String>>,
        fail_writes: bool,
    }

    impl FakeLedger {
        fn new() -> Self {
            Self {
                ids: Mutex::new(HashSet::new()),
                fail_writes: false,
            }
        }

        fn failing() -> Self {
            Self {
                ids: Mutex::new(HashSet::new()),
                fail_writes: true,
            }
        }
    }

    #[async_trait]
    impl SyncLedger for FakeLedger {
        async fn contains(&self, id: &str) -> bool {
            self.ids.lock().unwrap().contains(id)
        }

        async fn mark_synced(&self, id: &str) -> Result<(), LedgerError> {
            if self.fail_writes {
                return Err(LedgerError::Io(std::io::Error::other("disk full")));
            }
            self.ids.lock().unwrap().insert(id.to_string());
            Ok(())
        }
    }

    struct FakeTarget {
        target_name: &'static str,
        enabled: bool,
        gate: ReadyGate,
        fail_publish: bool,
        unsupported_suffix: Option<&'static str>,
        fail_upload: bool,
        published: Mutex<Vec<String>>,
        uploaded: Mutex<Vec<PathBuf>>,
    }

    impl FakeTarget {
        fn new(target_name: &'static str) -> Self {
            Self {
                target_name,
                enabled: true,
                gate: ReadyGate::ready_now(),
                fail_publish: false,
                unsupported_suffix: None,
                fail_upload: false,
                published: Mutex::new(vec![]),
                uploaded: Mutex::new(vec![]),
            }
        }

        fn failing(target_name: &'static str) -> Self {
            Self {
                fail_publish: true,
                ..Self::new(target_name)
            }
        }

        fn published(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }

        fn upload_count(&self) -> usize {
            self.uploaded.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PublishTarget for FakeTarget {
        fn name(&self) -> &'static str {
            self.target_name
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn readiness(&self) -> ReadyGate {
            self.gate.clone()
        }

        async fn upload_media(&self, path: &Path) -> Result<MediaRef, TargetError> {
            if let Some(suffix) = self.unsupported_suffix {
                if path.to_string_lossy().ends_with(suffix) {
                    return Err(TargetError::UnsupportedMediaType {
                        path: path.to_path_buf(),
                    });
                }
            }
            if self.fail_upload {
                return Err(TargetError::Upload {
                    path: path.to_path_buf(),
                    message: "upload failed".to_string(),
                });
            }
            self.uploaded.lock().unwrap().push(path.to_path_buf());
            Ok(MediaRef(format!("ref-{}", path.display())))
        }

        async fn publish(
            &self,
            body: &str,
            _media: &[MediaRef],
            _quoted_url: Option<&str>,
        ) -> Result<PublishReceipt, TargetError> {
            if self.fail_publish {
                return Err(TargetError::Rejected {
                    message: "server error".to_string(),
                });
            }
            self.published.lock().unwrap().push(body.to_string());
            Ok(PublishReceipt {
                id: format!("{}-{}", self.target_name, self.published.lock().unwrap().len()),
                url: None,
            })
        }
    }

    fn raw_item(id: &str, created_at: i64) -> RawItem {
        RawItem {
            id: Some(id.to_string()),
            body: Some(format!("body-{id}")),
            created_at: Some(created_at),
            ..Default::default()
        }
    }

    fn raw_item_with_media(id: &str, created_at: i64) -> RawItem {
        let mut item = raw_item(id, created_at);
        item.media = vec![
            RawMedia {
                media_key: "m1".to_string(),
                kind: RawMediaKind::Photo,
                remote_url: "https://img/a.jpg".to_string(),
                display_url: String::new(),
                variants: vec![],
            },
            RawMedia {
                media_key: "m2".to_string(),
                kind: RawMediaKind::Video,
                remote_url: String::new(),
                display_url: String::new(),
                variants: vec![RawVariant {
                    content_type: "video/mp4".to_string(),
                    bitrate: Some(1000),
                    url: "https://vid/b.mp4".to_string(),
                }],
            },
        ];
        item
    }

    fn engine(
        source: Arc<FakeSource>,
        cache: Arc<FakeCache>,
        ledger: Arc<FakeLedger>,
        targets: Vec<Arc<dyn PublishTarget>>,
    ) -> SyncEngine<FakeSource, FakeCache, FakeLedger> {
        SyncEngine::new(
            source,
            cache,
            ledger,
            targets,
            SyncConfig {
                cutoff_epoch: 0,
                dry_run: false,
            },
        )
    }

    #[tokio::test]
    async fn tick_publishes_and_marks_synced() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item("1", 10)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let target = Arc::new(FakeTarget::new("alpha"));

        let engine = engine(source, cache, ledger.clone(), vec![target.clone()]);
        let results = engine.run_tick().await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, PostOutcome::Published { .. }));
        assert!(ledger.contains("1").await);
        assert_eq!(target.published(), vec!["body-1"]);
    }

    #[tokio::test]
    async fn second_tick_with_same_items_publishes_nothing() {
        let source = Arc::new(FakeSource::with_items(vec![
            raw_item("1", 10),
            raw_item("2", 20),
        ]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let target = Arc::new(FakeTarget::new("alpha"));

        let engine = engine(source, cache, ledger, vec![target.clone()]);
        engine.run_tick().await.unwrap();
        assert_eq!(target.published().len(), 2);

        let results = engine.run_tick().await.unwrap();
        assert!(results.is_empty());
        assert_eq!(target.published().len(), 2);
    }

    #[tokio::test]
    async fn publishes_in_ascending_timestamp_order() {
        let source = Arc::new(FakeSource::with_items(vec![
            raw_item("a", 5),
            raw_item("b", 2),
            raw_item("c", 8),
        ]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let target = Arc::new(FakeTarget::new("alpha"));

        let engine = engine(source, cache, ledger, vec![target.clone()]);
        engine.run_tick().await.unwrap();

        assert_eq!(target.published(), vec!["body-b", "body-a", "body-c"]);
    }

    #[tokio::test]
    async fn partial_target_failure_still_marks_synced_and_never_retries() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item("1", 10)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let failing = Arc::new(FakeTarget::failing("alpha"));
        let working = Arc::new(FakeTarget::new("beta"));

        let engine = engine(
            source,
            cache,
            ledger.clone(),
            vec![failing.clone(), working.clone()],
        );

        let results = engine.run_tick().await.unwrap();
        match &results[0].1 {
            PostOutcome::Published { targets } => assert_eq!(targets, &vec!["beta"]),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(ledger.contains("1").await);

        // The failed target is not retried once the post is in the ledger.
        let results = engine.run_tick().await.unwrap();
        assert!(results.is_empty());
        assert!(failing.published().is_empty());
        assert_eq!(working.published().len(), 1);
    }

    #[tokio::test]
    async fn all_targets_failing_leaves_post_eligible_for_next_tick() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item("1", 10)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let target = Arc::new(FakeTarget::failing("alpha"));

        let engine = engine(source, cache, ledger.clone(), vec![target]);

        let results = engine.run_tick().await.unwrap();
        assert!(matches!(results[0].1, PostOutcome::AllTargetsFailed));
        assert!(!ledger.contains("1").await);

        // Retried next tick since nothing was recorded.
        let results = engine.run_tick().await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn staged_media_is_released_unconditionally() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item_with_media("1", 10)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        // Even when every target fails, handles are released.
        let target = Arc::new(FakeTarget::failing("alpha"));

        let engine = engine(source, cache.clone(), ledger, vec![target]);
        engine.run_tick().await.unwrap();

        let released = cache.released();
        assert!(released.contains(&"https://img/a.jpg".to_string()));
        assert!(released.contains(&"https://vid/b.mp4".to_string()));
        assert!(cache.resolve("https://img/a.jpg").is_err());
        assert!(cache.resolve("https://vid/b.mp4").is_err());
    }

    #[tokio::test]
    async fn malformed_item_is_skipped_not_fatal() {
        let mut malformed = raw_item("bad", 10);
        malformed.body = None;
        let source = Arc::new(FakeSource::with_items(vec![malformed, raw_item("2", 20)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let target = Arc::new(FakeTarget::new("alpha"));

        let engine = engine(source, cache, ledger, vec![target.clone()]);
        let results = engine.run_tick().await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(target.published(), vec!["body-2"]);
    }

    #[tokio::test]
    async fn unsupported_media_is_skipped_within_the_attempt() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item_with_media("1", 10)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let target = Arc::new(FakeTarget {
            unsupported_suffix: Some(".mp4"),
            ..FakeTarget::new("alpha")
        });

        let engine = engine(source, cache, ledger.clone(), vec![target.clone()]);
        engine.run_tick().await.unwrap();

        // The photo uploaded, the video was skipped, the post still went out.
        assert_eq!(target.upload_count(), 1);
        assert_eq!(target.published().len(), 1);
        assert!(ledger.contains("1").await);
    }

    #[tokio::test]
    async fn upload_error_fails_only_that_target() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item_with_media("1", 10)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let broken = Arc::new(FakeTarget {
            fail_upload: true,
            ..FakeTarget::new("alpha")
        });
        let working = Arc::new(FakeTarget::new("beta"));

        let engine = engine(
            source,
            cache,
            ledger.clone(),
            vec![broken.clone(), working.clone()],
        );
        engine.run_tick().await.unwrap();

        assert!(broken.published().is_empty());
        assert_eq!(working.published().len(), 1);
        assert!(ledger.contains("1").await);
    }

    #[tokio::test]
    async fn staging_failure_fails_the_publish_attempts() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item_with_media("1", 10)]));
        let cache = Arc::new(FakeCache::failing_on(&[
            "https://img/a.jpg",
            "https://vid/b.mp4",
        ]));
        let ledger = Arc::new(FakeLedger::new());
        let target = Arc::new(FakeTarget::new("alpha"));

        let engine = engine(source, cache, ledger.clone(), vec![target.clone()]);
        let results = engine.run_tick().await.unwrap();

        assert!(matches!(results[0].1, PostOutcome::AllTargetsFailed));
        assert!(target.published().is_empty());
        assert!(!ledger.contains("1").await);
    }

    #[tokio::test]
    async fn ledger_write_failure_escalates() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item("1", 10)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::failing());
        let target = Arc::new(FakeTarget::new("alpha"));

        let engine = engine(source, cache.clone(), ledger, vec![target]);
        let result = engine.run_tick().await;

        assert!(matches!(result, Err(SyncError::Ledger(_))));
    }

    #[tokio::test]
    async fn dry_run_neither_publishes_nor_marks() {
        let source = Arc::new(FakeSource::with_items(vec![raw_item("1", 10)]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let target = Arc::new(FakeTarget::new("alpha"));

        let engine = SyncEngine::new(
            source,
            cache,
            ledger.clone(),
            vec![target.clone() as Arc<dyn PublishTarget>],
            SyncConfig {
                cutoff_epoch: 0,
                dry_run: true,
            },
        );

        let results = engine.run_tick().await.unwrap();
        assert!(matches!(results[0].1, PostOutcome::DryRun));
        assert!(target.published().is_empty());
        assert!(!ledger.contains("1").await);
    }

    #[tokio::test]
    async fn wait_until_ready_blocks_on_unready_target() {
        let source = Arc::new(FakeSource::with_items(vec![]));
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(FakeLedger::new());
        let gate = ReadyGate::new();
        let target = Arc::new(FakeTarget {
            gate: gate.clone(),
            ..FakeTarget::new("alpha")
        });

        let engine = engine(source, cache, ledger, vec![target]);

        let wait = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            engine.wait_until_ready(),
        )
        .await;
        assert!(wait.is_err(), "engine should still be initializing");

        gate.set_ready();
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            engine.wait_until_ready(),
        )
        .await
        .expect("engine should become ready");
    }
}
