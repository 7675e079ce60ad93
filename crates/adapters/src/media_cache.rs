//! HTTP media staging cache
//!
//! Stages remote media in a process-local directory for the duration of one
//! publish attempt. The directory is purged and recreated at construction,
//! so files from a previous run never leak into a fresh one.

use async_trait::async_trait;
use futures::StreamExt;
use mirrorpost_domain::{MediaCache, MediaError};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Media staging cache backed by HTTP downloads
pub struct HttpMediaCache {
    client: Client,
    dir: PathBuf,
    /// Committed URL-to-path mappings; only successful downloads land here
    staged: StdMutex<HashMap<String, PathBuf>>,
    /// Per-URL locks so concurrent stage calls for the same URL share one
    /// download
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HttpMediaCache {
    /// Create the cache, purging any staging directory left by a previous
    /// run
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }
        std::fs::create_dir_all(&dir)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Ok(Self {
            client,
            dir,
            staged: StdMutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.dir
    }

    fn lookup(&self, remote_url: &str) -> Option<PathBuf> {
        self.staged.lock().unwrap().get(remote_url).cloned()
    }

    async fn download(&self, remote_url: &str) -> Result<PathBuf, MediaError> {
        let response = self
            .client
            .get(remote_url)
            .send()
            .await
            .map_err(|error| MediaError::Fetch {
                url: remote_url.to_string(),
                message: error.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MediaError::Fetch {
                url: remote_url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let path = self.dir.join(file_name_for(remote_url));
        if let Err(error) = write_stream(response, &path).await {
            // Never leave a partial file behind a failed download.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(MediaError::Fetch {
                url: remote_url.to_string(),
                message: error,
            });
        }

        Ok(path)
    }
}

async fn write_stream(response: reqwest::Response, path: &Path) -> Result<(), String> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| e.to_string())?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        file.write_all(&chunk).await.map_err(|e| e.to_string())?;
    }
    file.flush().await.map_err(|e| e.to_string())?;
    Ok(())
}

/// Hash-prefixed file name so distinct URLs sharing a basename never
/// collide in the staging directory
fn file_name_for(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    let base = url
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let base = if base.is_empty() { "media" } else { base };

    format!("{}-{}", &digest[..16], base)
}

#[async_trait]
impl MediaCache for HttpMediaCache {
    async fn stage(&self, remote_url: &str) -> Result<PathBuf, MediaError> {
        if let Some(path) = self.lookup(remote_url) {
            return Ok(path);
        }

        let lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(remote_url.to_string()).or_default())
        };
        let _guard = lock.lock().await;

        // A concurrent stage for the same URL may have won the race.
        if let Some(path) = self.lookup(remote_url) {
            return Ok(path);
        }

        let path = self.download(remote_url).await?;
        self.staged
            .lock()
            .unwrap()
            .insert(remote_url.to_string(), path.clone());

        tracing::debug!(url = remote_url, path = %path.display(), "Staged media");
        Ok(path)
    }

    fn resolve(&self, remote_url: &str) -> Result<PathBuf, MediaError> {
        self.lookup(remote_url).ok_or_else(|| MediaError::NotStaged {
            url: remote_url.to_string(),
        })
    }

    async fn release(&self, remote_url: &str) {
        let removed = self.staged.lock().unwrap().remove(remote_url);
        self.inflight.lock().await.remove(remote_url);

        if let Some(path) = removed {
            if let Err(error) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    url = remote_url,
                    path = %path.display(),
                    %error,
                    "Could not delete staged media file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cache_in(dir: &TempDir) -> HttpMediaCache {
        HttpMediaCache::new(dir.path().join("staging")).expect("cache")
    }

    #[tokio::test]
    async fn stage_downloads_and_resolves() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let url = format!("{}/media/photo.jpg", server.uri());

        let staged = cache.stage(&url).await.unwrap();
        let resolved = cache.resolve(&url).unwrap();

        assert_eq!(staged, resolved);
        let contents = tokio::fs::read(&staged).await.unwrap();
        assert_eq!(contents, b"jpeg-bytes");
    }

    #[tokio::test]
    async fn stage_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let url = format!("{}/media/photo.jpg", server.uri());

        let first = cache.stage(&url).await.unwrap();
        let second = cache.stage(&url).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_stages_share_one_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/large.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"video".to_vec())
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let url = format!("{}/media/large.mp4", server.uri());

        let (a, b) = tokio::join!(cache.stage(&url), cache.stage(&url));
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn resolve_never_fetches() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let result = cache.resolve("https://example.com/never-staged.jpg");
        assert!(matches!(result, Err(MediaError::NotStaged { .. })));
    }

    #[tokio::test]
    async fn failed_download_records_no_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let url = format!("{}/media/missing.jpg", server.uri());

        let result = cache.stage(&url).await;
        assert!(matches!(result, Err(MediaError::Fetch { .. })));
        assert!(matches!(
            cache.resolve(&url),
            Err(MediaError::NotStaged { .. })
        ));
    }

    #[tokio::test]
    async fn release_deletes_file_and_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let url = format!("{}/media/photo.jpg", server.uri());

        let staged = cache.stage(&url).await.unwrap();
        cache.release(&url).await;

        assert!(!staged.exists());
        assert!(matches!(
            cache.resolve(&url),
            Err(MediaError::NotStaged { .. })
        ));

        // Releasing again is a no-op.
        cache.release(&url).await;
    }

    #[tokio::test]
    async fn construction_purges_stale_files() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let stale = staging.join("stale.jpg");
        std::fs::write(&stale, b"old").unwrap();

        let cache = HttpMediaCache::new(staging.clone()).expect("cache");

        assert!(!stale.exists());
        assert!(cache.staging_dir().exists());
    }

    #[test]
    fn file_names_are_collision_free_per_url() {
        let a = file_name_for("https://host-a.example/photo.jpg?size=large");
        let b = file_name_for("https://host-b.example/photo.jpg");

        assert_ne!(a, b);
        assert!(a.ends_with("-photo.jpg"));
        assert!(b.ends_with("-photo.jpg"));
    }
}
