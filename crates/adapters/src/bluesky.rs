//! Bluesky publish target
//!
//! Session login drives the readiness gate; the engine will not tick until
//! it has completed. Uploads accept JPEG and PNG only, matching what the
//! image embed supports; anything else is reported as unsupported so the
//! engine can publish the post without it.

use async_trait::async_trait;
use mirrorpost_domain::{MediaRef, PublishReceipt, PublishTarget, ReadyGate, TargetError};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Publish target for a Bluesky (AT Protocol) account
pub struct BlueskyTarget {
    client: Client,
    base_url: String,
    identifier: String,
    password: SecretString,
    session: RwLock<Option<Session>>,
    gate: ReadyGate,
    enabled: bool,
}

#[derive(Clone)]
struct Session {
    access_jwt: String,
    did: String,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "accessJwt")]
    access_jwt: String,
    did: String,
}

#[derive(Deserialize)]
struct UploadBlobResponse {
    blob: serde_json::Value,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

impl BlueskyTarget {
    pub fn new(service_url: String, identifier: String, password: SecretString) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: service_url.trim_end_matches('/').to_string(),
            identifier,
            password,
            session: RwLock::new(None),
            gate: ReadyGate::new(),
            enabled: true,
        }
    }

    /// A disabled target (for configuration without Bluesky)
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            identifier: String::new(),
            password: SecretString::new("".into()),
            session: RwLock::new(None),
            gate: ReadyGate::ready_now(),
            enabled: false,
        }
    }

    /// Create a session and mark the target ready. On failure the gate
    /// never fires and the engine stays initializing.
    pub async fn login(&self) -> Result<(), TargetError> {
        let url = format!("{}/xrpc/com.atproto.server.createSession", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "identifier": self.identifier,
                "password": self.password.expose_secret(),
            }))
            .send()
            .await
            .map_err(|e| TargetError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TargetError::Auth(format!("Login failed: {}", body)));
        }

        let created: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| TargetError::Auth(e.to_string()))?;

        *self.session.write().unwrap() = Some(Session {
            access_jwt: created.access_jwt,
            did: created.did,
        });
        tracing::info!(identifier = %self.identifier, "Logged in to Bluesky");
        self.gate.set_ready();
        Ok(())
    }

    fn session(&self) -> Result<Session, TargetError> {
        self.session
            .read()
            .unwrap()
            .clone()
            .ok_or(TargetError::NotReady)
    }
}

/// JPEG and PNG are the only encodings the image embed accepts
fn image_mime_for(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        _ => None,
    }
}

#[async_trait]
impl PublishTarget for BlueskyTarget {
    fn name(&self) -> &'static str {
        "bluesky"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn readiness(&self) -> ReadyGate {
        self.gate.clone()
    }

    async fn upload_media(&self, path: &Path) -> Result<MediaRef, TargetError> {
        let session = self.session()?;

        let mime = image_mime_for(path).ok_or_else(|| TargetError::UnsupportedMediaType {
            path: path.to_path_buf(),
        })?;

        let bytes = tokio::fs::read(path).await.map_err(|e| TargetError::Upload {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let url = format!("{}/xrpc/com.atproto.repo.uploadBlob", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", session.access_jwt))
            .header("Content-Type", mime)
            .body(bytes)
            .send()
            .await
            .map_err(|e| TargetError::Upload {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(TargetError::Auth("Session expired".to_string()));
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(TargetError::RateLimited),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(TargetError::Upload {
                    path: path.to_path_buf(),
                    message: body,
                });
            }
            _ => {}
        }

        let uploaded: UploadBlobResponse =
            response.json().await.map_err(|e| TargetError::Upload {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(MediaRef(uploaded.blob.to_string()))
    }

    async fn publish(
        &self,
        body: &str,
        media: &[MediaRef],
        quoted_url: Option<&str>,
    ) -> Result<PublishReceipt, TargetError> {
        let session = self.session()?;

        let mut text = body.to_string();
        if let Some(url) = quoted_url {
            text.push_str("\n\nQRT:");
            text.push_str(url);
        }

        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| TargetError::Rejected {
                message: e.to_string(),
            })?;

        let mut record = serde_json::json!({
            "$type": POST_COLLECTION,
            "text": text,
            "createdAt": created_at,
        });

        if !media.is_empty() {
            let images: Vec<serde_json::Value> = media
                .iter()
                .filter_map(|m| serde_json::from_str::<serde_json::Value>(&m.0).ok())
                .map(|blob| serde_json::json!({ "image": blob, "alt": "" }))
                .collect();
            record["embed"] = serde_json::json!({
                "$type": "app.bsky.embed.images",
                "images": images,
            });
        }

        let url = format!("{}/xrpc/com.atproto.repo.createRecord", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", session.access_jwt))
            .json(&serde_json::json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "record": record,
            }))
            .send()
            .await
            .map_err(|e| TargetError::Rejected {
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(TargetError::Auth("Session expired".to_string()));
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(TargetError::RateLimited),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(TargetError::Rejected { message: body });
            }
            _ => {}
        }

        let created: CreateRecordResponse =
            response.json().await.map_err(|e| TargetError::Rejected {
                message: e.to_string(),
            })?;

        Ok(PublishReceipt {
            id: created.uri,
            url: None,
        })
    }
}
