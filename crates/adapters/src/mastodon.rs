//! Mastodon publish target
//!
//! Token-authenticated, so the target is ready as soon as it is built.
//! Quoted posts are carried as a trailing QRT line since the API has no
//! native quote field.

use async_trait::async_trait;
use mirrorpost_domain::{MediaRef, PublishReceipt, PublishTarget, ReadyGate, TargetError};
use reqwest::multipart;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Publish target for a Mastodon instance
pub struct MastodonTarget {
    client: Client,
    base_url: String,
    access_token: SecretString,
    gate: ReadyGate,
    enabled: bool,
}

impl MastodonTarget {
    pub fn new(instance_url: String, access_token: SecretString) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: instance_url.trim_end_matches('/').to_string(),
            access_token,
            gate: ReadyGate::ready_now(),
            enabled: true,
        }
    }

    /// A disabled target (for configuration without Mastodon)
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            access_token: SecretString::new("".into()),
            gate: ReadyGate::ready_now(),
            enabled: false,
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

#[derive(Deserialize)]
struct MediaUploadResponse {
    id: String,
}

#[derive(Serialize)]
struct StatusRequest {
    status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_ids: Vec<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    id: String,
    url: Option<String>,
}

#[async_trait]
impl PublishTarget for MastodonTarget {
    fn name(&self) -> &'static str {
        "mastodon"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn readiness(&self) -> ReadyGate {
        self.gate.clone()
    }

    async fn upload_media(&self, path: &Path) -> Result<MediaRef, TargetError> {
        if !self.enabled {
            return Err(TargetError::NotReady);
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| TargetError::Upload {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());

        let form =
            multipart::Form::new().part("file", multipart::Part::bytes(bytes).file_name(file_name));

        let url = format!("{}/api/v2/media", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer())
            .multipart(form)
            .send()
            .await
            .map_err(|e| TargetError::Upload {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(TargetError::Auth("Invalid access token".to_string()));
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(TargetError::RateLimited),
            StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY => {
                return Err(TargetError::UnsupportedMediaType {
                    path: path.to_path_buf(),
                });
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(TargetError::Upload {
                    path: path.to_path_buf(),
                    message: body,
                });
            }
            _ => {}
        }

        let upload: MediaUploadResponse =
            response.json().await.map_err(|e| TargetError::Upload {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(MediaRef(upload.id))
    }

    async fn publish(
        &self,
        body: &str,
        media: &[MediaRef],
        quoted_url: Option<&str>,
    ) -> Result<PublishReceipt, TargetError> {
        if !self.enabled {
            return Err(TargetError::NotReady);
        }

        let mut status = body.to_string();
        if let Some(url) = quoted_url {
            status.push_str("\n\nQRT:");
            status.push_str(url);
        }

        let request = StatusRequest {
            status,
            media_ids: media.iter().map(|m| m.0.clone()).collect(),
        };

        let url = format!("{}/api/v1/statuses", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&request)
            .send()
            .await
            .map_err(|e| TargetError::Rejected {
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(TargetError::Auth("Invalid access token".to_string()));
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(TargetError::RateLimited),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(TargetError::Rejected { message: body });
            }
            _ => {}
        }

        let posted: StatusResponse = response.json().await.map_err(|e| TargetError::Rejected {
            message: e.to_string(),
        })?;

        Ok(PublishReceipt {
            id: posted.id,
            url: posted.url,
        })
    }
}
