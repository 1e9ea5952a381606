//! Evidence upload.
//!
//! Proof files are handed to a media host that returns a public URL.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Folder proof files are stored under on the media host
pub const PROOF_FOLDER: &str = "proofs";

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Stores the bytes and returns their public URL
    async fn store(&self, bytes: Vec<u8>, content_type: Option<&str>) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

pub struct HttpEvidenceStore {
    client: reqwest::Client,
    url: String,
}

impl HttpEvidenceStore {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EvidenceStore for HttpEvidenceStore {
    async fn store(&self, bytes: Vec<u8>, content_type: Option<&str>) -> Result<String> {
        let name = Uuid::new_v4().to_string();
        let mut part = Part::bytes(bytes).file_name(name.clone());
        if let Some(mime) = content_type {
            part = part.mime_str(mime)?;
        }

        let form = Form::new()
            .text("folder", PROOF_FOLDER)
            .text("public_id", name)
            .part("file", part);

        let response = self.client.post(&self.url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Upload host returned HTTP {}", response.status()));
        }

        let body: UploadResponse = response.json().await?;
        debug!("Stored evidence at {}", body.url);
        Ok(body.url)
    }
}

/// Used when no upload host is configured
pub struct DisabledEvidenceStore;

#[async_trait]
impl EvidenceStore for DisabledEvidenceStore {
    async fn store(&self, _bytes: Vec<u8>, _content_type: Option<&str>) -> Result<String> {
        Err(anyhow!("Evidence upload is not configured"))
    }
}
