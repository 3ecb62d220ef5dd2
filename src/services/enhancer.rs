use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Hints forwarded to the enhancement provider alongside the image.
#[derive(Debug, Clone, Default)]
pub struct EnhanceOptions {
    pub mime: String,
    pub style: Option<String>,
    pub room_type: Option<String>,
}

/// The external image enhancement capability. Treated as opaque, slow and
/// failure-prone; callers must not commit ledger mutations until a call has
/// returned successfully.
#[async_trait]
pub trait ImageEnhancer: Send + Sync {
    async fn enhance(&self, image: &[u8], options: &EnhanceOptions) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct EnhanceApiRequest {
    image: String, // base64 encoded original
    mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnhanceApiResponse {
    image: String, // base64 encoded enhanced rendition
}

/// HTTP client for the hosted enhancement API.
pub struct HttpEnhancer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpEnhancer {
    pub fn new(endpoint: String, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl ImageEnhancer for HttpEnhancer {
    async fn enhance(&self, image: &[u8], options: &EnhanceOptions) -> Result<Vec<u8>> {
        let request = EnhanceApiRequest {
            image: general_purpose::STANDARD.encode(image),
            mime: options.mime.clone(),
            style: options.style.clone(),
            room_type: options.room_type.clone(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Enhancement(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Enhancement(format!(
                "Provider returned status {}",
                response.status()
            )));
        }

        let body: EnhanceApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::Enhancement(format!("Unreadable response: {}", e)))?;

        general_purpose::STANDARD
            .decode(&body.image)
            .map_err(|e| AppError::Enhancement(format!("Invalid image payload: {}", e)))
    }
}

/// Development fallback used when no provider endpoint is configured.
/// Returns the original bytes unchanged so the rest of the pipeline can be
/// exercised end to end.
pub struct PassthroughEnhancer;

#[async_trait]
impl ImageEnhancer for PassthroughEnhancer {
    async fn enhance(&self, image: &[u8], _options: &EnhanceOptions) -> Result<Vec<u8>> {
        Ok(image.to_vec())
    }
}
