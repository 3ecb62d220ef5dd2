use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Resolved location for a login IP. Both fields are best-effort.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// IP geolocation for last-login records. Lookup failures degrade to "no
/// location" and never block authentication.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: &str) -> Option<GeoLocation>;
}

/// Used when no lookup endpoint is configured.
pub struct NoopGeoLocator;

#[async_trait]
impl GeoLocator for NoopGeoLocator {
    async fn locate(&self, _ip: &str) -> Option<GeoLocation> {
        None
    }
}

pub struct HttpGeoLocator {
    client: Client,
    base_url: String,
}

impl HttpGeoLocator {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self, ip: &str) -> Option<GeoLocation> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), ip);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<GeoLocation>().await {
                    Ok(location) => Some(location),
                    Err(e) => {
                        tracing::warn!("Unreadable geolocation response for {}: {}", ip, e);
                        None
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(
                    "Geolocation lookup for {} returned status {}",
                    ip,
                    response.status()
                );
                None
            }
            Err(e) => {
                tracing::warn!("Geolocation lookup for {} failed: {}", ip, e);
                None
            }
        }
    }
}
