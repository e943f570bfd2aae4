use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use std::time::Duration;

use super::Zone;

pub const DEFAULT_BASE_URL: &str = "https://www.hvakosterstrommen.no/api/v1/prices";

/// Error types for price source requests
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request did not complete in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Source answered with a non-success status
    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Source could not be set up
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Configuration for the HTTP price source
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL the per-day document path is appended to
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Trait for external hourly price sources
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Get the source name
    fn name(&self) -> &str;

    /// Raw payload for one zone and market day.
    /// `None` means the day has not been published yet.
    async fn fetch_day(&self, zone: Zone, date: NaiveDate) -> Result<Option<String>, SourceError>;
}

/// Client for the public hvakosterstrommen.no price API
pub struct HvaKosterStrommenSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HvaKosterStrommenSource {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    /// `{base}/{YYYY}/{MM-DD}_{ZONE}.json`
    pub fn request_url(&self, zone: Zone, date: NaiveDate) -> String {
        request_url(&self.base_url, zone, date)
    }
}

pub fn request_url(base_url: &str, zone: Zone, date: NaiveDate) -> String {
    format!(
        "{}/{}/{:02}-{:02}_{}.json",
        base_url.trim_end_matches('/'),
        date.year(),
        date.month(),
        date.day(),
        zone.code()
    )
}

#[async_trait]
impl PriceSource for HvaKosterStrommenSource {
    fn name(&self) -> &str {
        "hvakosterstrommen.no"
    }

    async fn fetch_day(&self, zone: Zone, date: NaiveDate) -> Result<Option<String>, SourceError> {
        let url = self.request_url(zone, date);
        log::debug!("Fetching prices from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.timeout)
            } else {
                SourceError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            log::debug!("No published prices at {}", url);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::NetworkError(e.to_string()))?;

        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_layout() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(
            request_url(DEFAULT_BASE_URL, Zone::NO3, date),
            "https://www.hvakosterstrommen.no/api/v1/prices/2025/03-07_NO3.json"
        );
    }

    #[test]
    fn test_request_url_trims_trailing_slash() {
        let source = HvaKosterStrommenSource::new(SourceConfig {
            base_url: "http://localhost:8080/prices/".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        assert_eq!(
            source.request_url(Zone::NO1, date),
            "http://localhost:8080/prices/2025/12-31_NO1.json"
        );
    }
}
