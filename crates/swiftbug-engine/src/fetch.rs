//! Retrieval of shared bug reports from a URL.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// Each variant carries its own user-facing message; callers never see a
/// generic "fetch failed".
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Unable to reach {url}, please check your network connection ({reason})")]
    Network { url: String, reason: String },

    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },

    #[error("The file is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Not a valid bug report format")]
    InvalidFormat,
}

#[async_trait]
pub trait ReportFetcher: Send + Sync {
    /// GET `url` and parse the body as JSON.
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReportFetcher for HttpFetcher {
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        info!("Fetching bug report from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        if !is_json {
            warn!("Content-Type of {} is not application/json, parsing anyway", url);
        }

        let body = response.bytes().await.map_err(|e| FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| FetchError::InvalidJson(e.to_string()))
    }
}

/// Accepts an export envelope (`{report: ...}`) or a bare report carrying
/// `url` and `timestamp`.
pub fn extract_report(json: Value) -> Result<Value, FetchError> {
    match json {
        Value::Object(mut map) => {
            if let Some(report) = map.remove("report").filter(|r| r.is_object()) {
                return Ok(report);
            }
            let has = |key: &str| {
                map.get(key)
                    .is_some_and(|v| !v.is_null() && v.as_str() != Some(""))
            };
            if has("url") && has("timestamp") {
                Ok(Value::Object(map))
            } else {
                Err(FetchError::InvalidFormat)
            }
        }
        _ => Err(FetchError::InvalidFormat),
    }
}
