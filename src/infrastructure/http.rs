//! Shared JSON-over-HTTP plumbing with status classification

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::shared::errors::ApiError;
use crate::shared::utils::join_url;

/// Longest upstream body kept in an error message
const MAX_ERROR_BODY: usize = 256;

/// `reqwest` client bound to one base URL
#[derive(Debug, Clone)]
pub struct JsonClient {
    client: Client,
    base_url: String,
}

impl JsonClient {
    pub fn new(base_url: &str, timeout: Duration, headers: HeaderMap) -> Result<Self, ApiError> {
        let mut builder = Client::builder().timeout(timeout).default_headers(headers);
        if is_loopback(base_url) {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let url = join_url(&self.base_url, path);
        debug!("GET {}", url);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        if let Some(err) = classify_status(status, retry_after.as_deref(), &body) {
            debug!("GET {} failed: {}", url, err);
            return Err(err);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Maps a non-success status to its error; `None` for 2xx.
pub fn classify_status(status: StatusCode, retry_after: Option<&str>, body: &str) -> Option<ApiError> {
    if status.is_success() {
        return None;
    }
    let err = match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(truncate(body)),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            retry_after: retry_after.and_then(parse_retry_after),
        },
        _ => ApiError::Upstream {
            status: status.as_u16(),
            message: truncate(body),
        },
    };
    Some(err)
}

/// Reads the delta-seconds form of `Retry-After`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn is_loopback(base_url: &str) -> bool {
    match Url::parse(base_url).ok().and_then(|url| url.host_str().map(str::to_string)) {
        Some(host) => host == "localhost" || host.parse::<std::net::IpAddr>().map_or(false, |ip| ip.is_loopback()),
        None => false,
    }
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
