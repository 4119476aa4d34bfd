//! Price API client (token list and USD prices)

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::warn;

use super::http::JsonClient;
use crate::domain::price::PriceSource;
use crate::shared::config::PriceApiCfg;
use crate::shared::errors::ApiError;
use crate::shared::types::TokenInfo;

const API_KEY_HEADER: &str = "x-api-key";

/// Without an API key every call fails with a configuration error and nothing is sent.
pub struct PriceApiClient {
    http: Option<JsonClient>,
    key_env: String,
}

impl PriceApiClient {
    pub fn new(cfg: &PriceApiCfg) -> Result<Self, ApiError> {
        Self::with_key(cfg, cfg.api_key())
    }

    pub fn with_key(cfg: &PriceApiCfg, api_key: Option<String>) -> Result<Self, ApiError> {
        let http = match api_key {
            Some(key) => {
                let mut headers = HeaderMap::new();
                let value = HeaderValue::from_str(&key)
                    .map_err(|_| ApiError::Configuration("price API key is not a valid header value".into()))?;
                headers.insert(API_KEY_HEADER, value);
                Some(JsonClient::new(&cfg.base_url, Duration::from_millis(cfg.timeout_ms), headers)?)
            }
            None => {
                warn!("{} is not set; price lookups are disabled", cfg.api_key_env);
                None
            }
        };
        Ok(Self {
            http,
            key_env: cfg.api_key_env.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.http.is_some()
    }

    fn http(&self) -> Result<&JsonClient, ApiError> {
        self.http
            .as_ref()
            .ok_or_else(|| ApiError::Configuration(format!("price API key missing (set {})", self.key_env)))
    }
}

#[async_trait]
impl PriceSource for PriceApiClient {
    async fn known_tokens(&self) -> Result<Vec<TokenInfo>, ApiError> {
        self.http()?.get_json("tokens/known", &[]).await
    }

    async fn token(&self, token_id: &str) -> Result<TokenInfo, ApiError> {
        self.http()?.get_json(&format!("tokens/{}", token_id), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::http::test_server::serve_once;

    #[tokio::test]
    async fn missing_key_fails_without_calling() {
        let cfg = PriceApiCfg {
            // Unroutable; a request would surface as a transport error instead.
            base_url: "http://127.0.0.1:9".into(),
            ..PriceApiCfg::default()
        };
        let client = PriceApiClient::with_key(&cfg, None).unwrap();
        assert!(!client.is_configured());

        let err = client.known_tokens().await.unwrap_err();
        assert!(matches!(err, ApiError::Configuration(ref m) if m.contains("PRICE_API_KEY")));
        assert!(matches!(client.token("0.0.731861").await, Err(ApiError::Configuration(_))));
    }

    #[tokio::test]
    async fn sends_api_key_header() {
        let body = r#"{"id":"0.0.731861","name":"SaucerSwap","symbol":"SAUCE","decimals":6,"priceUsd":0.02}"#;
        let (base_url, server) = serve_once("200 OK", &[], body).await;
        let cfg = PriceApiCfg {
            base_url,
            ..PriceApiCfg::default()
        };
        let client = PriceApiClient::with_key(&cfg, Some("secret-key".into())).unwrap();

        let token = client.token("0.0.731861").await.unwrap();

        assert_eq!(token.price_usd, Some(0.02));
        let request = server.await.unwrap().to_lowercase();
        assert!(request.starts_with("get /tokens/0.0.731861 "));
        assert!(request.contains("x-api-key: secret-key\r\n"));
    }

    #[test]
    fn rejects_key_with_control_characters() {
        let err = PriceApiClient::with_key(&PriceApiCfg::default(), Some("bad\nkey".into()))
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Configuration(_)));
    }
}
