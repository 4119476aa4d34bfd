//! Swap-route aggregator client

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::time::Duration;

use super::http::JsonClient;
use crate::domain::swap::{RouteSource, SwapQuoteRequest, SwapRoute};
use crate::shared::config::AggregatorCfg;
use crate::shared::errors::ApiError;

pub struct AggregatorClient {
    http: JsonClient,
}

impl AggregatorClient {
    pub fn new(cfg: &AggregatorCfg) -> Result<Self, ApiError> {
        Ok(Self {
            http: JsonClient::new(&cfg.base_url, Duration::from_millis(cfg.timeout_ms), HeaderMap::new())?,
        })
    }
}

/// Query string for `GET /rates`
pub fn rates_query(request: &SwapQuoteRequest) -> Vec<(&'static str, String)> {
    vec![
        ("tokenFrom", request.token_from.to_string()),
        ("tokenTo", request.token_to.to_string()),
        ("amount", request.amount.to_string()),
        ("isReverse", request.is_reverse.to_string()),
    ]
}

#[async_trait]
impl RouteSource for AggregatorClient {
    async fn rates(&self, request: &SwapQuoteRequest) -> Result<Vec<SwapRoute>, ApiError> {
        self.http.get_json("rates", &rates_query(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::AssetId;

    #[test]
    fn query_uses_aggregator_parameter_names() {
        let request = SwapQuoteRequest::exact_out(AssetId::Native, AssetId::token("0.0.731861"), 5_000_000);
        let query = rates_query(&request);
        assert_eq!(
            query,
            vec![
                ("tokenFrom", "HBAR".to_string()),
                ("tokenTo", "0.0.731861".to_string()),
                ("amount", "5000000".to_string()),
                ("isReverse", "true".to_string()),
            ]
        );
    }
}
