//! Mirror node REST client

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Duration;

use super::http::JsonClient;
use crate::domain::ledger::{AccountRecord, LedgerIndex, TokenAllowance, TransactionRecord};
use crate::shared::config::MirrorNodeCfg;
use crate::shared::errors::ApiError;
use crate::shared::types::AccountId;

const ALLOWANCE_PAGE_LIMIT: &str = "100";

#[derive(Debug, Deserialize)]
struct AllowancesResponse {
    #[serde(default)]
    allowances: Vec<TokenAllowance>,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<TransactionRecord>,
}

pub struct MirrorNodeClient {
    http: JsonClient,
}

impl MirrorNodeClient {
    pub fn new(cfg: &MirrorNodeCfg) -> Result<Self, ApiError> {
        Ok(Self {
            http: JsonClient::new(&cfg.base_url, Duration::from_millis(cfg.timeout_ms), HeaderMap::new())?,
        })
    }
}

#[async_trait]
impl LedgerIndex for MirrorNodeClient {
    async fn account(&self, account_id: &AccountId) -> Result<AccountRecord, ApiError> {
        self.http
            .get_json(&format!("accounts/{}", account_id), &[])
            .await
    }

    async fn token_allowances(&self, account_id: &AccountId) -> Result<Vec<TokenAllowance>, ApiError> {
        let response: AllowancesResponse = self
            .http
            .get_json(
                &format!("accounts/{}/allowances/tokens", account_id),
                &[("limit", ALLOWANCE_PAGE_LIMIT.to_string())],
            )
            .await?;
        Ok(response.allowances)
    }

    /// A transaction the mirror has not indexed yet yields an empty list.
    async fn transaction(&self, transaction_id: &str) -> Result<Vec<TransactionRecord>, ApiError> {
        match self
            .http
            .get_json::<TransactionsResponse>(&format!("transactions/{}", transaction_id), &[])
            .await
        {
            Ok(response) => Ok(response.transactions),
            Err(ApiError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::TransactionStatus;
    use crate::infrastructure::http::test_server::serve_once;

    fn client(base_url: String) -> MirrorNodeClient {
        MirrorNodeClient::new(&MirrorNodeCfg {
            base_url,
            ..MirrorNodeCfg::default()
        })
        .unwrap()
    }

    #[test]
    fn parses_allowances_page() {
        let json = r#"{
            "allowances": [
                {"owner":"0.0.1234","spender":"0.0.3949434","token_id":"0.0.731861","amount":100,"amount_granted":100}
            ],
            "links": {"next": null}
        }"#;
        let page: AllowancesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.allowances[0].spender, "0.0.3949434");
    }

    #[test]
    fn empty_transaction_page_is_pending() {
        let page: TransactionsResponse = serde_json::from_str(r#"{"transactions":[]}"#).unwrap();
        assert_eq!(TransactionStatus::from_records(&page.transactions), TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn unindexed_transaction_is_pending() {
        let (base_url, server) =
            serve_once("404 Not Found", &[], r#"{"_status":{"messages":[{"message":"Not found"}]}}"#).await;

        let records = client(base_url).transaction("0.0.1234-1700000000-000000001").await.unwrap();

        assert_eq!(TransactionStatus::from_records(&records), TransactionStatus::Pending);
        assert!(server
            .await
            .unwrap()
            .starts_with("GET /transactions/0.0.1234-1700000000-000000001 "));
    }

    #[tokio::test]
    async fn mirror_errors_other_than_404_surface() {
        let (base_url, server) = serve_once("503 Service Unavailable", &[], "maintenance").await;

        let err = client(base_url).transaction("0.0.1234-1700000000-000000001").await.unwrap_err();

        assert!(matches!(err, ApiError::Upstream { status: 503, .. }));
        server.await.unwrap();
    }
}
