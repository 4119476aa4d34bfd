//! Ledger index domain - the mirror node contract and its records

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::shared::errors::ApiError;
use crate::shared::types::AccountId;

/// Account record as returned by `GET /accounts/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: String,
    #[serde(default)]
    pub balance: Option<AccountBalanceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalanceRecord {
    /// Native balance in tinybars
    #[serde(default)]
    pub balance: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub tokens: Vec<TokenBalanceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalanceRecord {
    pub token_id: String,
    pub balance: u64,
}

/// Fungible token allowance granted by an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAllowance {
    pub owner: String,
    pub spender: String,
    pub token_id: String,
    pub amount: u64,
    #[serde(default)]
    pub amount_granted: Option<u64>,
}

/// One entry of `GET /transactions/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub result: String,
    #[serde(default)]
    pub consensus_timestamp: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Settlement state of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransactionStatus {
    /// Not indexed by the mirror node yet
    Pending,
    Success { consensus_timestamp: Option<String> },
    Failed { result: String },
}

impl TransactionStatus {
    /// The first record decides; an empty list means the mirror has not caught up.
    pub fn from_records(records: &[TransactionRecord]) -> Self {
        match records.first() {
            None => TransactionStatus::Pending,
            Some(record) if record.result == "SUCCESS" => TransactionStatus::Success {
                consensus_timestamp: record.consensus_timestamp.clone(),
            },
            Some(record) => TransactionStatus::Failed {
                result: record.result.clone(),
            },
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Read access to the ledger mirror/index API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerIndex: Send + Sync {
    /// `NotFound` when the account is unknown (or not yet indexed).
    async fn account(&self, account_id: &AccountId) -> Result<AccountRecord, ApiError>;

    async fn token_allowances(&self, account_id: &AccountId) -> Result<Vec<TokenAllowance>, ApiError>;

    /// Empty when the transaction is not indexed yet.
    async fn transaction(&self, transaction_id: &str) -> Result<Vec<TransactionRecord>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_mirror_account_shape() {
        let json = r#"{
            "account": "0.0.1234",
            "balance": {
                "balance": 250000000,
                "timestamp": "1700000000.000000001",
                "tokens": [
                    {"token_id": "0.0.731861", "balance": 5},
                    {"token_id": "0.0.456858", "balance": 0}
                ]
            },
            "evm_address": "0x0000000000000000000000000000000000000004d2"
        }"#;
        let record: AccountRecord = serde_json::from_str(json).unwrap();
        let balance = record.balance.unwrap();
        assert_eq!(balance.balance, Some(250_000_000));
        assert_eq!(balance.tokens.len(), 2);
        assert_eq!(balance.tokens[1].balance, 0);
    }

    #[test]
    fn empty_transaction_list_is_pending() {
        assert_eq!(TransactionStatus::from_records(&[]), TransactionStatus::Pending);
        assert!(!TransactionStatus::Pending.is_final());
    }

    #[test]
    fn first_record_decides_status() {
        let ok = TransactionRecord {
            transaction_id: "0.0.1234-1700000000-000000001".into(),
            result: "SUCCESS".into(),
            consensus_timestamp: Some("1700000001.000000002".into()),
            name: Some("CRYPTOTRANSFER".into()),
        };
        let failed = TransactionRecord {
            result: "INSUFFICIENT_PAYER_BALANCE".into(),
            ..ok.clone()
        };
        assert!(matches!(TransactionStatus::from_records(&[ok.clone()]), TransactionStatus::Success { .. }));
        assert_eq!(
            TransactionStatus::from_records(&[failed, ok]),
            TransactionStatus::Failed { result: "INSUFFICIENT_PAYER_BALANCE".into() }
        );
    }
}
