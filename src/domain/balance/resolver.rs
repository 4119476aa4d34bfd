//! Builds account snapshots from mirror records and answers association checks

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AccountBalanceSnapshot, AccountLookup, AssetBalance};
use crate::domain::cache::QueryResult;
use crate::domain::ledger::{AccountRecord, LedgerIndex, TokenAllowance};
use crate::domain::policy::{FailPolicy, ASSOCIATION_FAILURE_POLICY};
use crate::shared::errors::ApiError;
use crate::shared::types::{AccountId, AssetId};

/// Unifies the native balance and token entries of a record into one snapshot.
///
/// Every token entry is an association; only strictly positive entries are balances.
pub fn unify_balances(account_id: &AccountId, record: &AccountRecord) -> AccountBalanceSnapshot {
    let mut balances = Vec::new();
    let mut associated_assets = BTreeSet::new();

    if let Some(balance) = &record.balance {
        if let Some(native) = balance.balance {
            balances.push(AssetBalance::new(AssetId::Native, native));
        }
        for token in &balance.tokens {
            let asset = AssetId::token(token.token_id.clone());
            if token.balance > 0 {
                balances.push(AssetBalance::new(asset.clone(), token.balance));
            }
            associated_assets.insert(asset);
        }
    }

    AccountBalanceSnapshot {
        account_id: account_id.clone(),
        balances,
        associated_assets,
    }
}

/// Association answer derived from a balances query.
///
/// Native assets short-circuit to `true`. A failed or still-empty lookup
/// resolves through `policy`; an unknown account has no associations.
pub fn association_from(
    balances: &QueryResult<AccountLookup>,
    asset: &AssetId,
    policy: FailPolicy,
) -> bool {
    if asset.is_native() {
        return true;
    }
    match &balances.data {
        Some(AccountLookup::Found(snapshot)) => snapshot.is_associated(asset),
        Some(AccountLookup::NotFound(_)) => false,
        None => policy.permits(),
    }
}

/// Resolves account balances through the ledger index
pub struct BalanceResolver {
    ledger: Arc<dyn LedgerIndex>,
    association_policy: FailPolicy,
}

impl BalanceResolver {
    pub fn new(ledger: Arc<dyn LedgerIndex>) -> Self {
        Self {
            ledger,
            association_policy: ASSOCIATION_FAILURE_POLICY,
        }
    }

    pub fn association_policy(&self) -> FailPolicy {
        self.association_policy
    }

    /// Fetches and unifies; a 404 becomes `AccountLookup::NotFound`, not an error.
    pub async fn resolve(&self, account_id: &AccountId) -> Result<AccountLookup, ApiError> {
        match self.ledger.account(account_id).await {
            Ok(record) => {
                let snapshot = unify_balances(account_id, &record);
                debug!(
                    "resolved {}: {} balances, {} associations",
                    account_id,
                    snapshot.balances.len(),
                    snapshot.associated_assets.len()
                );
                Ok(AccountLookup::Found(snapshot))
            }
            Err(ApiError::NotFound(_)) => {
                debug!("account {} not found on mirror node", account_id);
                Ok(AccountLookup::NotFound(account_id.clone()))
            }
            Err(err) => Err(err),
        }
    }

    /// Uncached association check; failures resolve through the association policy.
    pub async fn is_associated(&self, account_id: &AccountId, asset: &AssetId) -> bool {
        if asset.is_native() {
            return true;
        }
        match self.resolve(account_id).await {
            Ok(AccountLookup::Found(snapshot)) => snapshot.is_associated(asset),
            Ok(AccountLookup::NotFound(_)) => false,
            Err(err) => {
                warn!(
                    "association check for {} on {} failed: {}; assuming {:?}",
                    asset, account_id, err, self.association_policy
                );
                self.association_policy.permits()
            }
        }
    }

    pub async fn token_allowances(&self, account_id: &AccountId) -> Result<Vec<TokenAllowance>, ApiError> {
        self.ledger.token_allowances(account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::{AccountBalanceRecord, MockLedgerIndex, TokenBalanceRecord};

    fn account(id: &str) -> AccountId {
        id.parse().unwrap()
    }

    fn record(native: Option<u64>, tokens: &[(&str, u64)]) -> AccountRecord {
        AccountRecord {
            account: "0.0.1234".into(),
            balance: Some(AccountBalanceRecord {
                balance: native,
                timestamp: None,
                tokens: tokens
                    .iter()
                    .map(|(id, balance)| TokenBalanceRecord {
                        token_id: id.to_string(),
                        balance: *balance,
                    })
                    .collect(),
            }),
        }
    }

    #[test]
    fn zero_balance_tokens_are_associations_only() {
        let snapshot = unify_balances(
            &account("0.0.1234"),
            &record(Some(1_000), &[("A", 5), ("B", 0), ("C", 3)]),
        );

        assert_eq!(
            snapshot.balances,
            vec![
                AssetBalance::new(AssetId::Native, 1_000),
                AssetBalance::new(AssetId::token("A"), 5),
                AssetBalance::new(AssetId::token("C"), 3),
            ]
        );
        let associated: Vec<_> = snapshot.associated_assets.iter().cloned().collect();
        assert_eq!(associated, vec![AssetId::token("A"), AssetId::token("B"), AssetId::token("C")]);
    }

    #[test]
    fn every_positive_balance_is_associated() {
        let snapshot = unify_balances(&account("0.0.1"), &record(Some(7), &[("X", 1), ("Y", 0), ("Z", 9)]));
        for balance in &snapshot.balances {
            assert!(snapshot.is_associated(&balance.asset));
        }
    }

    #[test]
    fn missing_native_balance_is_not_invented() {
        let snapshot = unify_balances(&account("0.0.1"), &record(None, &[("A", 2)]));
        assert_eq!(snapshot.native_balance(), 0);
        assert_eq!(snapshot.balances.len(), 1);
    }

    #[tokio::test]
    async fn not_found_is_distinct_from_empty_account() {
        let mut ledger = MockLedgerIndex::new();
        ledger
            .expect_account()
            .returning(|id| match id.as_str() {
                "0.0.404" => Err(ApiError::NotFound("account 0.0.404".into())),
                _ => Ok(AccountRecord {
                    account: id.to_string(),
                    balance: Some(AccountBalanceRecord {
                        balance: Some(0),
                        timestamp: None,
                        tokens: vec![],
                    }),
                }),
            });
        let resolver = BalanceResolver::new(Arc::new(ledger));

        let missing = resolver.resolve(&account("0.0.404")).await.unwrap();
        let empty = resolver.resolve(&account("0.0.5")).await.unwrap();

        assert_eq!(missing, AccountLookup::NotFound(account("0.0.404")));
        assert!(matches!(empty, AccountLookup::Found(_)));
    }

    #[tokio::test]
    async fn upstream_failures_propagate_from_resolve() {
        let mut ledger = MockLedgerIndex::new();
        ledger
            .expect_account()
            .returning(|_| Err(ApiError::Upstream { status: 502, message: "bad gateway".into() }));
        let resolver = BalanceResolver::new(Arc::new(ledger));

        let err = resolver.resolve(&account("0.0.5")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn native_association_never_consults_the_ledger() {
        let mut ledger = MockLedgerIndex::new();
        ledger.expect_account().times(0);
        let resolver = BalanceResolver::new(Arc::new(ledger));

        assert!(resolver.is_associated(&account("0.0.5"), &AssetId::Native).await);
    }

    #[tokio::test]
    async fn association_check_fails_open() {
        let mut ledger = MockLedgerIndex::new();
        ledger
            .expect_account()
            .returning(|_| Err(ApiError::Transport("timeout".into())));
        let resolver = BalanceResolver::new(Arc::new(ledger));

        assert_eq!(resolver.association_policy(), FailPolicy::Open);
        assert!(resolver.is_associated(&account("0.0.5"), &AssetId::token("0.0.731861")).await);
    }

    #[tokio::test]
    async fn association_reflects_snapshot() {
        let mut ledger = MockLedgerIndex::new();
        ledger
            .expect_account()
            .returning(|_| Ok(record(Some(10), &[("0.0.1", 0)])));
        let resolver = BalanceResolver::new(Arc::new(ledger));
        let id = account("0.0.5");

        assert!(resolver.is_associated(&id, &AssetId::token("0.0.1")).await);
        assert!(!resolver.is_associated(&id, &AssetId::token("0.0.2")).await);
    }

    #[test]
    fn association_from_query_results() {
        let token = AssetId::token("0.0.9");
        let failed: QueryResult<AccountLookup> = QueryResult {
            error: Some(ApiError::Transport("down".into())),
            ..QueryResult::default()
        };
        assert!(association_from(&failed, &token, FailPolicy::Open));
        assert!(!association_from(&failed, &token, FailPolicy::Closed));
        assert!(association_from(&failed, &AssetId::Native, FailPolicy::Closed));

        let unknown = QueryResult {
            data: Some(AccountLookup::NotFound(account("0.0.404"))),
            ..QueryResult::default()
        };
        assert!(!association_from(&unknown, &token, FailPolicy::Open));
    }
}
