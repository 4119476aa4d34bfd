//! Balance domain - unified account balances, associations and valuation

mod resolver;
mod valuation;

pub use resolver::{association_from, unify_balances, BalanceResolver};
pub use valuation::{PortfolioValue, PriceTable, ValuedAsset};

use serde::Serialize;
use std::collections::BTreeSet;

use crate::shared::types::{AccountId, AssetId};

/// Positive balance of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetBalance {
    pub asset: AssetId,
    pub amount: u64,
}

impl AssetBalance {
    pub fn new(asset: AssetId, amount: u64) -> Self {
        Self { asset, amount }
    }
}

/// Balances and associations of one account, rebuilt wholesale on every fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountBalanceSnapshot {
    pub account_id: AccountId,
    /// Native balance first, then tokens in ledger order; zero balances omitted
    pub balances: Vec<AssetBalance>,
    /// Token associations, including zero-balance ones; never contains the native asset
    pub associated_assets: BTreeSet<AssetId>,
}

impl AccountBalanceSnapshot {
    pub fn balance_of(&self, asset: &AssetId) -> u64 {
        self.balances
            .iter()
            .find(|b| &b.asset == asset)
            .map_or(0, |b| b.amount)
    }

    pub fn native_balance(&self) -> u64 {
        self.balance_of(&AssetId::Native)
    }

    /// The native asset needs no association.
    pub fn is_associated(&self, asset: &AssetId) -> bool {
        asset.is_native() || self.associated_assets.contains(asset)
    }
}

/// Outcome of an account lookup; an unknown account is not an empty one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AccountLookup {
    Found(AccountBalanceSnapshot),
    NotFound(AccountId),
}

impl AccountLookup {
    pub fn snapshot(&self) -> Option<&AccountBalanceSnapshot> {
        match self {
            AccountLookup::Found(snapshot) => Some(snapshot),
            AccountLookup::NotFound(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AccountLookup::NotFound(_))
    }
}
