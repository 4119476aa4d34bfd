//! USD valuation of account snapshots

use serde::Serialize;
use std::collections::HashMap;

use super::AccountBalanceSnapshot;
use crate::shared::types::{Amount, AssetId, TokenInfo, NATIVE_ASSET_ID, NATIVE_DECIMALS};

/// Price and precision per asset
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    entries: HashMap<AssetId, (f64, u8)>,
}

impl PriceTable {
    /// Builds from the price API token list; the entry whose symbol is the
    /// native ticker prices the native asset.
    pub fn from_tokens(tokens: &[TokenInfo]) -> Self {
        let mut table = Self::default();
        for token in tokens {
            let Some(price) = token.price_usd else { continue };
            if token.symbol.eq_ignore_ascii_case(NATIVE_ASSET_ID) {
                table.insert(AssetId::Native, price, NATIVE_DECIMALS);
            } else {
                table.insert(AssetId::token(token.id.clone()), price, token.decimals);
            }
        }
        table
    }

    pub fn insert(&mut self, asset: AssetId, price_usd: f64, decimals: u8) {
        self.entries.insert(asset, (price_usd, decimals));
    }

    pub fn price_of(&self, asset: &AssetId) -> Option<f64> {
        self.entries.get(asset).map(|(price, _)| *price)
    }

    /// USD value of a raw amount, if the asset is priced.
    pub fn value_of(&self, asset: &AssetId, raw_amount: u64) -> Option<f64> {
        self.entries
            .get(asset)
            .map(|(price, decimals)| Amount::new(raw_amount, *decimals).to_units() * price)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuedAsset {
    pub asset: AssetId,
    pub amount: u64,
    pub value_usd: f64,
}

/// Snapshot valued in USD; assets without a price are listed separately
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioValue {
    pub total_usd: f64,
    pub assets: Vec<ValuedAsset>,
    pub unpriced: Vec<AssetId>,
}

impl PortfolioValue {
    pub fn of(snapshot: &AccountBalanceSnapshot, prices: &PriceTable) -> Self {
        let mut assets = Vec::new();
        let mut unpriced = Vec::new();
        for balance in &snapshot.balances {
            match prices.value_of(&balance.asset, balance.amount) {
                Some(value_usd) => assets.push(ValuedAsset {
                    asset: balance.asset.clone(),
                    amount: balance.amount,
                    value_usd,
                }),
                None => unpriced.push(balance.asset.clone()),
            }
        }
        let total_usd = assets.iter().map(|a| a.value_usd).sum();
        Self {
            total_usd,
            assets,
            unpriced,
        }
    }
}
