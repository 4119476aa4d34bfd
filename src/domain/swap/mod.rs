//! Swap domain - route quotes from the aggregator and trade limits derived from them

mod quote;

pub use quote::{best_route, deadline_after, rank_routes, Slippage, TradeLimits};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::shared::errors::ApiError;
use crate::shared::types::AssetId;

/// What the caller wants to trade
///
/// With `is_reverse` unset `amount` is what the user sells (exact-in);
/// with it set `amount` is what the user wants to receive (exact-out).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwapQuoteRequest {
    pub token_from: AssetId,
    pub token_to: AssetId,
    /// Raw units of the fixed side
    pub amount: u64,
    pub is_reverse: bool,
}

impl SwapQuoteRequest {
    pub fn exact_in(token_from: AssetId, token_to: AssetId, amount: u64) -> Self {
        Self {
            token_from,
            token_to,
            amount,
            is_reverse: false,
        }
    }

    pub fn exact_out(token_from: AssetId, token_to: AssetId, amount: u64) -> Self {
        Self {
            is_reverse: true,
            ..Self::exact_in(token_from, token_to, amount)
        }
    }
}

impl fmt::Display for SwapQuoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_reverse { "out" } else { "in" };
        write!(f, "{} -> {} ({} exact-{})", self.token_from, self.token_to, self.amount, side)
    }
}

/// One route offered by the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRoute {
    #[serde(rename = "aggregatorId", default)]
    pub aggregator_id: String,
    #[serde(rename = "amountFrom", deserialize_with = "amount_from_any")]
    pub amount_from: u64,
    #[serde(rename = "amountTo", deserialize_with = "amount_from_any")]
    pub amount_to: u64,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(rename = "gasEstimate", default)]
    pub gas_estimate: Option<u64>,
}

/// Amounts arrive either as JSON numbers or as decimal strings.
fn amount_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Source of swap routes (the aggregator API)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn rates(&self, request: &SwapQuoteRequest) -> Result<Vec<SwapRoute>, ApiError>;
}
