use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use super::SwapRoute;

const BPS_DENOMINATOR: u128 = 10_000;

/// Slippage tolerance in basis points (50 = 0.5%)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slippage(u16);

impl Slippage {
    pub fn from_bps(bps: u16) -> Result<Self, String> {
        if u128::from(bps) > BPS_DENOMINATOR {
            return Err(format!("slippage of {} bps exceeds 100%", bps));
        }
        Ok(Self(bps))
    }

    /// Parses a percentage such as `0.5`.
    pub fn from_percent(percent: f64) -> Result<Self, String> {
        if !percent.is_finite() || percent < 0.0 {
            return Err(format!("invalid slippage: {}", percent));
        }
        let bps = (percent * 100.0).round();
        if bps > BPS_DENOMINATOR as f64 {
            return Err(format!("slippage of {}% exceeds 100%", percent));
        }
        Ok(Self(bps as u16))
    }

    pub fn bps(self) -> u16 {
        self.0
    }
}

impl Default for Slippage {
    fn default() -> Self {
        Self(50)
    }
}

/// Bounds to submit with the swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradeLimits {
    /// Exact-in: revert if less than this is received
    MinReceived(u64),
    /// Exact-out: revert if more than this is sold
    MaxSold(u64),
}

impl TradeLimits {
    pub fn for_route(route: &SwapRoute, is_reverse: bool, slippage: Slippage) -> Self {
        let bps = u128::from(slippage.bps());
        if is_reverse {
            let max = u128::from(route.amount_from) * (BPS_DENOMINATOR + bps) / BPS_DENOMINATOR;
            TradeLimits::MaxSold(u64::try_from(max).unwrap_or(u64::MAX))
        } else {
            let min = u128::from(route.amount_to) * (BPS_DENOMINATOR - bps) / BPS_DENOMINATOR;
            // min <= amount_to, so it always fits
            TradeLimits::MinReceived(min as u64)
        }
    }

    pub fn value(self) -> u64 {
        match self {
            TradeLimits::MinReceived(v) | TradeLimits::MaxSold(v) => v,
        }
    }
}

/// Most output for exact-in, least input for exact-out.
pub fn best_route(routes: &[SwapRoute], is_reverse: bool) -> Option<&SwapRoute> {
    if is_reverse {
        routes.iter().min_by_key(|r| r.amount_from)
    } else {
        routes.iter().max_by_key(|r| r.amount_to)
    }
}

/// Sorts routes best first.
pub fn rank_routes(mut routes: Vec<SwapRoute>, is_reverse: bool) -> Vec<SwapRoute> {
    if is_reverse {
        routes.sort_by_key(|r| r.amount_from);
    } else {
        routes.sort_by(|a, b| b.amount_to.cmp(&a.amount_to));
    }
    routes
}

/// Transaction deadline as unix seconds.
pub fn deadline_after(now: DateTime<Utc>, minutes: u32) -> i64 {
    (now + ChronoDuration::minutes(i64::from(minutes))).timestamp()
}
