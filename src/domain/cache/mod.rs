//! Cache domain - fingerprinted query cache and its policies

pub mod clock;
mod query_cache;
pub mod retry;

pub use clock::{Clock, ManualClock, TokioClock};
pub use query_cache::QueryCache;
pub use retry::{Backoff, RetryPolicy};

use std::fmt;
use std::time::Duration;

use crate::shared::config::CacheCfg;
use crate::shared::errors::ApiError;

/// Semantic fingerprint of a request: entity name plus ordered parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    entity: &'static str,
    params: Vec<String>,
}

impl CacheKey {
    pub fn new(entity: &'static str) -> Self {
        Self {
            entity,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, value: impl ToString) -> Self {
        self.params.push(value.to_string());
        self
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity)?;
        for p in &self.params {
            write!(f, ":{}", p)?;
        }
        Ok(())
    }
}

/// Freshness, retention and retry settings for one query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub stale_after: Duration,
    pub evict_after: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_config(&CacheCfg::default())
    }
}

impl QueryOptions {
    pub fn from_config(cfg: &CacheCfg) -> Self {
        Self {
            stale_after: Duration::from_millis(cfg.stale_after_ms),
            evict_after: Duration::from_millis(cfg.evict_after_ms),
            retry: RetryPolicy::from_config(cfg),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        if self.evict_after < stale_after {
            self.evict_after = stale_after;
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Token list changes rarely
    pub fn token_list(cfg: &CacheCfg) -> Self {
        Self::from_config(cfg).with_stale_after(Duration::from_secs(300))
    }

    /// Prices move; keep them on the configured window
    pub fn token_price(cfg: &CacheCfg) -> Self {
        Self::from_config(cfg)
    }

    pub fn account_balances(cfg: &CacheCfg) -> Self {
        Self::from_config(cfg)
    }

    /// Quotes go stale quickly and are not worth retrying for long
    pub fn swap_quote(cfg: &CacheCfg) -> Self {
        let base = Self::from_config(cfg);
        let stale_after = base.stale_after.min(Duration::from_secs(10));
        Self {
            stale_after,
            retry: RetryPolicy {
                max_retries: base.retry.max_retries.min(1),
                ..base.retry.clone()
            },
            ..base
        }
    }

    /// Pending transactions are polled until indexed
    pub fn transaction_status(cfg: &CacheCfg) -> Self {
        let base = Self::from_config(cfg);
        Self {
            stale_after: base.stale_after.min(Duration::from_secs(2)),
            ..base
        }
    }
}

/// What a caller observes for a query: `{ data, is_loading, error }`
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<V> {
    pub data: Option<V>,
    /// No data yet and a fetch is running
    pub is_loading: bool,
    /// Any fetch is running, including background refreshes
    pub is_fetching: bool,
    pub error: Option<ApiError>,
}

impl<V> Default for QueryResult<V> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_fetching: false,
            error: None,
        }
    }
}

impl<V> QueryResult<V> {
    pub fn from_outcome(outcome: Result<V, ApiError>) -> Self {
        match outcome {
            Ok(value) => Self {
                data: Some(value),
                ..Self::default()
            },
            Err(err) => Self {
                error: Some(err),
                ..Self::default()
            },
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> QueryResult<U> {
        QueryResult {
            data: self.data.map(f),
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            error: self.error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }
}

/// Counters for monitoring cache effectiveness
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub failures: u64,
    pub evictions: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.stale_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.stale_hits) as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_fingerprint_entity_and_params() {
        let a = CacheKey::new("quote").param("0.0.1").param("0.0.2").param(100);
        let b = CacheKey::new("quote").param("0.0.1").param("0.0.2").param(100);
        let c = CacheKey::new("quote").param("0.0.2").param("0.0.1").param(100);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "quote:0.0.1:0.0.2:100");
    }

    #[test]
    fn quote_options_are_short_lived() {
        let cfg = CacheCfg::default();
        let quote = QueryOptions::swap_quote(&cfg);
        assert!(quote.stale_after <= Duration::from_secs(10));
        assert!(quote.retry.max_retries <= 1);
        assert!(QueryOptions::token_list(&cfg).stale_after >= quote.stale_after);
    }

    #[test]
    fn map_preserves_flags() {
        let result = QueryResult {
            data: Some(2),
            is_loading: false,
            is_fetching: true,
            error: None,
        };
        let mapped = result.map(|v| v * 10);
        assert_eq!(mapped.data, Some(20));
        assert!(mapped.is_fetching);
    }

    #[test]
    fn hit_rate_counts_stale_hits() {
        let metrics = CacheMetrics {
            hits: 2,
            stale_hits: 1,
            misses: 1,
            ..CacheMetrics::default()
        };
        assert!((metrics.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
