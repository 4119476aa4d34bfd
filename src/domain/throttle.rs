//! Per-key minimum-interval gate in front of rate-limited upstreams

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::cache::Clock;
use crate::shared::config::ThrottleCfg;

/// Last resolution time for one key; `None` until the first request.
type ThrottleRecord = Arc<AsyncMutex<Option<Instant>>>;

/// Delays requests so that, per key, resolutions are at least `min_interval` apart.
///
/// Requests are never dropped. Distinct keys never wait on each other unless a
/// global concurrency cap is configured.
pub struct RequestThrottle {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, ThrottleRecord>>,
    global: Option<Arc<Semaphore>>,
}

/// Held while the throttled request runs; releases the global slot on drop.
#[derive(Debug)]
pub struct ThrottlePermit {
    _global: Option<OwnedSemaphorePermit>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            clock,
            records: Mutex::new(HashMap::new()),
            global: None,
        }
    }

    pub fn from_config(cfg: &ThrottleCfg, clock: Arc<dyn Clock>) -> Self {
        let throttle = Self::new(Duration::from_millis(cfg.min_interval_ms), clock);
        if cfg.max_concurrent > 0 {
            throttle.with_global_limit(cfg.max_concurrent)
        } else {
            throttle
        }
    }

    /// Caps concurrent requests across all keys.
    pub fn with_global_limit(mut self, max_concurrent: usize) -> Self {
        self.global = Some(Arc::new(Semaphore::new(max_concurrent.max(1))));
        self
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn record(&self, key: &str) -> ThrottleRecord {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(records.entry(key.to_string()).or_default())
    }

    /// Resolves once `min_interval` has passed since the previous resolution for `key`.
    pub async fn throttle(&self, key: &str) -> ThrottlePermit {
        let record = self.record(key);
        {
            let mut last = record.lock().await;
            if let Some(previous) = *last {
                let wait = (previous + self.min_interval).saturating_duration_since(self.clock.now());
                if !wait.is_zero() {
                    debug!("throttling {} for {:?}", key, wait);
                    tokio::time::sleep(wait).await;
                }
            }
            *last = Some(self.clock.now());
        }

        let global = match &self.global {
            // The semaphore is never closed, so acquire cannot fail.
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        ThrottlePermit { _global: global }
    }

    /// Throttles on `key`, then runs `request` while holding the permit.
    pub async fn run<T, Fut>(&self, key: &str, request: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let _permit = self.throttle(key).await;
        request.await
    }

    /// Number of keys seen so far
    pub fn tracked_keys(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
