//! Request gate shared by collection and retry
//!
//! Every outgoing source request passes two independent limits:
//! - the source's own fixed-interval limiter (`governor`)
//! - a global cap on in-flight requests (`tokio::sync::Semaphore`)
//!
//! The per-source limiter is awaited before a global slot is taken, so a
//! strict source never holds slots that other sources could use.

use crate::error::FetchError;
use crate::types::SourceId;
use anirank_common::config::TomlConfig;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::trace;

pub struct RequestGate {
    limiters: BTreeMap<SourceId, Arc<DefaultDirectRateLimiter>>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    timeout: Duration,
}

impl RequestGate {
    pub fn new(max_in_flight: usize, timeout: Duration) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            limiters: BTreeMap::new(),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            timeout,
        }
    }

    /// Space requests to `source` at least `interval` apart
    ///
    /// A zero interval leaves the source unlimited.
    pub fn with_rate_limit(mut self, source: impl Into<SourceId>, interval: Duration) -> Self {
        let source = source.into();
        match Quota::with_period(interval) {
            Some(quota) => {
                self.limiters.insert(source, Arc::new(RateLimiter::direct(quota)));
            }
            None => {
                self.limiters.remove(&source);
            }
        }
        self
    }

    /// Gate for every enabled source in a config
    pub fn from_config(config: &TomlConfig) -> Self {
        let completion = &config.completion;
        let mut gate = Self::new(
            completion.parallel_searches,
            Duration::from_secs(completion.search_timeout_secs),
        );
        for (id, source) in config.sources.iter().filter(|(_, s)| s.enabled) {
            gate = gate.with_rate_limit(id.as_str(), Duration::from_millis(source.rate_limit_ms));
        }
        gate
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one request to `source` under both limits and the timeout
    pub async fn call<T, F>(&self, source: &SourceId, request: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        self.call_within(source, self.timeout, request).await
    }

    /// Like [`call`](Self::call) with its own timeout
    ///
    /// The clock starts once the request is admitted; time spent waiting for
    /// the rate limiter or a global slot does not count.
    pub async fn call_within<T, F>(&self, source: &SourceId, timeout: Duration, request: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        if let Some(limiter) = self.limiters.get(source) {
            limiter.until_ready().await;
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Network("request gate closed".to_string()))?;

        trace!(source = %source, "Request admitted");
        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}
