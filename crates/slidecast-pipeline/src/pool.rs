//! Bounded worker pool per external service.
//!
//! A semaphore caps in-flight calls and a direct `governor` limiter with a
//! burst of one admits a call start at most once per `min_interval`, which
//! keeps a service under its requests-per-minute ceiling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;

use slidecast_types::{Result, SlidecastError};

/// Concurrency and pacing limits for one service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolLimits {
    pub max_concurrent: usize,
    pub min_interval: Duration,
}

impl PoolLimits {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            min_interval,
        }
    }

    /// Text-to-speech: one request at a time, 7 s apart.
    pub fn speech() -> Self {
        Self::new(1, Duration::from_secs(7))
    }

    /// Image and clip generation.
    pub fn images() -> Self {
        Self::new(3, Duration::from_millis(500))
    }

    /// No pacing at all; used by tests and local fakes.
    pub fn unbounded(max_concurrent: usize) -> Self {
        Self::new(max_concurrent, Duration::ZERO)
    }
}

type StartLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct ServicePool {
    name: Arc<str>,
    limits: PoolLimits,
    semaphore: Arc<Semaphore>,
    /// `None` when `min_interval` is zero.
    starts: Option<Arc<StartLimiter>>,
}

impl ServicePool {
    pub fn new(name: &str, limits: PoolLimits) -> Self {
        // One start per period; `with_period` keeps the burst at one.
        let starts = Quota::with_period(limits.min_interval)
            .map(|quota| Arc::new(RateLimiter::direct(quota)));
        Self {
            name: Arc::from(name),
            limits,
            semaphore: Arc::new(Semaphore::new(limits.max_concurrent.max(1))),
            starts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    /// Run one call inside the pool's limits.
    pub async fn run<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.semaphore.clone().acquire_owned().await.ok();
        self.pace().await;
        f().await
    }

    /// Run every job through the pool concurrently. Results come back in the
    /// order the jobs were given, regardless of completion order.
    pub async fn run_all<T, F, Fut>(&self, jobs: Vec<F>) -> Vec<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = jobs.len();
        let mut set = tokio::task::JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let pool = self.clone();
            set.spawn(async move { (index, pool.run(job).await) });
        }

        let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    tracing::error!(pool = %self.name, error = %e, "Worker task failed");
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(SlidecastError::Other(format!(
                        "worker task in pool '{}' did not complete",
                        self.name
                    )))
                })
            })
            .collect()
    }

    async fn pace(&self) {
        let Some(starts) = &self.starts else {
            return;
        };
        if starts.check().is_err() {
            tracing::debug!(pool = %self.name, "Pacing request");
            starts.until_ready().await;
        }
    }
}
