//! Deadline-bounded store decorator.

use std::{future::Future, time::Duration};

use {async_trait::async_trait, tracing::warn};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, histogram, labels, store as store_metrics};

use crate::{Error, Lease, Result, ScoredMember, StateStore, WriteBatch};

/// Wraps a store so that no call waits longer than its deadline.
///
/// Data operations use `op_timeout`; lease acquisition uses
/// `lease_timeout`, since it may legitimately wait for another holder.
pub struct TimeoutStore<S> {
    inner: S,
    op_timeout: Duration,
    lease_timeout: Duration,
}

impl<S: StateStore> TimeoutStore<S> {
    pub fn new(inner: S, op_timeout: Duration, lease_timeout: Duration) -> Self {
        Self {
            inner,
            op_timeout,
            lease_timeout,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T: Send>(
        &self,
        operation: &'static str,
        timeout: Duration,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { operation, timeout }),
        };
        if let Err(ref e) = result {
            warn!(operation, error = %e, "state store call failed");
            #[cfg(feature = "metrics")]
            counter!(
                store_metrics::ERRORS_TOTAL,
                labels::OPERATION => operation,
                labels::ERROR_TYPE => e.kind()
            )
            .increment(1);
        }
        result
    }
}

#[async_trait]
impl<S: StateStore> StateStore for TimeoutStore<S> {
    async fn hget(&self, map: &str, field: &str) -> Result<Option<String>> {
        self.bounded("hget", self.op_timeout, self.inner.hget(map, field))
            .await
    }

    async fn hset(&self, map: &str, field: &str, value: &str) -> Result<()> {
        self.bounded("hset", self.op_timeout, self.inner.hset(map, field, value))
            .await
    }

    async fn hset_nx(&self, map: &str, field: &str, value: &str) -> Result<bool> {
        self.bounded(
            "hset_nx",
            self.op_timeout,
            self.inner.hset_nx(map, field, value),
        )
        .await
    }

    async fn hexists(&self, map: &str, field: &str) -> Result<bool> {
        self.bounded("hexists", self.op_timeout, self.inner.hexists(map, field))
            .await
    }

    async fn hdel(&self, map: &str, field: &str) -> Result<bool> {
        self.bounded("hdel", self.op_timeout, self.inner.hdel(map, field))
            .await
    }

    async fn hgetall(&self, map: &str) -> Result<Vec<(String, String)>> {
        self.bounded("hgetall", self.op_timeout, self.inner.hgetall(map))
            .await
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()> {
        self.bounded("zadd", self.op_timeout, self.inner.zadd(set, member, score))
            .await
    }

    async fn zrem(&self, set: &str, member: &str) -> Result<bool> {
        self.bounded("zrem", self.op_timeout, self.inner.zrem(set, member))
            .await
    }

    async fn zscore(&self, set: &str, member: &str) -> Result<Option<i64>> {
        self.bounded("zscore", self.op_timeout, self.inner.zscore(set, member))
            .await
    }

    async fn zrange_by_score(&self, set: &str, min: i64, max: i64) -> Result<Vec<ScoredMember>> {
        self.bounded(
            "zrange_by_score",
            self.op_timeout,
            self.inner.zrange_by_score(set, min, max),
        )
        .await
    }

    async fn zlowest(&self, set: &str) -> Result<Vec<ScoredMember>> {
        self.bounded("zlowest", self.op_timeout, self.inner.zlowest(set))
            .await
    }

    async fn zcard(&self, set: &str) -> Result<usize> {
        self.bounded("zcard", self.op_timeout, self.inner.zcard(set))
            .await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<bool> {
        self.bounded("commit", self.op_timeout, self.inner.commit(batch))
            .await
    }

    async fn lease(&self, scope: &str) -> Result<Lease> {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let lease = self
            .bounded("lease", self.lease_timeout, self.inner.lease(scope))
            .await?;

        #[cfg(feature = "metrics")]
        histogram!(store_metrics::LEASE_WAIT_SECONDS).record(started.elapsed().as_secs_f64());

        Ok(lease)
    }
}
