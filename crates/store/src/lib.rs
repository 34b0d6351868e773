//! Shared state store capability.
//!
//! The dispatch engine keeps all persistent state in one external key/value
//! store. [`StateStore`] names the primitives it relies on:
//!
//! - hash maps: per-field get/set/exists/delete and insert-if-absent
//! - sorted sets: add/update-score/remove and "members at the lowest score"
//! - [`WriteBatch`]: several writes applied atomically, optionally guarded by
//!   expected field values (compare-and-swap)
//! - [`Lease`]: an exclusive hold on a named scope, released on drop
//!
//! [`MemoryStore`] implements these in-process; [`TimeoutStore`] bounds every
//! round-trip of another store with a deadline.

pub mod error;
pub mod memory;
pub mod timeout;

use {async_trait::async_trait, std::any::Any};

pub use {
    error::{Error, Result},
    memory::MemoryStore,
    timeout::TimeoutStore,
};

/// A sorted-set member together with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub member: String,
    pub score: i64,
}

/// Capability over the shared key/value store.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn hget(&self, map: &str, field: &str) -> Result<Option<String>>;

    async fn hset(&self, map: &str, field: &str, value: &str) -> Result<()>;

    /// Insert `value` only if `field` is absent. Returns whether it was written.
    async fn hset_nx(&self, map: &str, field: &str, value: &str) -> Result<bool>;

    async fn hexists(&self, map: &str, field: &str) -> Result<bool>;

    async fn hdel(&self, map: &str, field: &str) -> Result<bool>;

    /// All fields of a map, ordered by field name.
    async fn hgetall(&self, map: &str) -> Result<Vec<(String, String)>>;

    /// Add a member or update its score.
    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()>;

    async fn zrem(&self, set: &str, member: &str) -> Result<bool>;

    async fn zscore(&self, set: &str, member: &str) -> Result<Option<i64>>;

    /// Members with `min <= score <= max`, ascending by score then member.
    async fn zrange_by_score(&self, set: &str, min: i64, max: i64) -> Result<Vec<ScoredMember>>;

    /// Every member holding the lowest score, read in one step.
    async fn zlowest(&self, set: &str) -> Result<Vec<ScoredMember>>;

    async fn zcard(&self, set: &str) -> Result<usize>;

    /// Apply a batch atomically.
    ///
    /// Returns `false` without writing anything when a guard does not hold.
    async fn commit(&self, batch: WriteBatch) -> Result<bool>;

    /// Take the exclusive lease on `scope`, waiting for the current holder.
    async fn lease(&self, scope: &str) -> Result<Lease>;
}

// ── Write batches ───────────────────────────────────────────────────────────

/// Precondition checked before a batch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The field must currently hold `expected` (`None` = absent).
    FieldEquals {
        map: String,
        field: String,
        expected: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    HSet {
        map: String,
        field: String,
        value: String,
    },
    HDel {
        map: String,
        field: String,
    },
    ZAdd {
        set: String,
        member: String,
        score: i64,
    },
    ZRem {
        set: String,
        member: String,
    },
}

/// Writes that become visible together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    guards: Vec<Guard>,
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `map[field] == expected` at commit time.
    pub fn expect_field(&mut self, map: &str, field: &str, expected: Option<&str>) -> &mut Self {
        self.guards.push(Guard::FieldEquals {
            map: map.to_string(),
            field: field.to_string(),
            expected: expected.map(str::to_string),
        });
        self
    }

    pub fn hset(&mut self, map: &str, field: &str, value: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::HSet {
            map: map.to_string(),
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn hdel(&mut self, map: &str, field: &str) -> &mut Self {
        self.ops.push(WriteOp::HDel {
            map: map.to_string(),
            field: field.to_string(),
        });
        self
    }

    pub fn zadd(&mut self, set: &str, member: &str, score: i64) -> &mut Self {
        self.ops.push(WriteOp::ZAdd {
            set: set.to_string(),
            member: member.to_string(),
            score,
        });
        self
    }

    pub fn zrem(&mut self, set: &str, member: &str) -> &mut Self {
        self.ops.push(WriteOp::ZRem {
            set: set.to_string(),
            member: member.to_string(),
        });
        self
    }

    pub fn into_parts(self) -> (Vec<Guard>, Vec<WriteOp>) {
        (self.guards, self.ops)
    }
}

// ── Leases ──────────────────────────────────────────────────────────────────

/// Exclusive hold on a scope. Dropping it releases the scope.
pub struct Lease {
    scope: String,
    _hold: Box<dyn Any + Send + Sync>,
}

impl Lease {
    /// Wrap whatever keeps the scope held (a mutex guard, a remote lock token).
    pub fn new(scope: impl Into<String>, hold: impl Any + Send + Sync) -> Self {
        Self {
            scope: scope.into(),
            _hold: Box::new(hold),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("scope", &self.scope).finish()
    }
}
