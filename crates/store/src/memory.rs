//! In-process [`StateStore`].
//!
//! All maps and sorted sets sit behind a single `RwLock`, so every call and
//! every [`WriteBatch`] is observed atomically by concurrent readers. Leases
//! are per-scope async mutexes.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use {async_trait::async_trait, dashmap::DashMap, tokio::sync::Mutex, tracing::trace};

use crate::{Error, Guard, Lease, Result, ScoredMember, StateStore, WriteBatch, WriteOp};

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    order: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.order.remove(&(old, member.to_string()));
        }
        self.order.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.order.remove(&(old, member.to_string()));
                true
            },
            None => false,
        }
    }

    fn range(&self, min: i64, max: i64) -> Vec<ScoredMember> {
        if min > max {
            return Vec::new();
        }
        self.order
            .range((min, String::new())..)
            .take_while(|(score, _)| *score <= max)
            .map(|(score, member)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect()
    }

    fn lowest(&self) -> Vec<ScoredMember> {
        match self.order.first() {
            Some((min, _)) => self.range(*min, *min),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    maps: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, SortedSet>,
}

impl State {
    fn field(&self, map: &str, field: &str) -> Option<&String> {
        self.maps.get(map).and_then(|m| m.get(field))
    }

    fn guard_holds(&self, guard: &Guard) -> bool {
        match guard {
            Guard::FieldEquals {
                map,
                field,
                expected,
            } => self.field(map, field) == expected.as_ref(),
        }
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::HSet { map, field, value } => {
                self.maps.entry(map).or_default().insert(field, value);
            },
            WriteOp::HDel { map, field } => {
                if let Some(m) = self.maps.get_mut(&map) {
                    m.remove(&field);
                }
            },
            WriteOp::ZAdd { set, member, score } => {
                self.sets.entry(set).or_default().insert(&member, score);
            },
            WriteOp::ZRem { set, member } => {
                if let Some(s) = self.sets.get_mut(&set) {
                    s.remove(&member);
                }
            },
        }
    }
}

/// In-memory store for tests, demos and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    leases: DashMap<String, Arc<Mutex<()>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every call fails and nothing
    /// is read or written.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::unavailable("memory store is marked unavailable"));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.check()?;
        Ok(self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.check()?;
        Ok(self.state.write().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn hget(&self, map: &str, field: &str) -> Result<Option<String>> {
        Ok(self.read()?.field(map, field).cloned())
    }

    async fn hset(&self, map: &str, field: &str, value: &str) -> Result<()> {
        self.write()?
            .maps
            .entry(map.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_nx(&self, map: &str, field: &str, value: &str) -> Result<bool> {
        let mut state = self.write()?;
        let entries = state.maps.entry(map.to_string()).or_default();
        if entries.contains_key(field) {
            return Ok(false);
        }
        entries.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hexists(&self, map: &str, field: &str) -> Result<bool> {
        Ok(self.read()?.field(map, field).is_some())
    }

    async fn hdel(&self, map: &str, field: &str) -> Result<bool> {
        Ok(self
            .write()?
            .maps
            .get_mut(map)
            .is_some_and(|m| m.remove(field).is_some()))
    }

    async fn hgetall(&self, map: &str) -> Result<Vec<(String, String)>> {
        let state = self.read()?;
        let mut entries: Vec<(String, String)> = state
            .maps
            .get(map)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        entries.sort();
        Ok(entries)
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()> {
        self.write()?
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    async fn zrem(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .write()?
            .sets
            .get_mut(set)
            .is_some_and(|s| s.remove(member)))
    }

    async fn zscore(&self, set: &str, member: &str) -> Result<Option<i64>> {
        Ok(self
            .read()?
            .sets
            .get(set)
            .and_then(|s| s.scores.get(member).copied()))
    }

    async fn zrange_by_score(&self, set: &str, min: i64, max: i64) -> Result<Vec<ScoredMember>> {
        Ok(self
            .read()?
            .sets
            .get(set)
            .map(|s| s.range(min, max))
            .unwrap_or_default())
    }

    async fn zlowest(&self, set: &str) -> Result<Vec<ScoredMember>> {
        Ok(self
            .read()?
            .sets
            .get(set)
            .map(SortedSet::lowest)
            .unwrap_or_default())
    }

    async fn zcard(&self, set: &str) -> Result<usize> {
        Ok(self.read()?.sets.get(set).map_or(0, |s| s.scores.len()))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<bool> {
        let mut state = self.write()?;
        let (guards, ops) = batch.into_parts();
        if !guards.iter().all(|g| state.guard_holds(g)) {
            trace!(guards = guards.len(), "batch guard failed, nothing written");
            return Ok(false);
        }
        for op in ops {
            state.apply(op);
        }
        Ok(true)
    }

    async fn lease(&self, scope: &str) -> Result<Lease> {
        self.check()?;
        let slot = self
            .leases
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let hold = slot.lock_owned().await;
        trace!(scope, "lease granted");
        Ok(Lease::new(scope, hold))
    }
}
