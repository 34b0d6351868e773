//! Agent status and caseload.
//!
//! Each agent has a JSON [`AgentRecord`] in the agents map. Online agents are
//! also members of the online sorted set, scored by their session count.
//! Every change to a record is written in the same [`WriteBatch`] as the
//! matching sorted-set update, under the agent's lease, so a reader never
//! sees the two disagree.

use std::sync::Arc;

use {
    switchboard_common::{AgentRecord, AgentStatus},
    switchboard_store::{Lease, ScoredMember, StateStore, WriteBatch},
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{agents as agent_metrics, counter, gauge, labels};

use crate::{
    Error, Result,
    keys::{Keyspace, decode, encode},
    select::TieBreak,
};

pub struct AgentRegistry {
    store: Arc<dyn StateStore>,
    keys: Keyspace,
    tie_break: Arc<dyn TieBreak>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn StateStore>, keys: Keyspace, tie_break: Arc<dyn TieBreak>) -> Self {
        Self {
            store,
            keys,
            tie_break,
        }
    }

    /// Create an offline agent with no sessions. Returns the existing record
    /// if the agent is already known.
    pub async fn register(&self, agent_id: &str) -> Result<AgentRecord> {
        let record = AgentRecord::new(agent_id);
        let raw = encode(agent_id, &record)?;
        if self.store.hset_nx(self.keys.agents(), agent_id, &raw).await? {
            info!(agent_id, "agent registered");
            return Ok(record);
        }
        self.load(agent_id).await
    }

    pub async fn set_online(&self, agent_id: &str) -> Result<AgentRecord> {
        self.set_status(agent_id, AgentStatus::Online).await
    }

    /// Take the agent out of selection. Its sessions stay attached until each
    /// customer writes again and fails over.
    pub async fn set_offline(&self, agent_id: &str) -> Result<AgentRecord> {
        self.set_status(agent_id, AgentStatus::Offline).await
    }

    async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<AgentRecord> {
        let _lease = self.lease_agents(&[agent_id]).await?;
        let mut record = self.load(agent_id).await?;
        let changed = record.status != status;
        record.status = status;

        let mut batch = WriteBatch::new();
        self.stage_record(&record, &mut batch)?;
        if !record.is_online() {
            batch.zrem(self.keys.online(), agent_id);
        }
        self.store.commit(batch).await?;

        if changed {
            info!(agent_id, ?status, sessions = record.session_count, "agent status changed");
            #[cfg(feature = "metrics")]
            {
                let status_label = if record.is_online() { "online" } else { "offline" };
                counter!(agent_metrics::TRANSITIONS_TOTAL, labels::STATUS => status_label)
                    .increment(1);
                match self.store.zcard(self.keys.online()).await {
                    Ok(online) => gauge!(agent_metrics::ONLINE).set(online as f64),
                    Err(e) => debug!(error = %e, "online agent gauge not refreshed"),
                }
            }
        }
        Ok(record)
    }

    /// One of the online agents with the fewest sessions.
    pub async fn least_loaded(&self) -> Result<String> {
        let candidates = self.store.zlowest(self.keys.online()).await?;
        let picked = self
            .tie_break
            .pick(&candidates)
            .and_then(|i| candidates.get(i))
            .ok_or(Error::NoAgentAvailable)?;
        debug!(
            agent_id = %picked.member,
            load = picked.score,
            tied = candidates.len(),
            "least loaded agent selected"
        );
        Ok(picked.member.clone())
    }

    /// Add a customer to the agent's sessions. No-op if already present.
    pub async fn attach(&self, agent_id: &str, customer_id: &str) -> Result<AgentRecord> {
        let _lease = self.lease_agents(&[agent_id]).await?;
        let mut record = self.load(agent_id).await?;
        let mut batch = WriteBatch::new();
        if self.stage_attach(&mut record, customer_id, &mut batch)? {
            self.store.commit(batch).await?;
        }
        Ok(record)
    }

    /// Remove a customer from the agent's sessions. No-op if absent.
    pub async fn detach(&self, agent_id: &str, customer_id: &str) -> Result<AgentRecord> {
        let _lease = self.lease_agents(&[agent_id]).await?;
        let mut record = self.load(agent_id).await?;
        let mut batch = WriteBatch::new();
        if self.stage_detach(&mut record, customer_id, &mut batch)? {
            self.store.commit(batch).await?;
        }
        Ok(record)
    }

    pub async fn agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        self.store
            .hget(self.keys.agents(), agent_id)
            .await?
            .map(|raw| decode(agent_id, &raw))
            .transpose()
    }

    /// All agent records, ordered by id.
    pub async fn agents(&self) -> Result<Vec<AgentRecord>> {
        self.store
            .hgetall(self.keys.agents())
            .await?
            .iter()
            .map(|(id, raw)| decode(id, raw))
            .collect()
    }

    /// Online agents with their scores, least loaded first.
    pub async fn online_load(&self) -> Result<Vec<ScoredMember>> {
        Ok(self
            .store
            .zrange_by_score(self.keys.online(), i64::MIN, i64::MAX)
            .await?)
    }

    pub(crate) async fn load(&self, agent_id: &str) -> Result<AgentRecord> {
        self.agent(agent_id)
            .await?
            .ok_or_else(|| Error::unknown_agent(agent_id))
    }

    /// Take agent leases in a fixed order so that concurrent callers
    /// locking overlapping sets cannot deadlock.
    pub(crate) async fn lease_agents(&self, agent_ids: &[&str]) -> Result<Vec<Lease>> {
        let mut ids = agent_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut leases = Vec::with_capacity(ids.len());
        for id in ids {
            leases.push(self.store.lease(&self.keys.agent_scope(id)).await?);
        }
        Ok(leases)
    }

    pub(crate) fn stage_attach(
        &self,
        record: &mut AgentRecord,
        customer_id: &str,
        batch: &mut WriteBatch,
    ) -> Result<bool> {
        if !record.attach(customer_id) {
            return Ok(false);
        }
        self.stage_record(record, batch)?;
        Ok(true)
    }

    pub(crate) fn stage_detach(
        &self,
        record: &mut AgentRecord,
        customer_id: &str,
        batch: &mut WriteBatch,
    ) -> Result<bool> {
        if !record.detach(customer_id) {
            return Ok(false);
        }
        self.stage_record(record, batch)?;
        Ok(true)
    }

    fn stage_record(&self, record: &AgentRecord, batch: &mut WriteBatch) -> Result<()> {
        batch.hset(
            self.keys.agents(),
            &record.agent_id,
            encode(&record.agent_id, record)?,
        );
        if record.is_online() {
            batch.zadd(self.keys.online(), &record.agent_id, record.load());
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::select::FirstCandidate, switchboard_store::MemoryStore};

    fn registry() -> AgentRegistry {
        AgentRegistry::new(
            Arc::new(MemoryStore::new()),
            Keyspace::default(),
            Arc::new(FirstCandidate),
        )
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let reg = registry();
        reg.register("a").await.unwrap();
        reg.set_online("a").await.unwrap();
        reg.attach("a", "c1").await.unwrap();

        let again = reg.register("a").await.unwrap();
        assert!(again.is_online());
        assert_eq!(again.session_count, 1);
    }

    #[tokio::test]
    async fn unknown_agent_cannot_go_online() {
        let err = registry().set_online("ghost").await.unwrap_err();
        assert!(matches!(err, Error::UnknownAgent { agent_id } if agent_id == "ghost"));
    }

    #[tokio::test]
    async fn online_set_tracks_status_and_load() {
        let reg = registry();
        reg.register("a").await.unwrap();
        reg.attach("a", "c1").await.unwrap();
        assert!(reg.online_load().await.unwrap().is_empty());

        reg.set_online("a").await.unwrap();
        assert_eq!(reg.online_load().await.unwrap(), vec![ScoredMember {
            member: "a".into(),
            score: 1,
        }]);

        reg.attach("a", "c2").await.unwrap();
        assert_eq!(reg.online_load().await.unwrap()[0].score, 2);

        reg.set_offline("a").await.unwrap();
        assert!(reg.online_load().await.unwrap().is_empty());
        assert_eq!(reg.agent("a").await.unwrap().unwrap().session_count, 2);
    }

    #[tokio::test]
    async fn attach_and_detach_are_idempotent() {
        let reg = registry();
        reg.register("a").await.unwrap();
        reg.set_online("a").await.unwrap();

        reg.attach("a", "c1").await.unwrap();
        let record = reg.attach("a", "c1").await.unwrap();
        assert_eq!(record.session_count, 1);

        reg.detach("a", "c1").await.unwrap();
        let record = reg.detach("a", "c1").await.unwrap();
        assert_eq!(record.session_count, 0);
        assert!(record.active_sessions.is_empty());
        assert_eq!(reg.online_load().await.unwrap()[0].score, 0);
    }

    #[tokio::test]
    async fn least_loaded_prefers_lowest_score() {
        let reg = registry();
        for id in ["a", "b", "c"] {
            reg.register(id).await.unwrap();
            reg.set_online(id).await.unwrap();
        }
        reg.attach("a", "c1").await.unwrap();
        reg.attach("b", "c2").await.unwrap();
        assert_eq!(reg.least_loaded().await.unwrap(), "c");
    }

    #[tokio::test]
    async fn least_loaded_without_online_agents() {
        let reg = registry();
        reg.register("a").await.unwrap();
        assert!(matches!(
            reg.least_loaded().await.unwrap_err(),
            Error::NoAgentAvailable
        ));
    }
}
