//! Customer → agent session affinity.

use std::{collections::BTreeMap, sync::Arc};

use {switchboard_common::AgentRecord, switchboard_store::StateStore};

use crate::{
    Result,
    keys::{Keyspace, decode},
};

/// What the session map says about a customer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affinity {
    /// Agent currently recorded as owning the customer, reachable or not.
    pub previous: Option<String>,
    /// `previous`, if that agent is still online.
    pub live: Option<String>,
}

impl Affinity {
    /// The customer had an owner that is no longer reachable.
    pub fn is_stale(&self) -> bool {
        self.previous.is_some() && self.live.is_none()
    }
}

pub struct SessionDirector {
    store: Arc<dyn StateStore>,
    keys: Keyspace,
}

impl SessionDirector {
    pub fn new(store: Arc<dyn StateStore>, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    pub async fn assignment(&self, customer_id: &str) -> Result<Option<String>> {
        Ok(self.store.hget(self.keys.sessions(), customer_id).await?)
    }

    /// Look up the customer's agent and check it is still online. A stale
    /// owner is reported, not treated as an error.
    pub async fn resolve(&self, customer_id: &str) -> Result<Affinity> {
        let Some(agent_id) = self.assignment(customer_id).await? else {
            return Ok(Affinity::default());
        };

        let online = match self.store.hget(self.keys.agents(), &agent_id).await? {
            Some(raw) => decode::<AgentRecord>(&agent_id, &raw)?.is_online(),
            None => false,
        };
        Ok(Affinity {
            live: online.then(|| agent_id.clone()),
            previous: Some(agent_id),
        })
    }

    /// Every customer with an assigned agent.
    pub async fn sessions(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .store
            .hgetall(self.keys.sessions())
            .await?
            .into_iter()
            .collect())
    }
}
