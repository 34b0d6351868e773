//! End-to-end routing of one notification.
//!
//! 1. fingerprint and register the message; duplicates stop here
//! 2. take the customer lease
//! 3. keep the current agent if it is online, otherwise pick the least loaded
//! 4. take the leases of the previous and the chosen agent, re-check the
//!    chosen agent is still online (re-select if not)
//! 5. commit detach + attach + session + message as one guarded batch
//! 6. release the leases and publish to the delivery sink

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use {
    serde::Serialize,
    switchboard_common::{AgentRecord, Delivery, Message, Notification},
    switchboard_config::DispatchConfig,
    switchboard_store::{StateStore, WriteBatch},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, dispatch, histogram, labels};

use crate::{
    Error, Result,
    dedup::{Deduplicator, Registration, fingerprint},
    director::SessionDirector,
    keys::{Keyspace, decode, encode},
    registry::AgentRegistry,
    select::{RandomTieBreak, TieBreak},
    sink::{DeliverySink, LogSink},
};

const DEFAULT_SELECTION_ATTEMPTS: u32 = 3;

/// Result of routing a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    /// Already seen or already assigned; nothing changed.
    Ignored { fingerprint: String },
    Assigned {
        fingerprint: String,
        customer_id: String,
        agent_id: String,
        /// Set when the customer moved away from another agent.
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_agent: Option<String>,
        /// The existing owner was kept.
        affinity: bool,
    },
}

impl AssignmentOutcome {
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Assigned { agent_id, .. } => Some(agent_id),
            Self::Ignored { .. } => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored { .. })
    }
}

/// Point-in-time view of all dispatch state.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub agents: Vec<AgentRecord>,
    pub sessions: BTreeMap<String, String>,
    /// Online agents and their scores.
    pub online: BTreeMap<String, i64>,
}

enum Committed {
    Assigned {
        message: Message,
        agent_id: String,
        previous_agent: Option<String>,
        affinity: bool,
    },
    Superseded,
}

pub struct AssignmentCoordinator {
    store: Arc<dyn StateStore>,
    keys: Keyspace,
    dedup: Deduplicator,
    registry: AgentRegistry,
    director: SessionDirector,
    sink: Arc<dyn DeliverySink>,
    selection_attempts: u32,
}

impl AssignmentCoordinator {
    pub fn builder(store: Arc<dyn StateStore>) -> AssignmentCoordinatorBuilder {
        AssignmentCoordinatorBuilder::new(store)
    }

    /// Build from the `[dispatch]` config section.
    pub fn from_config(
        store: Arc<dyn StateStore>,
        namespace: &str,
        config: &DispatchConfig,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<Self> {
        Ok(Self::builder(store)
            .keyspace(Keyspace::new(namespace))
            .dedup_window(config.dedup_window()?)
            .tie_break(Arc::new(RandomTieBreak::from_seed(config.tie_break_seed)))
            .selection_attempts(config.selection_attempts)
            .sink(sink)
            .build())
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn director(&self) -> &SessionDirector {
        &self.director
    }

    pub fn keys(&self) -> &Keyspace {
        &self.keys
    }

    /// Route a notification to an agent.
    ///
    /// A repeat of an already assigned message is ignored. A repeat of a
    /// message that is still pending is dispatched again, so a call that
    /// failed with a retryable error can simply be retried.
    ///
    /// # Errors
    ///
    /// [`Error::NoAgentAvailable`] leaves the message pending; see
    /// [`Self::redispatch`]. [`Error::Delivery`] is returned after the
    /// assignment was committed.
    pub async fn route(&self, notification: Notification) -> Result<AssignmentOutcome> {
        #[cfg(feature = "metrics")]
        counter!(dispatch::NOTIFICATIONS_TOTAL).increment(1);

        if let Err(e) = notification.validate() {
            #[cfg(feature = "metrics")]
            counter!(dispatch::INVALID_TOTAL).increment(1);
            return Err(e.into());
        }

        let fp = fingerprint(&notification.customer_id, &notification.content);
        let message = Message::pending(fp, &notification);
        if self.dedup.register(&message).await? == Registration::Duplicate {
            #[cfg(feature = "metrics")]
            counter!(dispatch::DUPLICATES_TOTAL).increment(1);
            if !self.message(&message.fingerprint).await?.is_pending() {
                return Ok(AssignmentOutcome::Ignored {
                    fingerprint: message.fingerprint,
                });
            }
            // Still pending: an earlier attempt failed before assigning.
            debug!(fingerprint = %message.fingerprint, "repeat of a pending message, dispatching");
        }

        self.dispatch(&message.fingerprint, &message.customer_id)
            .await
    }

    /// Route a message that is still pending, e.g. after
    /// [`Error::NoAgentAvailable`]. Assigned messages are ignored.
    pub async fn redispatch(&self, fingerprint: &str) -> Result<AssignmentOutcome> {
        let message = self.message(fingerprint).await?;
        if !message.is_pending() {
            return Ok(AssignmentOutcome::Ignored {
                fingerprint: fingerprint.to_string(),
            });
        }
        self.dispatch(fingerprint, &message.customer_id).await
    }

    /// Messages still waiting for an agent, oldest first. Archived repeats
    /// are not included.
    pub async fn pending(&self) -> Result<Vec<Message>> {
        let mut pending = Vec::new();
        for (field, raw) in self.store.hgetall(self.keys.messages()).await? {
            let message: Message = decode(&field, &raw)?;
            if message.is_pending() && field == message.fingerprint {
                pending.push(message);
            }
        }
        pending.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(pending)
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            messages: self.messages().await?,
            agents: self.registry.agents().await?,
            sessions: self.director.sessions().await?,
            online: self
                .registry
                .online_load()
                .await?
                .into_iter()
                .map(|m| (m.member, m.score))
                .collect(),
        })
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        self.store
            .hgetall(self.keys.messages())
            .await?
            .iter()
            .map(|(fp, raw)| decode(fp, raw))
            .collect()
    }

    async fn message(&self, fingerprint: &str) -> Result<Message> {
        let raw = self
            .store
            .hget(self.keys.messages(), fingerprint)
            .await?
            .ok_or_else(|| Error::UnknownMessage {
                fingerprint: fingerprint.to_string(),
            })?;
        decode(fingerprint, &raw)
    }

    async fn dispatch(&self, fingerprint: &str, customer_id: &str) -> Result<AssignmentOutcome> {
        let started = Instant::now();
        let committed = self.commit_assignment(fingerprint, customer_id).await;
        #[cfg(feature = "metrics")]
        histogram!(dispatch::ROUTE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let (delivery, previous_agent, affinity) = match committed? {
            Committed::Assigned {
                message,
                agent_id,
                previous_agent,
                affinity,
            } => (Delivery::new(&message, agent_id), previous_agent, affinity),
            Committed::Superseded => {
                return Ok(AssignmentOutcome::Ignored {
                    fingerprint: fingerprint.to_string(),
                });
            },
        };

        info!(
            fingerprint,
            customer_id,
            agent_id = %delivery.agent_id,
            previous_agent = previous_agent.as_deref(),
            affinity,
            elapsed_us = started.elapsed().as_micros() as u64,
            "message assigned"
        );

        if let Err(source) = self.sink.publish(&delivery).await {
            warn!(fingerprint, agent_id = %delivery.agent_id, error = %source, "delivery failed");
            #[cfg(feature = "metrics")]
            counter!(dispatch::DELIVERY_ERRORS_TOTAL).increment(1);
            return Err(Error::Delivery {
                fingerprint: delivery.fingerprint,
                agent_id: delivery.agent_id,
                source,
            });
        }

        Ok(AssignmentOutcome::Assigned {
            fingerprint: delivery.fingerprint,
            customer_id: delivery.customer_id,
            agent_id: delivery.agent_id,
            previous_agent,
            affinity,
        })
    }

    /// Everything that must happen under the customer lease.
    async fn commit_assignment(&self, fingerprint: &str, customer_id: &str) -> Result<Committed> {
        let _customer = self
            .store
            .lease(&self.keys.customer_scope(customer_id))
            .await?;

        let Some(raw) = self.store.hget(self.keys.messages(), fingerprint).await? else {
            return Err(Error::UnknownMessage {
                fingerprint: fingerprint.to_string(),
            });
        };
        let message: Message = decode(fingerprint, &raw)?;
        if !message.is_pending() {
            debug!(fingerprint, "message already assigned");
            return Ok(Committed::Superseded);
        }

        let affinity = self.director.resolve(customer_id).await?;
        let previous = affinity.previous.as_deref();
        if affinity.is_stale() {
            debug!(customer_id, agent_id = previous, "owner offline, failing over");
        }
        let mut live = affinity.live.clone();

        for attempt in 1..=self.selection_attempts.max(1) {
            let (target, affine) = match live.take() {
                Some(agent_id) => (agent_id, true),
                None => (self.select().await?, false),
            };

            let mut ids = vec![target.as_str()];
            ids.extend(previous);
            let _agents = self.registry.lease_agents(&ids).await?;

            let mut target_record = self.registry.load(&target).await?;
            if !target_record.is_online() {
                warn!(
                    customer_id,
                    agent_id = %target,
                    attempt,
                    "selected agent went offline, selecting again"
                );
                continue;
            }

            let mut batch = WriteBatch::new();
            batch
                .expect_field(self.keys.messages(), fingerprint, Some(&raw))
                .expect_field(self.keys.sessions(), customer_id, previous);

            let moved_from = previous.filter(|prev| *prev != target);
            if let Some(prev) = moved_from
                && let Some(mut prev_record) = self.registry.agent(prev).await?
            {
                self.registry
                    .stage_detach(&mut prev_record, customer_id, &mut batch)?;
            }
            self.registry
                .stage_attach(&mut target_record, customer_id, &mut batch)?;

            let assigned = message.clone().assigned_to(target.as_str());
            batch
                .hset(self.keys.sessions(), customer_id, target.as_str())
                .hset(
                    self.keys.messages(),
                    fingerprint,
                    encode(fingerprint, &assigned)?,
                );

            if !self.store.commit(batch).await? {
                debug!(fingerprint, "message changed before commit, dropping this attempt");
                return Ok(Committed::Superseded);
            }

            #[cfg(feature = "metrics")]
            {
                let kind = if affine { "affinity" } else { "selected" };
                counter!(dispatch::ASSIGNMENTS_TOTAL, labels::KIND => kind).increment(1);
                if moved_from.is_some() {
                    counter!(dispatch::REASSIGNMENTS_TOTAL).increment(1);
                }
            }
            if let Some(prev) = moved_from {
                info!(customer_id, from = prev, to = %target, "customer reassigned");
            }

            return Ok(Committed::Assigned {
                message: assigned,
                agent_id: target,
                previous_agent: moved_from.map(str::to_string),
                affinity: affine,
            });
        }

        warn!(customer_id, fingerprint, "no agent stayed online long enough to assign");
        Err(Error::NoAgentAvailable)
    }

    async fn select(&self) -> Result<String> {
        self.registry.least_loaded().await.inspect_err(|e| {
            if matches!(e, Error::NoAgentAvailable) {
                warn!("no online agent, message left pending");
                #[cfg(feature = "metrics")]
                counter!(dispatch::NO_AGENT_TOTAL).increment(1);
            }
        })
    }
}

pub struct AssignmentCoordinatorBuilder {
    store: Arc<dyn StateStore>,
    keys: Keyspace,
    dedup_window: Option<std::time::Duration>,
    tie_break: Arc<dyn TieBreak>,
    sink: Arc<dyn DeliverySink>,
    selection_attempts: u32,
}

impl AssignmentCoordinatorBuilder {
    fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            keys: Keyspace::default(),
            dedup_window: None,
            tie_break: Arc::new(RandomTieBreak::from_os_rng()),
            sink: Arc::new(LogSink),
            selection_attempts: DEFAULT_SELECTION_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn keyspace(mut self, keys: Keyspace) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn dedup_window(mut self, window: Option<std::time::Duration>) -> Self {
        self.dedup_window = window;
        self
    }

    #[must_use]
    pub fn tie_break(mut self, tie_break: Arc<dyn TieBreak>) -> Self {
        self.tie_break = tie_break;
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn selection_attempts(mut self, attempts: u32) -> Self {
        self.selection_attempts = attempts.max(1);
        self
    }

    pub fn build(self) -> AssignmentCoordinator {
        let Self {
            store,
            keys,
            dedup_window,
            tie_break,
            sink,
            selection_attempts,
        } = self;
        AssignmentCoordinator {
            dedup: Deduplicator::new(store.clone(), keys.clone(), dedup_window),
            registry: AgentRegistry::new(store.clone(), keys.clone(), tie_break),
            director: SessionDirector::new(store.clone(), keys.clone()),
            store,
            keys,
            sink,
            selection_attempts,
        }
    }
}
