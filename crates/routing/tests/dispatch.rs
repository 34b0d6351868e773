#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end dispatch behaviour against the in-memory store.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    chrono::{TimeZone, Utc},
    switchboard_common::{MessageStatus, Notification},
    switchboard_routing::{
        AssignmentCoordinator, AssignmentOutcome, Error, FirstCandidate, RandomTieBreak,
        RecordingSink, archived_field, fingerprint,
    },
    switchboard_store::{
        Lease, MemoryStore, Result as StoreResult, ScoredMember, StateStore, WriteBatch,
    },
};

struct Harness {
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    coordinator: Arc<AssignmentCoordinator>,
}

impl Harness {
    fn new() -> Self {
        Self::with_seed(11)
    }

    fn with_seed(seed: u64) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let coordinator = AssignmentCoordinator::builder(store.clone())
            .tie_break(Arc::new(RandomTieBreak::seeded(seed)))
            .sink(sink.clone())
            .build();
        Self {
            store,
            sink,
            coordinator: Arc::new(coordinator),
        }
    }

    async fn online(&self, ids: &[&str]) {
        for id in ids {
            self.coordinator.registry().register(id).await.unwrap();
            self.coordinator.registry().set_online(id).await.unwrap();
        }
    }

    async fn sessions(&self, agent_id: &str) -> u64 {
        let record = self
            .coordinator
            .registry()
            .agent(agent_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.session_count as usize, record.active_sessions.len());
        record.session_count
    }

    async fn route(&self, customer: &str, content: &str) -> Result<AssignmentOutcome, Error> {
        self.coordinator.route(notification(customer, content)).await
    }
}

fn notification(customer: &str, content: &str) -> Notification {
    Notification::new(
        customer,
        content,
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn duplicate_is_ignored() {
    let h = Harness::new();
    h.online(&["a"]).await;

    let first = h.route("c1", "my order is late").await.unwrap();
    assert_eq!(first.agent_id(), Some("a"));
    let second = h.route("c1", "my order is late").await.unwrap();
    assert!(second.is_ignored());

    let snapshot = h.coordinator.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(h.sink.deliveries().len(), 1);
    assert_eq!(h.sessions("a").await, 1);
}

#[tokio::test]
async fn invalid_input_touches_nothing() {
    let h = Harness::new();
    h.online(&["a"]).await;

    let err = h.route("  ", "hello").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = h.route("c1", "").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    assert!(h.coordinator.snapshot().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn affinity_beats_load() {
    let h = Harness::new();
    h.online(&["a"]).await;
    h.route("c1", "first").await.unwrap();
    for i in 0..3 {
        h.route(&format!("other-{i}"), "hi").await.unwrap();
    }
    h.online(&["b"]).await;
    assert_eq!(h.sessions("a").await, 4);
    assert_eq!(h.sessions("b").await, 0);

    let outcome = h.route("c1", "second").await.unwrap();
    assert_eq!(
        outcome,
        AssignmentOutcome::Assigned {
            fingerprint: fingerprint("c1", "second"),
            customer_id: "c1".into(),
            agent_id: "a".into(),
            previous_agent: None,
            affinity: true,
        }
    );
    assert_eq!(h.sessions("a").await, 4);
}

#[tokio::test]
async fn failover_moves_session() {
    let h = Harness::new();
    h.online(&["a"]).await;
    h.route("c1", "first").await.unwrap();
    h.online(&["b"]).await;
    h.coordinator.registry().set_offline("a").await.unwrap();

    let outcome = h.route("c1", "second").await.unwrap();
    assert_eq!(outcome.agent_id(), Some("b"));
    assert!(matches!(
        outcome,
        AssignmentOutcome::Assigned { previous_agent: Some(ref prev), affinity: false, .. } if prev == "a"
    ));

    assert_eq!(h.sessions("a").await, 0);
    assert_eq!(h.sessions("b").await, 1);
    assert_eq!(
        h.coordinator.director().assignment("c1").await.unwrap(),
        Some("b".to_string())
    );
    let online = h.coordinator.registry().online_load().await.unwrap();
    assert_eq!(online, vec![ScoredMember {
        member: "b".into(),
        score: 1,
    }]);
}

#[tokio::test]
async fn least_loaded_never_picks_busier_agent() {
    let h = Harness::with_seed(2026);
    h.online(&["a", "b", "c"]).await;
    let registry = h.coordinator.registry();
    registry.attach("b", "seed-1").await.unwrap();
    registry.attach("b", "seed-2").await.unwrap();

    let outcome = h.route("new", "hello").await.unwrap();
    assert_ne!(outcome.agent_id(), Some("b"));
}

#[tokio::test]
async fn ties_split_roughly_evenly() {
    let mut hits: HashMap<String, usize> = HashMap::new();
    for trial in 0..100u64 {
        let h = Harness::with_seed(trial);
        h.online(&["a", "b", "c"]).await;
        let registry = h.coordinator.registry();
        registry.attach("b", "seed-1").await.unwrap();
        registry.attach("b", "seed-2").await.unwrap();

        let outcome = h.route("new", "hello").await.unwrap();
        *hits.entry(outcome.agent_id().unwrap().to_string()).or_default() += 1;
    }
    assert_eq!(hits.get("b"), None);
    let a = hits.get("a").copied().unwrap_or(0);
    assert!((30..=70).contains(&a), "{hits:?}");
}

#[tokio::test]
async fn load_spreads_across_new_customers() {
    let h = Harness::new();
    h.online(&["a", "b", "c"]).await;
    for i in 0..30 {
        h.route(&format!("c{i}"), "hi").await.unwrap();
    }
    for id in ["a", "b", "c"] {
        assert_eq!(h.sessions(id).await, 10);
    }
}

#[tokio::test]
async fn no_agent_leaves_message_pending() {
    let h = Harness::new();
    h.coordinator.registry().register("a").await.unwrap();

    let err = h.route("c1", "anyone there?").await.unwrap_err();
    assert!(matches!(err, Error::NoAgentAvailable));
    assert!(err.is_retryable());

    let pending = h.coordinator.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, MessageStatus::Pending);
    assert!(h.sink.deliveries().is_empty());

    // Repeating a pending message tries again instead of being ignored.
    let err = h.route("c1", "anyone there?").await.unwrap_err();
    assert!(matches!(err, Error::NoAgentAvailable));
    assert_eq!(h.coordinator.pending().await.unwrap().len(), 1);

    h.coordinator.registry().set_online("a").await.unwrap();
    let outcome = h
        .coordinator
        .redispatch(&pending[0].fingerprint)
        .await
        .unwrap();
    assert_eq!(outcome.agent_id(), Some("a"));
    assert!(h.coordinator.pending().await.unwrap().is_empty());
    assert!(
        h.coordinator
            .redispatch(&pending[0].fingerprint)
            .await
            .unwrap()
            .is_ignored()
    );
}

#[tokio::test]
async fn redispatch_unknown_fingerprint() {
    let h = Harness::new();
    let err = h.coordinator.redispatch("nope").await.unwrap_err();
    assert!(matches!(err, Error::UnknownMessage { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_routes_for_one_customer_attach_once() {
    let h = Harness::new();
    h.online(&["a", "b", "c"]).await;

    let tasks: Vec<_> = (0..24)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                coordinator
                    .route(notification("c1", &format!("message {i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let owner = outcomes[0].agent_id().unwrap().to_string();
    assert!(outcomes.iter().all(|o| o.agent_id() == Some(owner.as_str())));

    let mut total = 0;
    for id in ["a", "b", "c"] {
        total += h.sessions(id).await;
    }
    assert_eq!(total, 1);
    assert_eq!(h.sessions(&owner).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_routes_assign_once() {
    let h = Harness::new();
    h.online(&["a", "b"]).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.route(notification("c1", "same")).await.unwrap() })
        })
        .collect();
    let assigned = futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter(|o| !o.as_ref().unwrap().is_ignored())
        .count();
    assert_eq!(assigned, 1);
    assert_eq!(h.sink.deliveries().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_customers_race_while_an_agent_flaps() {
    let h = Harness::with_seed(7);
    h.online(&["a", "b", "c"]).await;

    let routes: Vec<_> = (0..180)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                let customer = format!("c{}", i % 60);
                coordinator
                    .route(notification(&customer, &format!("message {i}")))
                    .await
            })
        })
        .collect();
    let flapper = {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move {
            for _ in 0..25 {
                coordinator.registry().set_offline("b").await.unwrap();
                tokio::task::yield_now().await;
                coordinator.registry().set_online("b").await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for outcome in futures::future::join_all(routes).await {
        match outcome.unwrap() {
            Ok(outcome) => assert!(!outcome.is_ignored()),
            // "b" can drop out under every re-selection of one attempt.
            Err(Error::NoAgentAvailable) => {},
            Err(e) => panic!("unexpected routing error: {e}"),
        }
    }
    flapper.await.unwrap();

    let snapshot = h.coordinator.snapshot().await.unwrap();
    let mut owned = 0;
    for agent in &snapshot.agents {
        assert_eq!(agent.session_count as usize, agent.active_sessions.len());
        if agent.is_online() {
            assert_eq!(
                snapshot.online.get(&agent.agent_id),
                Some(&(agent.session_count as i64))
            );
        }
        for customer in &agent.active_sessions {
            assert_eq!(snapshot.sessions.get(customer), Some(&agent.agent_id));
        }
        owned += agent.active_sessions.len();
    }
    assert_eq!(owned, snapshot.sessions.len());
    assert_eq!(snapshot.online.len(), 3);
}

#[tokio::test]
async fn delivery_failure_keeps_assignment() {
    let h = Harness::new();
    h.online(&["a"]).await;
    h.sink.set_failing(true);

    let err = h.route("c1", "hello").await.unwrap_err();
    assert!(matches!(err, Error::Delivery { ref agent_id, .. } if agent_id == "a"));
    assert!(!err.is_retryable());
    assert_eq!(h.sessions("a").await, 1);
    assert!(h.coordinator.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn dedup_window_allows_repeat_later() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = AssignmentCoordinator::builder(store.clone())
        .dedup_window(Some(Duration::from_secs(3_600)))
        .tie_break(Arc::new(FirstCandidate))
        .sink(Arc::new(RecordingSink::new()))
        .build();
    coordinator.registry().register("a").await.unwrap();
    coordinator.registry().set_online("a").await.unwrap();

    let at = |hour| Utc.with_ymd_and_hms(2026, 5, 4, hour, 0, 0).unwrap();
    let first = coordinator
        .route(Notification::new("c1", "thanks", at(9)))
        .await
        .unwrap();
    assert!(!first.is_ignored());
    let soon = coordinator
        .route(Notification::new("c1", "thanks", at(9)))
        .await
        .unwrap();
    assert!(soon.is_ignored());
    let later = coordinator
        .route(Notification::new("c1", "thanks", at(11)))
        .await
        .unwrap();
    assert_eq!(later.agent_id(), Some("a"));

    // The first sighting is kept next to the new record.
    let fp = fingerprint("c1", "thanks");
    let snapshot = coordinator.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    let first = snapshot
        .messages
        .iter()
        .find(|m| m.received_at == at(9))
        .unwrap();
    assert_eq!(first.status, MessageStatus::Assigned);
    let messages = coordinator.keys().messages();
    assert!(
        store
            .hexists(messages, &archived_field(&fp, first))
            .await
            .unwrap()
    );
    assert!(store.hexists(messages, &fp).await.unwrap());
    assert!(coordinator.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn store_outage_is_retryable() {
    let h = Harness::new();
    h.online(&["a"]).await;
    h.store.set_available(false);

    let err = h.route("c1", "hello").await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(err.is_retryable());

    h.store.set_available(true);
    assert!(h.coordinator.snapshot().await.unwrap().messages.is_empty());
    assert_eq!(h.route("c1", "hello").await.unwrap().agent_id(), Some("a"));
}

/// Delegates to a [`MemoryStore`], failing a set number of batch commits
/// and, when switched on, every `zcard`.
struct FlakyStore {
    inner: MemoryStore,
    commit_failures: AtomicUsize,
    zcard_down: AtomicBool,
}

impl FlakyStore {
    fn new(inner: MemoryStore, commit_failures: usize) -> Self {
        Self {
            inner,
            commit_failures: AtomicUsize::new(commit_failures),
            zcard_down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn hget(&self, map: &str, field: &str) -> StoreResult<Option<String>> {
        self.inner.hget(map, field).await
    }

    async fn hset(&self, map: &str, field: &str, value: &str) -> StoreResult<()> {
        self.inner.hset(map, field, value).await
    }

    async fn hset_nx(&self, map: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.inner.hset_nx(map, field, value).await
    }

    async fn hexists(&self, map: &str, field: &str) -> StoreResult<bool> {
        self.inner.hexists(map, field).await
    }

    async fn hdel(&self, map: &str, field: &str) -> StoreResult<bool> {
        self.inner.hdel(map, field).await
    }

    async fn hgetall(&self, map: &str) -> StoreResult<Vec<(String, String)>> {
        self.inner.hgetall(map).await
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> StoreResult<()> {
        self.inner.zadd(set, member, score).await
    }

    async fn zrem(&self, set: &str, member: &str) -> StoreResult<bool> {
        self.inner.zrem(set, member).await
    }

    async fn zscore(&self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        self.inner.zscore(set, member).await
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.inner.zrange_by_score(set, min, max).await
    }

    async fn zlowest(&self, set: &str) -> StoreResult<Vec<ScoredMember>> {
        self.inner.zlowest(set).await
    }

    async fn zcard(&self, set: &str) -> StoreResult<usize> {
        if self.zcard_down.load(Ordering::SeqCst) {
            return Err(switchboard_store::Error::unavailable("zcard refused"));
        }
        self.inner.zcard(set).await
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<bool> {
        let refused = self
            .commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(switchboard_store::Error::unavailable("commit refused"));
        }
        self.inner.commit(batch).await
    }

    async fn lease(&self, scope: &str) -> StoreResult<Lease> {
        self.inner.lease(scope).await
    }
}

/// A store with agent `a` online and idle, written without batches.
async fn seeded_with_online_agent() -> MemoryStore {
    let seeded = MemoryStore::new();
    seeded
        .hset(
            "switchboard:agents",
            "a",
            r#"{"agent_id":"a","status":"online"}"#,
        )
        .await
        .unwrap();
    seeded
        .zadd("switchboard:online_agents", "a", 0)
        .await
        .unwrap();
    seeded
}

fn coordinator_over(store: Arc<FlakyStore>) -> AssignmentCoordinator {
    AssignmentCoordinator::builder(store)
        .tie_break(Arc::new(FirstCandidate))
        .sink(Arc::new(RecordingSink::new()))
        .build()
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_state() {
    let store = Arc::new(FlakyStore::new(seeded_with_online_agent().await, usize::MAX));
    let coordinator = coordinator_over(store);

    let err = coordinator
        .route(notification("c1", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));

    let snapshot = coordinator.snapshot().await.unwrap();
    assert!(snapshot.sessions.is_empty());
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].status, MessageStatus::Pending);
    assert_eq!(snapshot.agents[0].session_count, 0);
    assert_eq!(snapshot.online.get("a"), Some(&0));
}

#[tokio::test]
async fn retry_after_failed_commit_assigns() {
    let store = Arc::new(FlakyStore::new(seeded_with_online_agent().await, 1));
    let sink = Arc::new(RecordingSink::new());
    let coordinator = AssignmentCoordinator::builder(store)
        .tie_break(Arc::new(FirstCandidate))
        .sink(sink.clone())
        .build();

    let err = coordinator
        .route(notification("c1", "hello"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(coordinator.pending().await.unwrap().len(), 1);

    let retried = coordinator.route(notification("c1", "hello")).await.unwrap();
    assert_eq!(retried.agent_id(), Some("a"));
    assert!(coordinator.pending().await.unwrap().is_empty());
    assert_eq!(sink.deliveries().len(), 1);

    let again = coordinator.route(notification("c1", "hello")).await.unwrap();
    assert!(again.is_ignored());
    assert_eq!(sink.deliveries().len(), 1);
    let record = coordinator.registry().agent("a").await.unwrap().unwrap();
    assert_eq!(record.session_count, 1);
}

#[tokio::test]
async fn status_change_stands_when_gauge_refresh_fails() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new(), 0));
    let coordinator = coordinator_over(store.clone());
    coordinator.registry().register("a").await.unwrap();
    store.zcard_down.store(true, Ordering::SeqCst);

    let record = coordinator.registry().set_online("a").await.unwrap();
    assert!(record.is_online());
    assert_eq!(
        coordinator.registry().online_load().await.unwrap(),
        vec![ScoredMember {
            member: "a".into(),
            score: 0,
        }]
    );

    let record = coordinator.registry().set_offline("a").await.unwrap();
    assert!(!record.is_online());
    assert!(coordinator.registry().online_load().await.unwrap().is_empty());
}
