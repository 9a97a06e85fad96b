//! Fetch coordination: the concurrency, caching, and failure-absorption
//! core of the pipeline.
//!
//! One task per (entity, source) pair, gated by a shared semaphore. Each
//! task is cache-first: a fresh entry short-circuits without touching the
//! network. Misses go through the adapter with centralized exponential
//! backoff; only retriable failures are retried, and exhaustion falls back
//! to an expired cache entry (flagged stale) when one exists. The whole
//! phase runs under a single deadline; when it fires, in-flight tasks are
//! aborted and whatever already resolved is kept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use buildlens_shared::config::{FetchConfig, SourcesConfig};
use buildlens_shared::error::FetchError;
use buildlens_shared::types::{EnrichedRecord, LookupKey, SourceFailure, SourceId};
use buildlens_sources::{SourceAdapter, SourceRegistry};
use buildlens_storage::CacheStore;

use crate::backoff::RetryPolicy;

/// Everything the coordination phase produced.
#[derive(Debug, Default)]
pub struct Resolved {
    /// Records per key, in source-priority order.
    pub records: HashMap<LookupKey, Vec<EnrichedRecord>>,
    /// Per-source failure annotations per key.
    pub failures: HashMap<LookupKey, Vec<SourceFailure>>,
    /// True when the deadline fired before every pair resolved.
    pub timed_out: bool,
}

/// Per-source record TTLs, from config.
pub fn ttl_map(sources: &SourcesConfig) -> HashMap<SourceId, u64> {
    SourceId::priority_order()
        .into_iter()
        .map(|source| (source, sources.settings_for(source).ttl_secs()))
        .collect()
}

/// Runs the coordination phase for one set of extracted keys.
pub struct Coordinator {
    registry: Arc<SourceRegistry>,
    store: Arc<CacheStore>,
    policy: RetryPolicy,
    concurrency: u32,
    timeout: Duration,
    ttls: HashMap<SourceId, u64>,
}

enum PairOutcome {
    Record(EnrichedRecord),
    Failure(SourceFailure),
}

impl Coordinator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<CacheStore>,
        config: &FetchConfig,
        ttls: HashMap<SourceId, u64>,
    ) -> Self {
        Self {
            registry,
            store,
            policy: RetryPolicy::from_config(config),
            concurrency: config.concurrency.max(1),
            timeout: Duration::from_secs(config.coordination_timeout_secs),
            ttls,
        }
    }

    /// Resolve every (key, supporting source) pair under the deadline.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn resolve(&self, keys: &[LookupKey]) -> Resolved {
        let semaphore = Arc::new(Semaphore::new(self.concurrency as usize));
        let deadline = tokio::time::Instant::now() + self.timeout;

        let mut join_set: JoinSet<(LookupKey, PairOutcome)> = JoinSet::new();
        for key in keys {
            for adapter in self.registry.adapters_for(key.domain) {
                let key = key.clone();
                let store = self.store.clone();
                let policy = self.policy.clone();
                let semaphore = semaphore.clone();
                let ttl_secs = self
                    .ttls
                    .get(&adapter.id())
                    .copied()
                    .unwrap_or(24 * 3600);
                join_set.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    let outcome = resolve_pair(adapter, &key, &store, &policy, ttl_secs).await;
                    (key, outcome)
                });
            }
        }

        let mut resolved = Resolved::default();
        let collection = async {
            while let Some(joined) = join_set.join_next().await {
                let Ok((key, outcome)) = joined else { continue };
                match outcome {
                    PairOutcome::Record(record) => {
                        resolved.records.entry(key).or_default().push(record);
                    }
                    PairOutcome::Failure(failure) => {
                        resolved.failures.entry(key).or_default().push(failure);
                    }
                }
            }
        };
        if tokio::time::timeout_at(deadline, collection).await.is_err() {
            warn!(timeout_secs = self.timeout.as_secs(), "coordination deadline fired");
            resolved.timed_out = true;
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
        }

        // Priority order is a coordinator guarantee; task completion order
        // is arbitrary.
        for records in resolved.records.values_mut() {
            records.sort_by_key(|r| priority_index(r.source));
        }
        resolved
    }
}

fn priority_index(source: SourceId) -> usize {
    SourceId::priority_order()
        .iter()
        .position(|s| *s == source)
        .unwrap_or(usize::MAX)
}

/// Resolve one (entity, source) pair end to end.
async fn resolve_pair(
    adapter: Arc<dyn SourceAdapter>,
    key: &LookupKey,
    store: &CacheStore,
    policy: &RetryPolicy,
    ttl_secs: u64,
) -> PairOutcome {
    let source = adapter.id();

    let cached = match store.get(key, source).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(%key, %source, error = %e, "cache read failed, fetching live");
            None
        }
    };
    if let Some(entry) = &cached {
        if entry.fresh {
            debug!(%key, %source, "fresh cache hit");
            return PairOutcome::Record(entry.record.clone());
        }
    }

    let mut attempt = 0;
    let final_error = loop {
        attempt += 1;
        match adapter.fetch(key).await {
            Ok(payload) => {
                match store.put(key, source, &payload, ttl_secs).await {
                    Ok(record) => return PairOutcome::Record(record),
                    Err(e) => {
                        // Losing the cache write costs a refetch next run,
                        // nothing more.
                        warn!(%key, %source, error = %e, "cache write failed");
                        return PairOutcome::Record(EnrichedRecord {
                            key: key.clone(),
                            source,
                            payload,
                            fetched_at: Utc::now(),
                            ttl_secs,
                            stale: false,
                        });
                    }
                }
            }
            Err(e) if e.retriable() && attempt < policy.max_attempts() => {
                let retry_after = match &e {
                    FetchError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                let delay = policy.delay_for(attempt, retry_after);
                debug!(%key, %source, attempt, delay_ms = delay.as_millis() as u64,
                    kind = e.kind(), "retrying after backoff");
                tokio::time::sleep(delay).await;
            }
            Err(e) => break e,
        }
    };

    // A NotFound is authoritative; stale data would contradict it.
    if !matches!(final_error, FetchError::NotFound) {
        if let Some(entry) = cached {
            warn!(%key, %source, kind = final_error.kind(), "serving stale cache entry");
            let mut record = entry.record;
            record.stale = true;
            return PairOutcome::Record(record);
        }
    }

    debug!(%key, %source, kind = final_error.kind(), "source failed for entity");
    PairOutcome::Failure(SourceFailure {
        source,
        kind: final_error.kind().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    use buildlens_shared::types::{Payload, SourceDomain};

    #[derive(Clone)]
    enum Step {
        Ok,
        NotFound,
        Unreachable,
        RateLimited,
        Parse,
    }

    /// Scripted adapter: plays its steps in order, then repeats the last
    /// one. Counts calls and tracks peak concurrency.
    struct StubAdapter {
        id: SourceId,
        domains: Vec<SourceDomain>,
        steps: Mutex<Vec<Step>>,
        calls: AtomicU32,
        in_flight: AtomicU32,
        peak_in_flight: AtomicU32,
        delay: Duration,
    }

    impl StubAdapter {
        fn new(id: SourceId, domains: Vec<SourceDomain>, steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                id,
                domains,
                steps: Mutex::new(steps),
                calls: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                peak_in_flight: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn with_delay(
            id: SourceId,
            domains: Vec<SourceDomain>,
            steps: Vec<Step>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                id,
                domains,
                steps: Mutex::new(steps),
                calls: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                peak_in_flight: AtomicU32::new(0),
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn id(&self) -> SourceId {
            self.id
        }

        fn supports(&self, domain: SourceDomain) -> bool {
            self.domains.contains(&domain)
        }

        async fn fetch(&self, key: &LookupKey) -> std::result::Result<Payload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let step = {
                let mut steps = self.steps.lock().await;
                if steps.len() > 1 {
                    steps.remove(0)
                } else {
                    steps[0].clone()
                }
            };
            match step {
                Step::Ok => {
                    let mut payload = Payload::new();
                    payload.insert("name".into(), json!(key.name));
                    payload.insert("from".into(), json!(self.id.as_str()));
                    Ok(payload)
                }
                Step::NotFound => Err(FetchError::NotFound),
                Step::Unreachable => Err(FetchError::Unreachable("refused".into())),
                Step::RateLimited => Err(FetchError::RateLimited {
                    retry_after: Some(Duration::from_millis(1)),
                }),
                Step::Parse => Err(FetchError::Parse("bad page".into())),
            }
        }
    }

    /// Temp-dir store that removes its files on drop.
    struct TestStore {
        store: Arc<CacheStore>,
        dir: std::path::PathBuf,
    }

    impl TestStore {
        fn handle(&self) -> Arc<CacheStore> {
            Arc::clone(&self.store)
        }
    }

    impl std::ops::Deref for TestStore {
        type Target = CacheStore;

        fn deref(&self) -> &CacheStore {
            &self.store
        }
    }

    impl Drop for TestStore {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    async fn test_store() -> TestStore {
        let dir = std::env::temp_dir().join(format!("bl_coord_{}", uuid::Uuid::now_v7()));
        let store = Arc::new(
            CacheStore::open(&dir.join("cache.db"))
                .await
                .expect("open test db"),
        );
        TestStore { store, dir }
    }

    fn fast_config() -> FetchConfig {
        FetchConfig {
            concurrency: 4,
            coordination_timeout_secs: 30,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
        }
    }

    fn coordinator(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<CacheStore>,
        config: FetchConfig,
    ) -> Coordinator {
        Coordinator::new(
            Arc::new(SourceRegistry::with_adapters(adapters)),
            store,
            &config,
            HashMap::from([(SourceId::Poe2Db, 3600), (SourceId::PoeWiki, 3600)]),
        )
    }

    fn skill_key(name: &str) -> LookupKey {
        LookupKey::new(SourceDomain::Skill, name)
    }

    #[tokio::test]
    async fn fresh_cache_hit_skips_the_source() {
        let store = test_store().await;
        let key = skill_key("Fireball");
        let mut payload = Payload::new();
        payload.insert("name".into(), json!("Fireball"));
        store
            .put(&key, SourceId::Poe2Db, &payload, 3600)
            .await
            .expect("seed cache");

        let stub = StubAdapter::new(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::Unreachable],
        );
        let coord = coordinator(vec![stub.clone()], store.handle(), fast_config());
        let resolved = coord.resolve(std::slice::from_ref(&key)).await;

        assert_eq!(stub.calls(), 0);
        let records = &resolved.records[&key];
        assert_eq!(records.len(), 1);
        assert!(!records[0].stale);
        assert!(!resolved.timed_out);
    }

    #[tokio::test]
    async fn successful_fetch_lands_in_the_cache() {
        let store = test_store().await;
        let key = skill_key("Fireball");
        let stub = StubAdapter::new(SourceId::Poe2Db, vec![SourceDomain::Skill], vec![Step::Ok]);
        let coord = coordinator(vec![stub.clone()], store.handle(), fast_config());

        let resolved = coord.resolve(std::slice::from_ref(&key)).await;
        assert_eq!(resolved.records[&key].len(), 1);

        let entry = store
            .get(&key, SourceId::Poe2Db)
            .await
            .expect("get")
            .expect("cached");
        assert!(entry.fresh);
        assert_eq!(entry.record.payload["name"], json!("Fireball"));
    }

    #[tokio::test]
    async fn retriable_failures_retry_until_success() {
        let store = test_store().await;
        let key = skill_key("Fireball");
        let stub = StubAdapter::new(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::Unreachable, Step::RateLimited, Step::Ok],
        );
        let coord = coordinator(vec![stub.clone()], store.handle(), fast_config());

        let resolved = coord.resolve(std::slice::from_ref(&key)).await;
        assert_eq!(stub.calls(), 3);
        assert_eq!(resolved.records[&key].len(), 1);
        assert!(resolved.failures.is_empty());
    }

    #[tokio::test]
    async fn not_found_is_terminal_and_annotated() {
        let store = test_store().await;
        let key = skill_key("No Such Skill");
        let stub = StubAdapter::new(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::NotFound],
        );
        let coord = coordinator(vec![stub.clone()], store.handle(), fast_config());

        let resolved = coord.resolve(std::slice::from_ref(&key)).await;
        assert_eq!(stub.calls(), 1);
        assert!(resolved.records.is_empty());
        assert_eq!(resolved.failures[&key].len(), 1);
        assert_eq!(resolved.failures[&key][0].kind, "not-found");
    }

    #[tokio::test]
    async fn parse_failures_are_not_retried() {
        let store = test_store().await;
        let key = skill_key("Fireball");
        let stub = StubAdapter::new(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::Parse],
        );
        let coord = coordinator(vec![stub.clone()], store.handle(), fast_config());

        let resolved = coord.resolve(std::slice::from_ref(&key)).await;
        assert_eq!(stub.calls(), 1);
        assert_eq!(resolved.failures[&key][0].kind, "parse");
    }

    #[tokio::test]
    async fn exhaustion_falls_back_to_stale_cache() {
        let store = test_store().await;
        let key = skill_key("Fireball");
        let mut payload = Payload::new();
        payload.insert("name".into(), json!("Fireball"));
        payload.insert("old".into(), json!(true));
        store
            .put(&key, SourceId::Poe2Db, &payload, 0) // expired immediately
            .await
            .expect("seed stale cache");

        let stub = StubAdapter::new(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::Unreachable],
        );
        let coord = coordinator(vec![stub.clone()], store.handle(), fast_config());

        let resolved = coord.resolve(std::slice::from_ref(&key)).await;
        assert_eq!(stub.calls(), 3); // full retry ceiling first
        let record = &resolved.records[&key][0];
        assert!(record.stale);
        assert_eq!(record.payload, payload);
        assert!(resolved.failures.is_empty());
    }

    #[tokio::test]
    async fn not_found_never_resurrects_stale_data() {
        let store = test_store().await;
        let key = skill_key("Removed Skill");
        let mut payload = Payload::new();
        payload.insert("name".into(), json!("Removed Skill"));
        store
            .put(&key, SourceId::Poe2Db, &payload, 0)
            .await
            .expect("seed stale cache");

        let stub = StubAdapter::new(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::NotFound],
        );
        let coord = coordinator(vec![stub], store.handle(), fast_config());

        let resolved = coord.resolve(std::slice::from_ref(&key)).await;
        assert!(resolved.records.is_empty());
        assert_eq!(resolved.failures[&key][0].kind, "not-found");
    }

    #[tokio::test]
    async fn always_failing_source_terminates_with_empty_entries() {
        let store = test_store().await;
        let keys: Vec<LookupKey> = (0..4)
            .map(|i| skill_key(&format!("Skill {i}")))
            .collect();
        let stub = StubAdapter::new(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::Unreachable],
        );
        let coord = coordinator(vec![stub.clone()], store.handle(), fast_config());

        let resolved = coord.resolve(&keys).await;
        assert!(!resolved.timed_out);
        assert!(resolved.records.is_empty());
        // Retry ceiling per key, then absorbed into annotations.
        assert_eq!(stub.calls(), 4 * 3);
        for key in &keys {
            assert_eq!(resolved.failures[key][0].kind, "unreachable");
        }
    }

    #[tokio::test]
    async fn deadline_aborts_in_flight_work() {
        let store = test_store().await;
        let key = skill_key("Fireball");
        let stub = StubAdapter::with_delay(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::Ok],
            Duration::from_secs(60),
        );
        let mut config = fast_config();
        config.coordination_timeout_secs = 1;
        let coord = coordinator(vec![stub], store.handle(), config);

        let start = std::time::Instant::now();
        let resolved = coord.resolve(std::slice::from_ref(&key)).await;
        assert!(resolved.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
        // The aborted task never wrote anything.
        assert_eq!(store.stats().await.expect("stats").total_entries, 0);
    }

    #[tokio::test]
    async fn completed_results_survive_a_timeout() {
        let store = test_store().await;
        let fast_key = skill_key("Fast Skill");
        let slow_key = LookupKey::new(SourceDomain::Item, "Slow Item");

        let fast = StubAdapter::new(SourceId::Poe2Db, vec![SourceDomain::Skill], vec![Step::Ok]);
        let slow = StubAdapter::with_delay(
            SourceId::PoeWiki,
            vec![SourceDomain::Item],
            vec![Step::Ok],
            Duration::from_secs(60),
        );

        let mut config = fast_config();
        config.coordination_timeout_secs = 1;
        let coord = coordinator(vec![fast, slow], store.handle(), config);

        let resolved = coord.resolve(&[fast_key.clone(), slow_key.clone()]).await;
        assert!(resolved.timed_out);
        assert_eq!(resolved.records[&fast_key].len(), 1);
        assert!(!resolved.records.contains_key(&slow_key));
    }

    #[tokio::test]
    async fn records_come_back_in_priority_order() {
        let store = test_store().await;
        let key = skill_key("Fireball");
        let wiki = StubAdapter::new(SourceId::PoeWiki, vec![SourceDomain::Skill], vec![Step::Ok]);
        let poe2db = StubAdapter::new(SourceId::Poe2Db, vec![SourceDomain::Skill], vec![Step::Ok]);
        // Registered out of priority order on purpose.
        let coord = coordinator(vec![wiki, poe2db], store.handle(), fast_config());

        let resolved = coord.resolve(std::slice::from_ref(&key)).await;
        let sources: Vec<SourceId> = resolved.records[&key].iter().map(|r| r.source).collect();
        assert_eq!(sources, vec![SourceId::Poe2Db, SourceId::PoeWiki]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_the_semaphore() {
        let store = test_store().await;
        let keys: Vec<LookupKey> = (0..8)
            .map(|i| skill_key(&format!("Skill {i}")))
            .collect();
        let stub = StubAdapter::with_delay(
            SourceId::Poe2Db,
            vec![SourceDomain::Skill],
            vec![Step::Ok],
            Duration::from_millis(30),
        );
        let mut config = fast_config();
        config.concurrency = 2;
        let coord = coordinator(vec![stub.clone()], store.handle(), config);

        coord.resolve(&keys).await;
        assert!(stub.peak_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(stub.calls(), 8);
    }
}
