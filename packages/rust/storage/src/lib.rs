//! libSQL cache store for BuildLens enrichment records.
//!
//! One row per (entity, source) pair. Writes are last-writer-wins upserts;
//! freshness is computed at read time from `fetched_at + ttl_secs`, so the
//! same row can be a fresh hit for one run and a stale-fallback candidate
//! for a later one. Corrupt rows (undecodable payload, bad timestamp,
//! checksum mismatch) are logged, deleted, and reported as misses — cache
//! damage must never fail an analysis run.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use buildlens_shared::error::{BuildLensError, Result};
use buildlens_shared::types::{CacheEntry, EnrichedRecord, LookupKey, Payload, SourceId};

/// Aggregate counts over the cache, for `buildlens cache stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: u64,
    pub fresh_entries: u64,
    pub expired_entries: u64,
}

/// Primary cache handle wrapping a libSQL database.
pub struct CacheStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn checksum_of(payload_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload_json.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn disambiguator_column(key: &LookupKey) -> &str {
    key.disambiguator.as_deref().unwrap_or("")
}

impl CacheStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildLensError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    BuildLensError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Cache operations
    // -----------------------------------------------------------------------

    /// Look up the record one source holds for a key.
    ///
    /// Returns the entry with its freshness computed against the current
    /// time. A corrupt row is deleted and reported as a miss.
    pub async fn get(&self, key: &LookupKey, source: SourceId) -> Result<Option<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT payload_json, checksum, fetched_at, ttl_secs FROM cache_entries
                 WHERE domain = ?1 AND name = ?2 AND disambiguator = ?3 AND source = ?4",
                params![
                    key.domain.as_str(),
                    key.name.as_str(),
                    disambiguator_column(key),
                    source.as_str()
                ],
            )
            .await
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(BuildLensError::Storage(e.to_string())),
        };

        match decode_row(key, source, &row) {
            Ok(record) => {
                let fresh = !record.is_expired(Utc::now());
                Ok(Some(CacheEntry { record, fresh }))
            }
            Err(reason) => {
                tracing::warn!(%key, %source, reason, "corrupt cache row, treating as miss");
                self.delete_row(key, source).await?;
                Ok(None)
            }
        }
    }

    /// Upsert one source's payload for a key. Last writer wins.
    pub async fn put(
        &self,
        key: &LookupKey,
        source: SourceId,
        payload: &Payload,
        ttl_secs: u64,
    ) -> Result<EnrichedRecord> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| BuildLensError::Storage(format!("payload encode: {e}")))?;
        let checksum = checksum_of(&payload_json);
        let fetched_at = Utc::now();
        let id = Uuid::now_v7().to_string();

        self.conn
            .execute(
                "INSERT INTO cache_entries
                   (id, domain, name, disambiguator, source, payload_json, checksum, fetched_at, ttl_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(domain, name, disambiguator, source) DO UPDATE SET
                   payload_json = excluded.payload_json,
                   checksum = excluded.checksum,
                   fetched_at = excluded.fetched_at,
                   ttl_secs = excluded.ttl_secs",
                params![
                    id.as_str(),
                    key.domain.as_str(),
                    key.name.as_str(),
                    disambiguator_column(key),
                    source.as_str(),
                    payload_json.as_str(),
                    checksum.as_str(),
                    fetched_at.to_rfc3339(),
                    ttl_secs as i64,
                ],
            )
            .await
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;

        Ok(EnrichedRecord {
            key: key.clone(),
            source,
            payload: payload.clone(),
            fetched_at,
            ttl_secs,
            stale: false,
        })
    }

    /// Remove one source's record for a key.
    pub async fn invalidate(&self, key: &LookupKey, source: SourceId) -> Result<()> {
        self.delete_row(key, source).await
    }

    /// Remove every cache entry.
    pub async fn invalidate_all(&self) -> Result<u64> {
        let deleted = self
            .conn
            .execute("DELETE FROM cache_entries", params![])
            .await
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;
        Ok(deleted)
    }

    /// Count entries, split by freshness as of now.
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut rows = self
            .conn
            .query("SELECT fetched_at, ttl_secs FROM cache_entries", params![])
            .await
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;

        let now = Utc::now();
        let mut stats = CacheStats::default();
        while let Ok(Some(row)) = rows.next().await {
            stats.total_entries += 1;
            let fresh = row
                .get::<String>(0)
                .ok()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                .map(|fetched| {
                    let ttl = row.get::<i64>(1).unwrap_or(0);
                    now.signed_duration_since(fetched.with_timezone(&Utc))
                        .num_seconds()
                        < ttl
                })
                .unwrap_or(false);
            if fresh {
                stats.fresh_entries += 1;
            } else {
                stats.expired_entries += 1;
            }
        }
        Ok(stats)
    }

    async fn delete_row(&self, key: &LookupKey, source: SourceId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM cache_entries
                 WHERE domain = ?1 AND name = ?2 AND disambiguator = ?3 AND source = ?4",
                params![
                    key.domain.as_str(),
                    key.name.as_str(),
                    disambiguator_column(key),
                    source.as_str()
                ],
            )
            .await
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of an analysis run. Returns the generated run ID.
    pub async fn insert_run(&self, build_path: &str, model: Option<&str>) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, build_path, model, started_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), build_path, model, now.as_str()],
            )
            .await
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a run finished with its outcome.
    pub async fn finish_run(&self, run_id: &str, entity_count: u32, partial: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, entity_count = ?2, partial = ?3 WHERE id = ?4",
                params![
                    now.as_str(),
                    i64::from(entity_count),
                    i64::from(partial),
                    run_id
                ],
            )
            .await
            .map_err(|e| BuildLensError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Decode one cache row, verifying the stored checksum. Returns the failure
/// reason so the caller can log it.
fn decode_row(
    key: &LookupKey,
    source: SourceId,
    row: &libsql::Row,
) -> std::result::Result<EnrichedRecord, String> {
    let payload_json: String = row.get(0).map_err(|e| format!("payload column: {e}"))?;
    let checksum: String = row.get(1).map_err(|e| format!("checksum column: {e}"))?;
    let fetched_raw: String = row.get(2).map_err(|e| format!("fetched_at column: {e}"))?;
    let ttl_secs: i64 = row.get(3).map_err(|e| format!("ttl column: {e}"))?;

    if checksum_of(&payload_json) != checksum {
        return Err("checksum mismatch".into());
    }
    let payload: Payload =
        serde_json::from_str(&payload_json).map_err(|e| format!("payload decode: {e}"))?;
    let fetched_at = chrono::DateTime::parse_from_rfc3339(&fetched_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp: {e}"))?;

    Ok(EnrichedRecord {
        key: key.clone(),
        source,
        payload,
        fetched_at,
        ttl_secs: ttl_secs.max(0) as u64,
        stale: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildlens_shared::types::SourceDomain;

    /// Temp-dir store that removes its files on drop.
    struct TestStore {
        store: CacheStore,
        dir: std::path::PathBuf,
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
        let dir = std::env::temp_dir().join(format!("bl_test_{}", Uuid::now_v7()));
        let store = CacheStore::open(&dir.join("cache.db"))
            .await
            .expect("open test db");
        TestStore { store, dir }
    }

    fn sample_key() -> LookupKey {
        LookupKey::new(SourceDomain::Skill, "Fireball")
    }

    fn sample_payload() -> Payload {
        let mut payload = Payload::new();
        payload.insert("description".into(), "Launches a fiery projectile".into());
        payload
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let dir = std::env::temp_dir().join(format!("bl_test_{}", Uuid::now_v7()));
        let path = dir.join("cache.db");
        let first = CacheStore::open(&path).await.expect("first open");
        drop(first);
        let second = CacheStore::open(&path).await.expect("second open");
        assert_eq!(second.schema_version().await, 1);
        drop(second);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn put_then_get_is_fresh() {
        let store = test_store().await;
        let key = sample_key();

        let written = store
            .put(&key, SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("put");
        assert!(!written.stale);

        let entry = store
            .get(&key, SourceId::Poe2Db)
            .await
            .expect("get")
            .expect("hit");
        assert!(entry.fresh);
        assert_eq!(entry.record.payload, sample_payload());
        assert_eq!(entry.record.ttl_secs, 3600);
        assert_eq!(entry.record.source, SourceId::Poe2Db);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_not_fresh() {
        let store = test_store().await;
        let key = sample_key();
        store
            .put(&key, SourceId::PoeWiki, &sample_payload(), 0)
            .await
            .expect("put with zero ttl");

        let entry = store
            .get(&key, SourceId::PoeWiki)
            .await
            .expect("get")
            .expect("row still present");
        assert!(!entry.fresh);
        assert_eq!(entry.record.payload, sample_payload());
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let store = test_store().await;
        let key = sample_key();

        store
            .put(&key, SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("first put");

        let mut second = Payload::new();
        second.insert("description".into(), "updated text".into());
        store
            .put(&key, SourceId::Poe2Db, &second, 7200)
            .await
            .expect("second put");

        let entry = store
            .get(&key, SourceId::Poe2Db)
            .await
            .expect("get")
            .expect("hit");
        assert_eq!(entry.record.payload, second);
        assert_eq!(entry.record.ttl_secs, 7200);
    }

    #[tokio::test]
    async fn sources_do_not_collide() {
        let store = test_store().await;
        let key = sample_key();
        store
            .put(&key, SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("put poe2db");

        assert!(store.get(&key, SourceId::Reddit).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn disambiguator_distinguishes_keys() {
        let store = test_store().await;
        let unique = LookupKey::with_disambiguator(SourceDomain::Item, "Tabula Rasa", "unique");
        let bare = LookupKey::new(SourceDomain::Item, "Tabula Rasa");

        store
            .put(&unique, SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("put");

        assert!(store.get(&bare, SourceId::Poe2Db).await.expect("get").is_none());
        assert!(store.get(&unique, SourceId::Poe2Db).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn corrupt_payload_is_a_miss_and_self_heals() {
        let store = test_store().await;
        let key = sample_key();
        store
            .put(&key, SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("put");

        // Damage the stored payload behind the checksum's back.
        store
            .conn
            .execute(
                "UPDATE cache_entries SET payload_json = '{broken' WHERE name = ?1",
                params![key.name.as_str()],
            )
            .await
            .expect("corrupt row");

        assert!(store.get(&key, SourceId::Poe2Db).await.expect("get").is_none());
        // The corrupt row was removed, and a re-put works.
        assert_eq!(store.stats().await.expect("stats").total_entries, 0);
        store
            .put(&key, SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("re-put");
        assert!(store.get(&key, SourceId::Poe2Db).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn invalidate_and_invalidate_all() {
        let store = test_store().await;
        let key = sample_key();
        let other = LookupKey::new(SourceDomain::Item, "Tabula Rasa");

        store
            .put(&key, SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("put 1");
        store
            .put(&other, SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("put 2");

        store
            .invalidate(&key, SourceId::Poe2Db)
            .await
            .expect("invalidate");
        assert!(store.get(&key, SourceId::Poe2Db).await.expect("get").is_none());
        assert!(store.get(&other, SourceId::Poe2Db).await.expect("get").is_some());

        let deleted = store.invalidate_all().await.expect("invalidate all");
        assert_eq!(deleted, 1);
        assert_eq!(store.stats().await.expect("stats").total_entries, 0);
    }

    #[tokio::test]
    async fn stats_split_by_freshness() {
        let store = test_store().await;
        store
            .put(&sample_key(), SourceId::Poe2Db, &sample_payload(), 3600)
            .await
            .expect("fresh put");
        store
            .put(
                &LookupKey::new(SourceDomain::Item, "Tabula Rasa"),
                SourceId::Poe2Db,
                &sample_payload(),
                0,
            )
            .await
            .expect("expired put");

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.fresh_entries, 1);
        assert_eq!(stats.expired_entries, 1);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let store = test_store().await;
        let run_id = store
            .insert_run("/tmp/build.xml", Some("google/gemini-2.5-flash"))
            .await
            .expect("insert run");
        assert!(!run_id.is_empty());

        store
            .finish_run(&run_id, 7, false)
            .await
            .expect("finish run");
    }
}
