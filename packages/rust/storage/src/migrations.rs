//! SQL migration definitions for the BuildLens cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: cache_entries, runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (entity, source) enrichment record.
-- disambiguator uses '' for "none" so the uniqueness constraint holds.
CREATE TABLE IF NOT EXISTS cache_entries (
    id            TEXT PRIMARY KEY,
    domain        TEXT NOT NULL,
    name          TEXT NOT NULL,
    disambiguator TEXT NOT NULL DEFAULT '',
    source        TEXT NOT NULL,
    payload_json  TEXT NOT NULL,
    checksum      TEXT NOT NULL,
    fetched_at    TEXT NOT NULL,
    ttl_secs      INTEGER NOT NULL,
    UNIQUE(domain, name, disambiguator, source)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key
    ON cache_entries(domain, name, disambiguator);

-- Analysis run history
CREATE TABLE IF NOT EXISTS runs (
    id           TEXT PRIMARY KEY,
    build_path   TEXT NOT NULL,
    model        TEXT,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    entity_count INTEGER,
    partial      INTEGER NOT NULL DEFAULT 0
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
