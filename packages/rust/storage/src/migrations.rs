//! SQL migration definitions for the DigestKit cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: cache_entries",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Fetched articles and generated summaries, one row per (kind, url)
CREATE TABLE IF NOT EXISTS cache_entries (
    kind         TEXT NOT NULL,
    key          TEXT NOT NULL,
    content_hash TEXT,
    payload      TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    PRIMARY KEY (kind, key)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index cache entries by age for TTL purges",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_cache_entries_created
    ON cache_entries(kind, created_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
