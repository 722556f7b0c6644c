//! Cache storage for DigestKit.
//!
//! [`CacheStore`] is the persistence seam used by the cache manager. Two
//! implementations ship here:
//! - [`Storage`]: a libSQL database file that survives between runs
//! - [`MemoryStore`]: a process-local map, used for `--no-cache` runs and tests
//!
//! Stores are dumb: they hold entries and report their age. TTLs and
//! content-hash checks belong to the cache manager.

mod memory;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use digestkit_shared::{CacheEntry, CacheKind, DigestError, Result};
use libsql::{Connection, Database, params};

pub use memory::MemoryStore;

/// Number of stored entries per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub content: u64,
    pub summary: u64,
}

/// Key/value persistence for cache entries, keyed by `(kind, key)`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up an entry.
    async fn get(&self, kind: CacheKind, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or replace the entry with the same `(kind, key)`.
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Delete one entry. Returns whether it existed.
    async fn remove(&self, kind: CacheKind, key: &str) -> Result<bool>;

    /// Entry counts per kind.
    async fn counts(&self) -> Result<StoreCounts>;

    /// Delete every entry. Returns the number removed.
    async fn clear(&self) -> Result<u64>;

    /// Delete entries of `kind` created before `cutoff`.
    async fn purge_older_than(&self, kind: CacheKind, cutoff: DateTime<Utc>) -> Result<u64>;
}

fn storage_err(e: libsql::Error) -> DigestError {
    DigestError::Storage(e.to_string())
}

/// Fixed-width RFC 3339 so stored timestamps compare lexically.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// libSQL store
// ---------------------------------------------------------------------------

/// Persistent cache store wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DigestError::Storage(format!(
                "cache database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
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
                    DigestError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
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

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DigestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for Storage {
    async fn get(&self, kind: CacheKind, key: &str) -> Result<Option<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT content_hash, payload, created_at FROM cache_entries
                 WHERE kind = ?1 AND key = ?2",
                params![kind.as_str(), key],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let created_at: String = row.get(2).map_err(storage_err)?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| DigestError::Storage(format!("invalid date: {e}")))?;

                Ok(Some(CacheEntry {
                    kind,
                    key: key.to_string(),
                    content_hash: row.get::<String>(0).ok(),
                    payload: row.get::<String>(1).map_err(storage_err)?,
                    created_at,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO cache_entries (kind, key, content_hash, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(kind, key) DO UPDATE SET
                   content_hash = excluded.content_hash,
                   payload = excluded.payload,
                   created_at = excluded.created_at",
                params![
                    entry.kind.as_str(),
                    entry.key.as_str(),
                    entry.content_hash.as_deref(),
                    entry.payload.as_str(),
                    timestamp(&entry.created_at),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn remove(&self, kind: CacheKind, key: &str) -> Result<bool> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM cache_entries WHERE kind = ?1 AND key = ?2",
                params![kind.as_str(), key],
            )
            .await
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT kind, COUNT(*) FROM cache_entries GROUP BY kind",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut counts = StoreCounts::default();
        while let Ok(Some(row)) = rows.next().await {
            let kind: String = row.get(0).map_err(storage_err)?;
            let n = row.get::<i64>(1).map_err(storage_err)? as u64;
            match kind.parse::<CacheKind>() {
                Ok(CacheKind::Content) => counts.content = n,
                Ok(CacheKind::Summary) => counts.summary = n,
                Err(e) => tracing::warn!(error = %e, "ignoring unknown cache kind"),
            }
        }
        Ok(counts)
    }

    async fn clear(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM cache_entries", params![])
            .await
            .map_err(storage_err)
    }

    async fn purge_older_than(&self, kind: CacheKind, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM cache_entries WHERE kind = ?1 AND created_at < ?2",
                params![kind.as_str(), timestamp(&cutoff)],
            )
            .await
            .map_err(storage_err)
    }
}
