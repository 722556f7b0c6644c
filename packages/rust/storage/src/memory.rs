//! In-process cache store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use digestkit_shared::{CacheEntry, CacheKind, Result};
use tokio::sync::RwLock;

use crate::{CacheStore, StoreCounts};

/// A [`CacheStore`] that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(CacheKind, String), CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, kind: CacheKind, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(kind, key.to_string()))
            .cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert((entry.kind, entry.key.clone()), entry.clone());
        Ok(())
    }

    async fn remove(&self, kind: CacheKind, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .await
            .remove(&(kind, key.to_string()))
            .is_some())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let entries = self.entries.read().await;
        let mut counts = StoreCounts::default();
        for (kind, _) in entries.keys() {
            match kind {
                CacheKind::Content => counts.content += 1,
                CacheKind::Summary => counts.summary += 1,
            }
        }
        Ok(counts)
    }

    async fn clear(&self) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let n = entries.len() as u64;
        entries.clear();
        Ok(n)
    }

    async fn purge_older_than(&self, kind: CacheKind, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|(k, _), e| *k != kind || e.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}
