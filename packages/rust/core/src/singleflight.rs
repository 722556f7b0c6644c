//! Per-key deduplication of in-flight async work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

/// Concurrent calls for the same key share one execution.
///
/// The first caller for a key runs the work; callers arriving while it is
/// in flight wait for and clone its result. The map lock is only taken to
/// look up or retire a cell, never across an await. Once the work finishes
/// the key is retired, so a later call runs again.
pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key` unless a call for the same key is already in
    /// flight. Returns the value and whether this call did the work.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut leader = false;
        let value = cell
            .get_or_init(|| {
                leader = true;
                work()
            })
            .await
            .clone();

        if leader {
            let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if map.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                map.remove(key);
            }
        }

        (value, leader)
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
