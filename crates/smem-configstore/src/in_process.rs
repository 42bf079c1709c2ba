//! `InProcessConfigStore`: a `Mutex<HashMap>` with expiring entries.
//!
//! Grounded on the original's `LocalMemory` backend: `IsDistributed()`
//! returns `false` there too, since a local backend tracks lock names
//! without providing actual cross-process mutual exclusion — this
//! implementation keeps that honesty: its lock is a real `Mutex` only
//! good for coordinating callers that share the same `Arc`, which is
//! exactly what the in-process N-rank test harness needs (`smem-test-utils`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use smem_types::{Error, Result};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    locks: HashMap<String, ()>,
}

/// Cheap to clone: every clone shares the same underlying map via `Arc`,
/// the way multiple ranks in one test process need to observe each
/// other's publications.
#[derive(Clone)]
pub struct InProcessConfigStore {
    inner: Arc<Mutex<Inner>>,
}

impl InProcessConfigStore {
    #[must_use]
    pub fn new() -> Self {
        InProcessConfigStore {
            inner: Arc::new(Mutex::new(Inner { entries: HashMap::new(), locks: HashMap::new() })),
        }
    }

    fn live(entry: &Entry) -> bool {
        entry.expires_at.map_or(true, |t| Instant::now() < t)
    }
}

impl Default for InProcessConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::ConfigStoreBackend for InProcessConfigStore {
    fn backend_name(&self) -> &'static str {
        "InProcess"
    }

    fn is_distributed(&self) -> bool {
        false
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if Self::live(entry) => Ok(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                Err(Error::NotExist(format!("key '{key}' expired")))
            }
            None => Err(Error::NotExist(format!("key '{key}' not found"))),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.inner.lock().entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.inner.lock().entries.remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotExist(format!("key '{key}' not found"))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        Ok(match inner.entries.get(key) {
            Some(entry) if Self::live(entry) => true,
            Some(_) => {
                inner.entries.remove(key);
                false
            }
            None => false,
        })
    }

    async fn acquire_lock(&self, name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock();
                if !inner.locks.contains_key(name) {
                    inner.locks.insert(name.to_string(), ());
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!("could not acquire lock '{name}'")));
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn release_lock(&self, name: &str) -> Result<()> {
        self.inner.lock().locks.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigStoreBackend;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InProcessConfigStore::new();
        store.put("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v");
        assert!(store.exists("k").await.unwrap());
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn ttl_entries_expire() {
        let store = InProcessConfigStore::new();
        store.put("k", b"v".to_vec(), Some(Duration::from_millis(5))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn second_lock_attempt_times_out_while_first_holds_it() {
        let store = InProcessConfigStore::new();
        store.acquire_lock("l", Duration::from_millis(50)).await.unwrap();
        let result = store.acquire_lock("l", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        store.release_lock("l").await.unwrap();
        assert!(store.acquire_lock("l", Duration::from_millis(20)).await.is_ok());
    }
}
