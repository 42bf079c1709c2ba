//! Auto-ranking barrier: assigns rank ids to callers that did not supply
//! one explicitly in `FabricConfig::rank_id`.
//!
//! Grounded on spec.md §4.8's description of the original's "publish a
//! per-hostIP counter, wait until the count reaches world_size, assign
//! rank ids by stable arrival order": here, one config-store-wide counter
//! (guarded by a named distributed lock) stands in for the per-host
//! grouping, since this workspace has no notion of which host a rank runs
//! on — every caller that reaches `auto_rank` is treated as belonging to
//! the same group, and "stable arrival order" becomes "order of
//! successfully acquiring the counter's lock". This is a deliberate
//! simplification of the multi-host case; see `DESIGN.md`.

use std::time::Duration;

use smem_configstore::{ConfigStoreBackend, DistributedLockGuard};
use smem_types::{Error, RankId, Result};

const COUNTER_KEY: &str = "fabric/autorank/counter";
const LOCK_NAME: &str = "fabric/autorank/lock";

/// Acquires the auto-ranking lock, reads and increments the shared
/// counter, and returns the value this caller was assigned. Fails if the
/// lock cannot be acquired within `timeout`, or if the assigned rank
/// would not fit within `world_size`.
pub async fn auto_rank(store: &dyn ConfigStoreBackend, world_size: u32, timeout: Duration) -> Result<RankId> {
    let mut guard = DistributedLockGuard::try_acquire(store, LOCK_NAME, timeout).await;
    if !guard.is_locked() {
        return Err(Error::Timeout(format!("could not acquire '{LOCK_NAME}' within {timeout:?}")));
    }

    let next = match store.get(COUNTER_KEY).await {
        Ok(bytes) => {
            let arr: [u8; 4] = bytes
                .try_into()
                .map_err(|_| Error::InvalidParam("corrupt auto-ranking counter".into()))?;
            u32::from_le_bytes(arr)
        }
        Err(_) => 0,
    };
    store.put(COUNTER_KEY, (next + 1).to_le_bytes().to_vec(), None).await?;
    guard.unlock().await;

    if next >= world_size {
        return Err(Error::InvalidParam(format!(
            "auto-ranking assigned rank {next} which does not fit within world_size {world_size}"
        )));
    }
    Ok(RankId(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smem_configstore::in_process::InProcessConfigStore;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn sequential_callers_get_distinct_increasing_ranks() {
        let store = InProcessConfigStore::new();
        let r0 = auto_rank(&store, 3, Duration::from_millis(200)).await.unwrap();
        let r1 = auto_rank(&store, 3, Duration::from_millis(200)).await.unwrap();
        let r2 = auto_rank(&store, 3, Duration::from_millis(200)).await.unwrap();
        assert_eq!(vec![r0.0, r1.0, r2.0], vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn concurrent_callers_get_a_distinct_rank_each() {
        let store = Arc::new(InProcessConfigStore::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                auto_rank(store.as_ref(), 4, Duration::from_millis(500)).await.unwrap()
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            seen.insert(h.await.unwrap().0);
        }
        assert_eq!(seen, HashSet::from([0, 1, 2, 3]));
    }

    #[tokio::test]
    async fn over_subscription_is_rejected() {
        let store = InProcessConfigStore::new();
        auto_rank(&store, 1, Duration::from_millis(200)).await.unwrap();
        let result = auto_rank(&store, 1, Duration::from_millis(200)).await;
        assert!(result.is_err());
    }
}
