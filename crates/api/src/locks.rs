//! Per-key async locks so unrelated services never serialize on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self { Self::default() }

    /// Wait for exclusive access to `key`. Idle slots are pruned on each call.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.retain(|k, v| k == key || Arc::strong_count(v) > 1);
            slots.entry(key.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Lock several keys in sorted order so overlapping callers never deadlock.
    pub async fn lock_all(&self, mut keys: Vec<String>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    pub fn len(&self) -> usize { self.slots.lock().unwrap_or_else(|e| e.into_inner()).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let g = locks.lock("ns/api/v1").await;
        let l2 = locks.clone();
        let waiter = tokio::spawn(async move { l2.lock("ns/api/v1").await; });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(g);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.expect("acquired").expect("join");
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("ns/a/v1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("ns/b/v1")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn lock_all_waits_on_any_held_key() {
        let locks = Arc::new(KeyedLocks::new());
        let held = locks.lock("ns/api/v2").await;
        let l2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let guards = l2.lock_all(vec!["ns/api/v2".into(), "ns/api/v1".into(), "ns/api/v1".into()]).await;
            guards.len()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(held);
        let n = tokio::time::timeout(Duration::from_secs(1), waiter).await.expect("acquired").expect("join");
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn idle_slots_are_pruned() {
        let locks = KeyedLocks::new();
        drop(locks.lock("one").await);
        drop(locks.lock("two").await);
        assert_eq!(locks.len(), 1);
    }
}
