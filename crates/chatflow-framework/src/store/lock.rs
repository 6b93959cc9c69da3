use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

const PRUNE_THRESHOLD: usize = 1024;

/// Per-key async locks.
///
/// Serializes turns for one `(uid, topic)` while letting different keys run
/// concurrently. Idle entries are pruned once the map grows large.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock of `(uid, topic)`.
    pub async fn lock(&self, uid: &str, topic: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(format!("{uid}\u{1f}{topic}")).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock("u1", "t1").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock("u1", "t1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock("u1", "t1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("u2", "t1")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
