//! Per-key async mutual exclusion
//!
//! Guards the read-modify-write of a single form's responses so two
//! submissions to the same form in this process never interleave. Locks for
//! different keys are independent. Nothing here protects against other
//! processes writing the same document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held while the key is locked; released on drop
pub struct KeyGuard<'a> {
    owner: &'a KeyedLock,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until `key` is free and lock it
    pub async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let guard = self.entry(key).lock_owned().await;
        KeyGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Lock `key` if it's free right now
    pub fn try_acquire(&self, key: &str) -> Option<KeyGuard<'_>> {
        let guard = self.entry(key).try_lock_owned().ok()?;
        Some(KeyGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        })
    }

    /// Lock `key`, re-checking every `poll` while another holder has it
    pub async fn acquire_polling(&self, key: &str, poll: Duration) -> KeyGuard<'_> {
        loop {
            if let Some(guard) = self.try_acquire(key) {
                return guard;
            }
            debug!("Lock for {} is held; deferring", key);
            tokio::time::sleep(poll).await;
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.get(key).is_some_and(|m| m.try_lock().is_err())
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Forget the key once nobody holds or waits on it
        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mutex) = locks.get(&self.key) {
            if Arc::strong_count(mutex) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_key_excludes() {
        let lock = KeyedLock::new();
        let guard = lock.acquire("form-1").await;

        assert!(lock.is_locked("form-1"));
        assert!(lock.try_acquire("form-1").is_none());
        assert!(lock.try_acquire("form-2").is_some());

        drop(guard);
        assert!(!lock.is_locked("form-1"));
        assert!(lock.try_acquire("form-1").is_some());
    }

    #[tokio::test]
    async fn test_keys_are_pruned() {
        let lock = KeyedLock::new();
        {
            let _a = lock.acquire("a").await;
            let _b = lock.acquire("b").await;
            assert_eq!(lock.len(), 2);
        }
        assert!(lock.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_waits_for_release() {
        let lock = Arc::new(KeyedLock::new());
        let entered = Arc::new(AtomicUsize::new(0));

        let guard = lock.acquire("form-1").await;

        let task = {
            let lock = lock.clone();
            let entered = entered.clone();
            tokio::spawn(async move {
                let _guard = lock
                    .acquire_polling("form-1", Duration::from_millis(500))
                    .await;
                entered.fetch_add(1, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        drop(guard);
        task.await.unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }
}
