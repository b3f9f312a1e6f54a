//! In-process store backend.
//!
//! [`MemoryStore`] keeps every set, flag and list behind one mutex, so each
//! primitive is trivially atomic for all handlers sharing the same instance.
//! Used by tests and by single-process deployments without Redis.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{IdempotencyStore, Result, StoreError};

#[derive(Debug, Default)]
struct Inner {
    sets: HashMap<String, HashSet<String>>,
    flags: HashSet<String>,
    lists: HashMap<String, VecDeque<Vec<u8>>>,
}

/// Thread-safe in-memory [`IdempotencyStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    notify: Notify,
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until reset.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make the next `n` operations fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of members in the set at `key`.
    pub fn set_len(&self, key: &str) -> usize {
        self.inner.lock().sets.get(key).map_or(0, HashSet::len)
    }

    /// Number of items in the list at `key`.
    pub fn list_len(&self, key: &str) -> usize {
        self.inner.lock().lists.get(key).map_or(0, VecDeque::len)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let inner = self.inner.lock();
        Ok(inner.flags.contains(key)
            || inner.sets.get(key).is_some_and(|s| !s.is_empty())
            || inner.lists.get(key).is_some_and(|l| !l.is_empty()))
    }

    async fn test_and_insert(&self, set_key: &str, member: &str) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let inserted = inner
            .sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(!inserted)
    }

    async fn enqueue(&self, queue_key: &str, payload: &[u8]) -> Result<()> {
        self.check_available()?;
        self.inner
            .lock()
            .lists
            .entry(queue_key.to_string())
            .or_default()
            .push_back(payload.to_vec());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn admit(
        &self,
        set_key: &str,
        member: &str,
        queue_key: &str,
        payload: &[u8],
    ) -> Result<bool> {
        self.check_available()?;
        {
            let mut inner = self.inner.lock();
            let inserted = inner
                .sets
                .entry(set_key.to_string())
                .or_default()
                .insert(member.to_string());
            if !inserted {
                return Ok(true);
            }
            inner
                .lists
                .entry(queue_key.to_string())
                .or_default()
                .push_back(payload.to_vec());
        }
        self.notify.notify_waiters();
        Ok(false)
    }

    async fn set_flag(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.inner.lock().flags.insert(key.to_string()))
    }

    async fn dequeue(
        &self,
        queue_key: &str,
        processing_key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_available()?;
            // Register before looking so an enqueue in between is not missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                let item = inner.lists.get_mut(queue_key).and_then(VecDeque::pop_front);
                if let Some(item) = item {
                    inner
                        .lists
                        .entry(processing_key.to_string())
                        .or_default()
                        .push_back(item.clone());
                    return Ok(Some(item));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, processing_key: &str, payload: &[u8]) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        if let Some(list) = inner.lists.get_mut(processing_key) {
            if let Some(pos) = list.iter().position(|item| item.as_slice() == payload) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn requeue(&self, processing_key: &str, queue_key: &str) -> Result<usize> {
        self.check_available()?;
        let moved = {
            let mut inner = self.inner.lock();
            let pending = inner.lists.remove(processing_key).unwrap_or_default();
            let moved = pending.len();
            let queue = inner.lists.entry(queue_key.to_string()).or_default();
            for item in pending.into_iter().rev() {
                queue.push_front(item);
            }
            moved
        };
        if moved > 0 {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_and_insert_reports_existing_member() {
        let store = MemoryStore::new();
        assert!(!store.test_and_insert("s", "a").await.unwrap());
        assert!(store.test_and_insert("s", "a").await.unwrap());
        assert!(!store.test_and_insert("s", "b").await.unwrap());
        assert_eq!(store.set_len("s"), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_test_and_insert_admits_one() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.test_and_insert("ops:1", "0xabc").await.unwrap()
            }));
        }
        let mut fresh = 0;
        for h in handles {
            if !h.await.unwrap() {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn admit_queues_only_new_members() {
        let store = MemoryStore::new();
        assert!(!store.admit("ops:1", "0xabc", "q", b"first").await.unwrap());
        assert!(store.admit("ops:1", "0xabc", "q", b"again").await.unwrap());
        assert!(!store.admit("ops:1", "0xdef", "q", b"other").await.unwrap());
        assert_eq!(store.set_len("ops:1"), 2);
        assert_eq!(store.list_len("q"), 2);

        store.fail_next(1);
        assert!(store.admit("ops:2", "0xabc", "q", b"lost").await.is_err());
        assert_eq!(store.set_len("ops:2"), 0);
        assert_eq!(store.list_len("q"), 2);
    }

    #[tokio::test]
    async fn set_flag_is_one_way() {
        let store = MemoryStore::new();
        assert!(!store.exists("f").await.unwrap());
        assert!(store.set_flag("f").await.unwrap());
        assert!(!store.set_flag("f").await.unwrap());
        assert!(store.exists("f").await.unwrap());
    }

    #[tokio::test]
    async fn dequeue_moves_to_processing_until_ack() {
        let store = MemoryStore::new();
        store.enqueue("q", b"one").await.unwrap();
        store.enqueue("q", b"two").await.unwrap();

        let item = store.dequeue("q", "p", Duration::from_millis(10)).await.unwrap();
        assert_eq!(item.as_deref(), Some(&b"one"[..]));
        assert_eq!(store.list_len("q"), 1);
        assert_eq!(store.list_len("p"), 1);

        store.ack("p", b"one").await.unwrap();
        assert_eq!(store.list_len("p"), 0);
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let store = MemoryStore::new();
        let item = store.dequeue("q", "p", Duration::from_millis(20)).await.unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let store = Arc::new(MemoryStore::new());
        let consumer = {
            let store = store.clone();
            tokio::spawn(async move { store.dequeue("q", "p", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.enqueue("q", b"late").await.unwrap();
        let item = consumer.await.unwrap().unwrap();
        assert_eq!(item.as_deref(), Some(&b"late"[..]));
    }

    #[tokio::test]
    async fn requeue_restores_order_ahead_of_new_items() {
        let store = MemoryStore::new();
        for item in [b"a", b"b", b"c"] {
            store.enqueue("q", item).await.unwrap();
        }
        let timeout = Duration::from_millis(10);
        store.dequeue("q", "p", timeout).await.unwrap();
        store.dequeue("q", "p", timeout).await.unwrap();

        assert_eq!(store.requeue("p", "q").await.unwrap(), 2);
        let mut order = Vec::new();
        while let Some(item) = store.dequeue("q", "p", timeout).await.unwrap() {
            order.push(item);
        }
        assert_eq!(order, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_unavailable() {
        let store = MemoryStore::new();
        store.fail_next(1);
        assert!(matches!(
            store.set_flag("f").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.set_flag("f").await.unwrap());

        store.set_available(false);
        assert!(store.exists("f").await.is_err());
        store.set_available(true);
        assert!(store.exists("f").await.unwrap());
    }
}
