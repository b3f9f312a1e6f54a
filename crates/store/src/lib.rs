//! Tally Store
//!
//! The shared key-value store through which every ingestion handler and the
//! finalization monitor coordinate. All mutable task state lives here and is
//! only ever changed through the atomic primitives of [`IdempotencyStore`].
//!
//! # Key Schema
//!
//! | Key Pattern | Type | Purpose |
//! |-------------|------|---------|
//! | `{prefix}:finished:{task_id}` | Flag | One-way "task closed" marker |
//! | `{prefix}:operators:{task_id}` | Set | Operators that already submitted |
//! | `{prefix}:queue` | List | Accepted submissions awaiting aggregation |
//! | `{prefix}:queue:processing` | List | Items taken by the monitor, not yet acknowledged |

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use tally_core::TaskId;
use thiserror::Error;

pub use memory::MemoryStore;
pub use crate::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or did not answer. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store answered with something this client cannot interpret.
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Atomic primitives offered by the shared store.
///
/// Every method is a single round trip. Implementations must guarantee that
/// [`test_and_insert`](IdempotencyStore::test_and_insert),
/// [`admit`](IdempotencyStore::admit) and
/// [`set_flag`](IdempotencyStore::set_flag) are atomic across all clients.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Insert `member` into the set at `set_key`.
    ///
    /// Returns `true` if the member was already present (nothing changed) and
    /// `false` if it was newly inserted.
    async fn test_and_insert(&self, set_key: &str, member: &str) -> Result<bool>;

    /// Append one payload to the tail of the queue at `queue_key`.
    async fn enqueue(&self, queue_key: &str, payload: &[u8]) -> Result<()>;

    /// Insert `member` into `set_key` and, only if it was absent, append
    /// `payload` to `queue_key`, as one atomic step.
    ///
    /// Returns `true` if the member was already present (nothing changed).
    /// On error neither write has happened.
    async fn admit(
        &self,
        set_key: &str,
        member: &str,
        queue_key: &str,
        payload: &[u8],
    ) -> Result<bool>;

    /// Set the flag at `key` if it is absent.
    ///
    /// Returns `true` if this call set it, `false` if it was already set.
    async fn set_flag(&self, key: &str) -> Result<bool>;

    /// Move the head of `queue_key` onto the tail of `processing_key` and
    /// return it, waiting up to `timeout` for an item to arrive.
    async fn dequeue(
        &self,
        queue_key: &str,
        processing_key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>>;

    /// Remove one occurrence of `payload` from `processing_key`.
    async fn ack(&self, processing_key: &str, payload: &[u8]) -> Result<()>;

    /// Move every item of `processing_key` back to the head of `queue_key`,
    /// preserving their order. Returns how many items moved.
    async fn requeue(&self, processing_key: &str, queue_key: &str) -> Result<usize>;
}

/// Builds the store keys for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn finished(&self, task_id: TaskId) -> String {
        format!("{}:finished:{}", self.prefix, task_id)
    }

    pub fn operators(&self, task_id: TaskId) -> String {
        format!("{}:operators:{}", self.prefix, task_id)
    }

    pub fn queue(&self) -> String {
        format!("{}:queue", self.prefix)
    }

    pub fn processing(&self) -> String {
        format!("{}:queue:processing", self.prefix)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new("tally")
    }
}
