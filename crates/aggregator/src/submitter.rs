//! Transaction submitter: hands finalized task results to the settlement layer.
//!
//! Backends implement [`TransactionSubmitter`]. [`DryRunSubmitter`] records
//! every submission in memory and is used by tests and the default daemon.

use async_trait::async_trait;
use parking_lot::Mutex;
use tally_core::{TaskId, TaskResult, TxReceipt};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// The backend may accept the same submission if retried.
    #[error("transient submit failure: {0}")]
    Transient(String),
    /// Retrying will not help.
    #[error("submit rejected: {0}")]
    Fatal(String),
}

impl SubmitError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Submits a finalized task result and waits for a receipt.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    async fn submit_finalized(
        &self,
        task_id: TaskId,
        result: &TaskResult,
    ) -> Result<TxReceipt, SubmitError>;
}

/// Dry-run submitter. Records every submitted result.
pub struct DryRunSubmitter {
    submissions: Mutex<Vec<TaskResult>>,
    fail_next: Mutex<usize>,
}

impl DryRunSubmitter {
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            fail_next: Mutex::new(0),
        }
    }

    /// Make the next `n` submissions fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        *self.fail_next.lock() = n;
    }

    /// All recorded submissions.
    pub fn submissions(&self) -> Vec<TaskResult> {
        self.submissions.lock().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

impl Default for DryRunSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSubmitter for DryRunSubmitter {
    async fn submit_finalized(
        &self,
        task_id: TaskId,
        result: &TaskResult,
    ) -> Result<TxReceipt, SubmitError> {
        {
            let mut remaining = self.fail_next.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SubmitError::Transient("injected failure".into()));
            }
        }

        let mut submissions = self.submissions.lock();
        submissions.push(result.clone());
        info!(task_id, value = result.value, "dry-run: recorded task result");
        Ok(TxReceipt {
            tx_hash: format!("dryrun_{}_{}", task_id, submissions.len()),
            confirmed: true,
        })
    }
}
