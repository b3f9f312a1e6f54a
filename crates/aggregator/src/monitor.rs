//! Finalization monitor: drains accepted submissions, tallies them per task and
//! finalizes each task exactly once.
//!
//! Every task moves through `Open -> Collecting -> Finalized` or, when a
//! deadline is configured, `Open -> Collecting -> Expired`. The finished flag
//! is claimed with an atomic set-if-absent before anything is submitted, so a
//! task can reach the submitter at most once across restarts and replicas.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tally_core::{AcceptedSubmission, TaskId, TaskResult, TxReceipt};
use tally_store::{IdempotencyStore, StoreError, StoreKeys};
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::policy::{FinalizationPolicy, Tally};
use crate::submitter::{SubmitError, TransactionSubmitter};

/// Configuration for the finalization monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub keys: StoreKeys,
    /// Longest a single dequeue waits for new work.
    pub poll_interval: Duration,
    /// Expire a task this long after the monitor first saw it.
    pub task_deadline: Option<Duration>,
    /// First retry delay; doubles per attempt up to `retry_max`.
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub max_submit_attempts: u32,
    /// How long terminal tasks stay in memory before being pruned.
    pub terminal_retention: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            keys: StoreKeys::default(),
            poll_interval: Duration::from_secs(1),
            task_deadline: None,
            retry_base: Duration::from_millis(200),
            retry_max: Duration::from_secs(10),
            max_submit_attempts: 5,
            terminal_retention: Duration::from_secs(600),
        }
    }
}

impl MonitorConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_base
            .checked_mul(factor)
            .unwrap_or(self.retry_max)
            .min(self.retry_max)
    }
}

/// Lifecycle of a task as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// No submission seen yet.
    Open,
    Collecting(Tally),
    Finalized,
    Expired,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Expired)
    }
}

/// Something observable that happened to a task.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// The aggregate was submitted.
    Finalized {
        task_id: TaskId,
        result: TaskResult,
        receipt: TxReceipt,
    },
    /// The finished flag was already set elsewhere; nothing was submitted.
    AlreadyFinalized { task_id: TaskId },
    /// The deadline passed before the policy was satisfied.
    Expired { task_id: TaskId, responses: usize },
    /// The flag is set but the submitter gave up. Needs operator attention.
    SubmissionFailed {
        task_id: TaskId,
        result: TaskResult,
        error: SubmitError,
    },
}

struct TrackedTask {
    state: TaskState,
    first_seen: Instant,
    /// Raw queue entries still held in the processing list.
    entries: Vec<Vec<u8>>,
    closed_at: Option<Instant>,
}

pub struct Monitor {
    config: MonitorConfig,
    store: Arc<dyn IdempotencyStore>,
    policy: Box<dyn FinalizationPolicy>,
    submitter: Arc<dyn TransactionSubmitter>,
    tasks: HashMap<TaskId, TrackedTask>,
    events: broadcast::Sender<MonitorEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        store: Arc<dyn IdempotencyStore>,
        policy: Box<dyn FinalizationPolicy>,
        submitter: Arc<dyn TransactionSubmitter>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let (_, shutdown) = watch::channel(false);
        Self {
            config,
            store,
            policy,
            submitter,
            tasks: HashMap::new(),
            events,
            shutdown,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Current state of `task_id`. Pruned tasks read as `Open`.
    pub fn task_state(&self, task_id: TaskId) -> TaskState {
        self.tasks
            .get(&task_id)
            .map(|t| t.state.clone())
            .unwrap_or(TaskState::Open)
    }

    /// Number of tasks still collecting responses.
    pub fn open_tasks(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| matches!(t.state, TaskState::Collecting(_)))
            .count()
    }

    /// Return entries left unacknowledged by a previous run to the queue.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let moved = self
            .store
            .requeue(&self.config.keys.processing(), &self.config.keys.queue())
            .await?;
        if moved > 0 {
            info!(moved, "requeued unacknowledged submissions");
        }
        Ok(moved)
    }

    /// Handle at most one queued entry, then expire and prune tasks.
    /// Returns whether an entry was handled.
    pub async fn process_next(&mut self) -> Result<bool, StoreError> {
        let entry = self
            .store
            .dequeue(
                &self.config.keys.queue(),
                &self.config.keys.processing(),
                self.config.poll_interval,
            )
            .await?;

        let handled = match entry {
            Some(entry) => {
                self.handle_entry(entry).await;
                true
            }
            None => false,
        };

        let now = Instant::now();
        self.expire_overdue(now).await;
        self.prune_terminal(now);
        Ok(handled)
    }

    /// Run until `shutdown` reads `true`.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        self.shutdown = shutdown;
        info!(policy = %self.policy.describe(), "finalization monitor starting");

        let mut failures = 0u32;
        while !self.shutdown_requested() {
            match self.process_next().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.backoff(failures);
                    warn!(error = %e, attempt = failures, "queue read failed, backing off");
                    time::sleep(delay).await;
                }
            }
        }

        info!(open_tasks = self.open_tasks(), "finalization monitor stopped");
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn handle_entry(&mut self, entry: Vec<u8>) {
        let submission: AcceptedSubmission = match serde_json::from_slice(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, len = entry.len(), "dropping undecodable queue entry");
                self.ack(&entry).await;
                return;
            }
        };
        let task_id = submission.task_id;

        if !self.tasks.contains_key(&task_id) {
            let state = match self.store.exists(&self.config.keys.finished(task_id)).await {
                Ok(true) => TaskState::Finalized,
                Ok(false) => TaskState::Collecting(Tally::new()),
                Err(e) => {
                    // The flag claim in `finalize` still guards submission.
                    warn!(task_id, error = %e, "could not read finished flag");
                    TaskState::Collecting(Tally::new())
                }
            };
            let now = Instant::now();
            let closed_at = state.is_terminal().then_some(now);
            self.tasks.insert(
                task_id,
                TrackedTask {
                    state,
                    first_seen: now,
                    entries: Vec::new(),
                    closed_at,
                },
            );
        }

        let operator = submission.operator;
        let counted = match self.tasks.get_mut(&task_id) {
            Some(TrackedTask {
                state: TaskState::Collecting(tally),
                entries,
                ..
            }) => {
                if tally.record(operator.clone(), submission.result) {
                    debug!(
                        task_id,
                        operator = %operator,
                        result = submission.result,
                        responses = tally.response_count(),
                        "response counted"
                    );
                    entries.push(entry);
                    Ok(self.policy.evaluate(task_id, tally))
                } else {
                    debug!(task_id, operator = %operator, "discarding duplicate delivery");
                    Err(entry)
                }
            }
            _ => {
                debug!(task_id, operator = %operator, "discarding entry for closed task");
                Err(entry)
            }
        };

        match counted {
            Ok(Some(result)) => self.finalize(task_id, result).await,
            Ok(None) => {}
            Err(entry) => self.ack(&entry).await,
        }
    }

    async fn finalize(&mut self, task_id: TaskId, result: TaskResult) {
        let Some(newly_set) = self.mark_finished(task_id).await else {
            return;
        };

        if !newly_set {
            info!(task_id, "task already finalized elsewhere, not submitting");
            self.close(task_id, TaskState::Finalized).await;
            self.publish(MonitorEvent::AlreadyFinalized { task_id });
            return;
        }

        let outcome = self.submit_with_retry(task_id, &result).await;
        self.close(task_id, TaskState::Finalized).await;
        match outcome {
            Ok(receipt) => {
                info!(
                    task_id,
                    value = result.value,
                    agreeing = result.agreeing,
                    tx = %receipt.tx_hash,
                    "task finalized"
                );
                self.publish(MonitorEvent::Finalized {
                    task_id,
                    result,
                    receipt,
                });
            }
            Err(error) => {
                error!(task_id, error = %error, "task finalized but result was not submitted");
                self.publish(MonitorEvent::SubmissionFailed {
                    task_id,
                    result,
                    error,
                });
            }
        }
    }

    /// Claim the finished flag, retrying store errors until it succeeds.
    /// `None` means shutdown was requested before the flag could be set.
    async fn mark_finished(&self, task_id: TaskId) -> Option<bool> {
        let key = self.config.keys.finished(task_id);
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            match self.store.set_flag(&key).await {
                Ok(newly_set) => return Some(newly_set),
                Err(e) => {
                    warn!(task_id, attempt, error = %e, "failed to set finished flag");
                }
            }
            if self.shutdown_requested() {
                warn!(task_id, "shutdown before finished flag was set");
                return None;
            }
            time::sleep(self.config.backoff(attempt)).await;
        }
    }

    async fn submit_with_retry(
        &self,
        task_id: TaskId,
        result: &TaskResult,
    ) -> Result<TxReceipt, SubmitError> {
        let max = self.config.max_submit_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.submitter.submit_finalized(task_id, result).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_transient() && attempt < max => {
                    warn!(task_id, attempt, error = %e, "submit failed, retrying");
                    time::sleep(self.config.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn expire_overdue(&mut self, now: Instant) {
        let Some(deadline) = self.config.task_deadline else {
            return;
        };
        let overdue: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, t)| {
                matches!(t.state, TaskState::Collecting(_)) && now >= t.first_seen + deadline
            })
            .map(|(&id, _)| id)
            .collect();

        for task_id in overdue {
            let responses = match self.tasks.get(&task_id).map(|t| &t.state) {
                Some(TaskState::Collecting(tally)) => tally.response_count(),
                _ => continue,
            };
            match self.mark_finished(task_id).await {
                None => return,
                Some(false) => {
                    info!(task_id, "overdue task already finalized elsewhere");
                    self.close(task_id, TaskState::Finalized).await;
                    self.publish(MonitorEvent::AlreadyFinalized { task_id });
                }
                Some(true) => {
                    info!(task_id, responses, "task expired before finalization");
                    self.close(task_id, TaskState::Expired).await;
                    self.publish(MonitorEvent::Expired { task_id, responses });
                }
            }
        }
    }

    fn prune_terminal(&mut self, now: Instant) {
        let retention = self.config.terminal_retention;
        self.tasks.retain(|_, t| match t.closed_at {
            Some(closed) => now < closed + retention,
            None => true,
        });
    }

    /// Move a task to a terminal state and acknowledge its entries.
    async fn close(&mut self, task_id: TaskId, state: TaskState) {
        let entries = match self.tasks.get_mut(&task_id) {
            Some(task) => {
                task.state = state;
                task.closed_at = Some(Instant::now());
                std::mem::take(&mut task.entries)
            }
            None => return,
        };
        for entry in &entries {
            self.ack(entry).await;
        }
    }

    async fn ack(&self, entry: &[u8]) {
        if let Err(e) = self.store.ack(&self.config.keys.processing(), entry).await {
            // Left in the processing list; redelivered after the next restart.
            warn!(error = %e, "failed to acknowledge queue entry");
        }
    }

    fn publish(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = MonitorConfig {
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_millis(1000),
            ..MonitorConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
        assert_eq!(config.backoff(5), Duration::from_millis(1000));
        assert_eq!(config.backoff(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Open.is_terminal());
        assert!(!TaskState::Collecting(Tally::new()).is_terminal());
        assert!(TaskState::Finalized.is_terminal());
        assert!(TaskState::Expired.is_terminal());
    }
}
