//! Submission handler: validates, deduplicates, and queues operator results.
//!
//! Checks run in a fixed order and stop at the first failure. The cheap local
//! checks (shape, freshness, key, signature) come first; only then is the
//! shared store consulted. The per-operator dedup entry and the queued
//! submission are written by one atomic admit, so a store failure leaves
//! neither behind and the operator may retry.

use std::sync::Arc;

use serde_json::Value;
use tally_core::{AcceptedSubmission, OperatorAddress, TaskId, TaskSubmission};
use tally_crypto::{canonical_message, recover_address, verify, CryptoError};
use tally_store::{IdempotencyStore, StoreError, StoreKeys};
use tracing::{debug, info, warn};

use crate::authorizer::OperatorAuthorizer;
use crate::freshness::{Freshness, DEFAULT_FRESHNESS_WINDOW_SECS};
use crate::{unix_now, Rejection, RejectionClass};

/// Immutable configuration for a [`SubmissionHandler`].
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Network identifier bound into every signed message.
    pub network_id: String,
    /// Maximum accepted age of a submission timestamp, in seconds.
    pub freshness_window_secs: u64,
    pub keys: StoreKeys,
}

impl IngestConfig {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            keys: StoreKeys::default(),
        }
    }
}

/// A submission that passed every check and was queued for aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub task_id: TaskId,
    pub operator: OperatorAddress,
}

/// Parse an inbound request body into a [`TaskSubmission`].
pub fn parse_submission(params: Value) -> Result<TaskSubmission, Rejection> {
    serde_json::from_value(params).map_err(|e| Rejection::Param(e.to_string()))
}

/// Handles inbound submissions. Cheap to share: hold it in an `Arc` and call
/// [`submit`](SubmissionHandler::submit) concurrently from every request task.
pub struct SubmissionHandler {
    config: IngestConfig,
    store: Arc<dyn IdempotencyStore>,
    authorizer: Arc<dyn OperatorAuthorizer>,
}

impl SubmissionHandler {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn IdempotencyStore>,
        authorizer: Arc<dyn OperatorAuthorizer>,
    ) -> Self {
        Self {
            config,
            store,
            authorizer,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Parse a raw request body and submit it.
    pub async fn submit_value(&self, params: Value) -> Result<Accepted, Rejection> {
        let submission = parse_submission(params).inspect_err(|e| log_rejection(None, e))?;
        self.submit(submission).await
    }

    /// Validate and queue a submission against the current clock.
    pub async fn submit(&self, submission: TaskSubmission) -> Result<Accepted, Rejection> {
        self.submit_at(submission, unix_now()).await
    }

    /// Validate and queue a submission as of `now` (unix seconds).
    pub async fn submit_at(
        &self,
        submission: TaskSubmission,
        now: i64,
    ) -> Result<Accepted, Rejection> {
        let outcome = self.process(&submission, now).await;
        match &outcome {
            Ok(accepted) => info!(
                task_id = accepted.task_id,
                operator = %accepted.operator,
                result = submission.result,
                "submission accepted"
            ),
            Err(rejection) => log_rejection(Some(submission.task_id), rejection),
        }
        outcome
    }

    async fn process(&self, submission: &TaskSubmission, now: i64) -> Result<Accepted, Rejection> {
        let task_id = submission.task_id;

        // 1. Structure
        validate_structure(submission)?;

        // 2. Freshness
        let window = self.config.freshness_window_secs;
        let freshness = Freshness::check(submission.timestamp, now, window);
        if !freshness.is_fresh() {
            debug!(
                task_id,
                timestamp = submission.timestamp,
                now,
                branch = freshness.as_str(),
                "timestamp outside freshness window"
            );
            return Err(Rejection::Timestamp {
                timestamp: submission.timestamp,
                earliest: now.saturating_sub(i64::try_from(window).unwrap_or(i64::MAX)),
                latest: now,
            });
        }

        // 3. Address recovery
        let operator = recover_address(&submission.public_key)
            .map_err(|e| Rejection::PubKeyToAddr(e.to_string()))?;

        // 4. Signature over the canonical message
        let message = canonical_message(
            &self.config.network_id,
            submission.timestamp,
            task_id,
            submission.result,
        );
        match verify(&submission.public_key, message.as_bytes(), &submission.signature) {
            Ok(true) => {}
            Ok(false) => return Err(Rejection::Signature),
            Err(CryptoError::MalformedKey(e)) => return Err(Rejection::PubKeyToAddr(e)),
            Err(CryptoError::MalformedSignature(e)) => {
                debug!(task_id, operator = %operator, error = %e, "undecodable signature");
                return Err(Rejection::Signature);
            }
        }

        let accepted = AcceptedSubmission {
            task_id,
            operator: operator.clone(),
            result: submission.result,
            timestamp: submission.timestamp,
        };
        let payload = serde_json::to_vec(&accepted)
            .map_err(|e| StoreError::Backend(format!("unserializable submission: {e}")))?;

        // 5. Task still open
        if self.store.exists(&self.config.keys.finished(task_id)).await? {
            return Err(Rejection::Finished(task_id));
        }

        // 6. Registered operator
        if !self.authorizer.is_authorized(&operator).await? {
            return Err(Rejection::Operator(operator));
        }

        // 7. At most once per (task, operator), 8. queued for the monitor
        let already = self
            .store
            .admit(
                &self.config.keys.operators(task_id),
                operator.as_str(),
                &self.config.keys.queue(),
                &payload,
            )
            .await?;
        if already {
            return Err(Rejection::AlreadySubmitted { task_id, operator });
        }

        Ok(Accepted { task_id, operator })
    }
}

fn validate_structure(submission: &TaskSubmission) -> Result<(), Rejection> {
    if submission.signature.trim().is_empty() {
        return Err(Rejection::Param("signature is empty".into()));
    }
    if submission.public_key.trim().is_empty() {
        return Err(Rejection::Param("publicKey is empty".into()));
    }
    Ok(())
}

fn log_rejection(task_id: Option<TaskId>, rejection: &Rejection) {
    let code = rejection.status_code().code();
    match rejection.class() {
        RejectionClass::ClientInput | RejectionClass::BusinessRule => {
            debug!(task_id, code, reason = %rejection, "submission refused")
        }
        RejectionClass::Internal => warn!(task_id, code, error = %rejection, "submission failed"),
    }
}
