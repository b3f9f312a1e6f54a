//! Tally Aggregator
//!
//! Accepts signed task results from operators, admits each operator at most
//! once per task through the shared store, and drains the accepted results in
//! a background monitor that finalizes each task exactly once and hands the
//! aggregate to a transaction submitter.

pub mod authorizer;
pub mod freshness;
pub mod ingest;
pub mod monitor;
pub mod policy;
pub mod submitter;

pub use authorizer::{AuthorizerError, OperatorAuthorizer, StaticAllowlist};
pub use freshness::{Freshness, DEFAULT_FRESHNESS_WINDOW_SECS};
pub use ingest::{Accepted, IngestConfig, SubmissionHandler};
pub use monitor::{Monitor, MonitorConfig, MonitorEvent, TaskState};
pub use policy::{
    AllResponses, FinalizationPolicy, PolicyConfig, PolicyError, StrictMajority, Tally, Threshold,
};
pub use submitter::{DryRunSubmitter, SubmitError, TransactionSubmitter};

use std::time::{SystemTime, UNIX_EPOCH};

use tally_core::{OperatorAddress, StatusCode, StatusResponse, TaskId};
use tally_store::StoreError;
use thiserror::Error;

/// Why a submission was not accepted.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("invalid parameter: {0}")]
    Param(String),
    #[error("timestamp {timestamp} outside accepted window [{earliest}, {latest}]")]
    Timestamp {
        timestamp: i64,
        earliest: i64,
        latest: i64,
    },
    #[error("cannot derive operator address from public key: {0}")]
    PubKeyToAddr(String),
    #[error("signature verification failed")]
    Signature,
    #[error("task {0} is already finished")]
    Finished(TaskId),
    #[error("{0} is not a registered operator")]
    Operator(OperatorAddress),
    #[error("operator {operator} already submitted a result for task {task_id}")]
    AlreadySubmitted {
        task_id: TaskId,
        operator: OperatorAddress,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("operator authorizer error: {0}")]
    Authorizer(#[from] AuthorizerError),
}

/// Coarse classes of rejection, deciding how they are logged and whether a
/// client may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionClass {
    /// Malformed, stale or forged input. Never retried by the system.
    ClientInput,
    /// Expected steady-state refusals (finished task, unknown or repeat operator).
    BusinessRule,
    /// Store or collaborator unreachable. Safe for the client to retry.
    Internal,
}

impl Rejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Param(_) => StatusCode::ErrParam,
            Self::Timestamp { .. } => StatusCode::ErrTimestamp,
            Self::PubKeyToAddr(_) => StatusCode::ErrPubKeyToAddr,
            Self::Signature => StatusCode::ErrSignature,
            Self::Finished(_) => StatusCode::ErrFinished,
            Self::Operator(_) => StatusCode::ErrOperator,
            Self::AlreadySubmitted { .. } => StatusCode::ErrAlreadySubmitted,
            Self::Store(_) => StatusCode::ErrStore,
            Self::Authorizer(_) => StatusCode::ErrAuthorizer,
        }
    }

    pub fn class(&self) -> RejectionClass {
        match self {
            Self::Param(_) | Self::Timestamp { .. } | Self::PubKeyToAddr(_) | Self::Signature => {
                RejectionClass::ClientInput
            }
            Self::Finished(_) | Self::Operator(_) | Self::AlreadySubmitted { .. } => {
                RejectionClass::BusinessRule
            }
            Self::Store(_) | Self::Authorizer(_) => RejectionClass::Internal,
        }
    }

    pub fn to_response(&self) -> StatusResponse {
        StatusResponse::error(self.status_code(), self.to_string())
    }
}

/// Current unix timestamp in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
