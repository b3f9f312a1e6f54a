//! JSON-RPC methods served by `tallyd`.

use std::sync::Arc;

use serde_json::Value;
use tally_aggregator::SubmissionHandler;
use tally_core::{StatusCode, StatusResponse};
use tally_ipc::{HandlerFuture, IpcHandler, RpcError};

use crate::ctl::DaemonStatus;

/// Routes IPC methods to the submission handler.
pub struct TallyRpc {
    submissions: Arc<SubmissionHandler>,
}

impl TallyRpc {
    pub fn new(submissions: Arc<SubmissionHandler>) -> Self {
        Self { submissions }
    }

    /// `submit_result`: always answers with a status object, never an RPC error.
    pub async fn submit_result(&self, params: Option<Value>) -> StatusResponse {
        let Some(params) = params else {
            return StatusResponse::error(StatusCode::ErrParam, "missing params");
        };
        match self.submissions.submit_value(params).await {
            Ok(_) => StatusResponse::success(),
            Err(rejection) => rejection.to_response(),
        }
    }

    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            network_id: self.submissions.config().network_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl IpcHandler for TallyRpc {
    fn handle(&self, method: &str, params: Option<Value>) -> HandlerFuture<'_> {
        let method = method.to_string();
        Box::pin(async move {
            match method.as_str() {
                "submit_result" => {
                    let status = self.submit_result(params).await;
                    serde_json::to_value(status).map_err(|e| RpcError::server_error(e.to_string()))
                }
                "status" => serde_json::to_value(self.status())
                    .map_err(|e| RpcError::server_error(e.to_string())),
                other => Err(RpcError::method_not_found(other)),
            }
        })
    }
}
