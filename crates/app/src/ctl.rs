//! Client side of the `tallyd` socket, used by `tallyctl`.

use serde::{Deserialize, Serialize};
use tally_core::{StatusResponse, TaskId, TaskSubmission};
use tally_crypto::OperatorKeypair;
use tally_ipc::IpcClient;

use crate::AppError;

/// Result of the `status` method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub network_id: String,
    pub version: String,
}

/// Sign a result for `task_id` the way the daemon verifies it.
pub fn signed_submission(
    keypair: &OperatorKeypair,
    network: &str,
    task_id: TaskId,
    result: i64,
    timestamp: i64,
) -> TaskSubmission {
    TaskSubmission {
        task_id,
        result,
        timestamp,
        signature: keypair.sign_submission(network, timestamp, task_id, result),
        public_key: keypair.public_key_hex(),
    }
}

/// Typed calls against a running `tallyd`.
pub struct TallyClient {
    ipc: IpcClient,
}

impl TallyClient {
    pub fn new(socket_path: &str) -> Self {
        Self {
            ipc: IpcClient::new(socket_path),
        }
    }

    pub fn socket_path(&self) -> &str {
        self.ipc.socket_path()
    }

    /// Send one submission. Rejections come back as a non-zero status, not an error.
    pub async fn submit(&self, submission: &TaskSubmission) -> Result<StatusResponse, AppError> {
        let params = serde_json::to_value(submission)?;
        Ok(self.ipc.call_as("submit_result", Some(params)).await?)
    }

    pub async fn status(&self) -> Result<DaemonStatus, AppError> {
        Ok(self.ipc.call_as("status", None).await?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::rpc::TallyRpc;
    use tally_aggregator::{unix_now, IngestConfig, StaticAllowlist, SubmissionHandler};
    use tally_core::StatusCode;
    use tally_ipc::{IpcError, IpcServer};
    use tally_store::MemoryStore;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_submit_through_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tallyd.sock");
        let path = path.to_str().unwrap().to_string();

        let operator = OperatorKeypair::generate();
        let handler = SubmissionHandler::new(
            IngestConfig::new("tally-test"),
            Arc::new(MemoryStore::new()),
            Arc::new(StaticAllowlist::new([operator.address()])),
        );
        let server = Arc::new(IpcServer::new(&path));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let serving = {
            let server = server.clone();
            let rpc = Arc::new(TallyRpc::new(Arc::new(handler)));
            tokio::spawn(async move { server.run(rpc, shutdown_rx).await })
        };

        let client = TallyClient::new(&path);
        assert!(client.ipc.wait_until_running(Duration::from_secs(1)).await);

        let status = client.status().await.unwrap();
        assert_eq!(status.network_id, "tally-test");

        let submission = signed_submission(&operator, "tally-test", 10, 100, unix_now());
        assert!(client.submit(&submission).await.unwrap().is_success());
        let again = client.submit(&submission).await.unwrap();
        assert_eq!(again.code, StatusCode::ErrAlreadySubmitted.code());

        let wrong_network = signed_submission(&operator, "tally-other", 11, 100, unix_now());
        let rejected = client.submit(&wrong_network).await.unwrap();
        assert_eq!(rejected.code, StatusCode::ErrSignature.code());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_without_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let client = TallyClient::new(dir.path().join("absent.sock").to_str().unwrap());
        assert!(matches!(
            client.status().await,
            Err(AppError::IpcError(IpcError::NotRunning(_)))
        ));
    }
}
