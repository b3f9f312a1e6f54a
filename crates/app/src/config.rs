//! `tallyd` configuration file.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_aggregator::{
    FinalizationPolicy, IngestConfig, MonitorConfig, PolicyConfig, StaticAllowlist,
    DEFAULT_FRESHNESS_WINDOW_SECS,
};
use tally_core::OperatorAddress;
use tally_store::StoreKeys;

use crate::AppError;

/// Settings persisted as `settings.json`. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallySettings {
    /// Bound into every signed submission message.
    pub network_id: String,
    /// Redis connection URL. The in-memory store is used when unset.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub freshness_window_secs: u64,
    pub policy: PolicyConfig,
    pub task_deadline_secs: Option<u64>,
    pub poll_interval_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub max_submit_attempts: u32,
    /// Registered operator addresses.
    pub operators: Vec<String>,
    pub socket_path: Option<String>,
}

impl Default for TallySettings {
    fn default() -> Self {
        Self {
            network_id: "tally-devnet".to_string(),
            redis_url: None,
            key_prefix: "tally".to_string(),
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            policy: PolicyConfig::default(),
            task_deadline_secs: None,
            poll_interval_ms: 1000,
            retry_base_ms: 200,
            retry_max_ms: 10_000,
            max_submit_attempts: 5,
            operators: Vec::new(),
            socket_path: None,
        }
    }
}

impl TallySettings {
    pub fn store_keys(&self) -> StoreKeys {
        StoreKeys::new(self.key_prefix.clone())
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            network_id: self.network_id.clone(),
            freshness_window_secs: self.freshness_window_secs,
            keys: self.store_keys(),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            keys: self.store_keys(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            task_deadline: self.task_deadline_secs.map(Duration::from_secs),
            retry_base: Duration::from_millis(self.retry_base_ms),
            retry_max: Duration::from_millis(self.retry_max_ms),
            max_submit_attempts: self.max_submit_attempts,
            ..MonitorConfig::default()
        }
    }

    /// The configured finalization policy, rejecting zero counts.
    pub fn finalization_policy(&self) -> Result<Box<dyn FinalizationPolicy>, AppError> {
        self.policy
            .build()
            .map_err(|e| AppError::InitError(format!("policy: {e}")))
    }

    /// Parse the configured operator addresses into an allowlist.
    pub fn allowlist(&self) -> Result<StaticAllowlist, AppError> {
        let operators = self
            .operators
            .iter()
            .map(|raw| {
                OperatorAddress::from_str(raw)
                    .map_err(|e| AppError::InitError(format!("operator {raw}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StaticAllowlist::new(operators))
    }

    pub fn socket_path(&self, service: &str) -> String {
        self.socket_path
            .clone()
            .unwrap_or_else(|| tally_ipc::default_socket_path(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = TallySettings::default();
        assert_eq!(settings.freshness_window_secs, 120);
        assert_eq!(settings.policy, PolicyConfig::Threshold { threshold: 2 });
        assert!(settings.redis_url.is_none());

        let monitor = settings.monitor_config();
        assert_eq!(monitor.poll_interval, Duration::from_secs(1));
        assert_eq!(monitor.task_deadline, None);
        assert_eq!(monitor.max_submit_attempts, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{
            "network_id": "tally-mainnet",
            "key_prefix": "t1",
            "policy": {"kind": "all_responses", "expected": 3},
            "task_deadline_secs": 30
        }"#;
        let settings: TallySettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.network_id, "tally-mainnet");
        assert_eq!(settings.max_submit_attempts, 5);

        let ingest = settings.ingest_config();
        assert_eq!(ingest.network_id, "tally-mainnet");
        assert_eq!(ingest.keys.queue(), "t1:queue");
        assert_eq!(
            settings.monitor_config().task_deadline,
            Some(Duration::from_secs(30))
        );
        assert_eq!(settings.policy, PolicyConfig::AllResponses { expected: 3 });
    }

    #[test]
    fn test_allowlist_rejects_bad_address() {
        let mut settings = TallySettings {
            operators: vec![format!("0x{}", "ab".repeat(20))],
            ..TallySettings::default()
        };
        assert_eq!(settings.allowlist().unwrap().len(), 1);

        settings.operators.push("not-an-address".to_string());
        assert!(matches!(settings.allowlist(), Err(AppError::InitError(_))));
    }

    #[test]
    fn test_zero_policy_count_fails_init() {
        let json = r#"{"policy": {"kind": "strict_majority", "operator_count": 0}}"#;
        let settings: TallySettings = serde_json::from_str(json).unwrap();
        match settings.finalization_policy() {
            Err(AppError::InitError(msg)) => assert!(msg.contains("operator_count")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(policy) => panic!("accepted {}", policy.describe()),
        }

        let settings = TallySettings::default();
        assert_eq!(settings.finalization_policy().unwrap().describe(), "threshold(2)");
    }

    #[test]
    fn test_socket_path_override() {
        let settings = TallySettings {
            socket_path: Some("/tmp/custom.sock".to_string()),
            ..TallySettings::default()
        };
        assert_eq!(settings.socket_path("tallyd"), "/tmp/custom.sock");
    }
}
