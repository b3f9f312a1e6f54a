//! Tally Core
//!
//! Types shared by the ingestion and finalization halves of the aggregator:
//! operator submissions, derived operator addresses, finalized aggregates and
//! the numeric status codes returned to operators.

pub mod status;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use status::{StatusCode, StatusResponse};

/// On-chain task identifier.
pub type TaskId = u64;

const ADDRESS_PREFIX: &str = "0x";

/// Length of an address body in bytes (20 bytes, 40 hex characters).
pub const ADDRESS_LEN: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with '0x'")]
    MissingPrefix,
    #[error("invalid address length: expected 40 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("address contains non-hex or uppercase characters")]
    InvalidCharacters,
}

/// Wallet address of an operator, derived from its public key.
///
/// Format: `0x` followed by 40 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperatorAddress(String);

impl OperatorAddress {
    /// Build an address from its 20 raw bytes.
    pub fn from_bytes(bytes: &[u8; ADDRESS_LEN]) -> Self {
        Self(format!("{ADDRESS_PREFIX}{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OperatorAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or(AddressError::MissingPrefix)?;
        if body.len() != ADDRESS_LEN * 2 {
            return Err(AddressError::InvalidLength(body.len()));
        }
        if !body.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(AddressError::InvalidCharacters);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for OperatorAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperatorAddress> for String {
    fn from(address: OperatorAddress) -> Self {
        address.0
    }
}

/// One operator's structurally valid claim for one task.
///
/// `signature` and `public_key` are kept in their transport encoding; the
/// identity verifier decodes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub task_id: TaskId,
    pub result: i64,
    pub timestamp: i64,
    pub signature: String,
    pub public_key: String,
}

/// A submission that passed every ingestion check, as placed on the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedSubmission {
    pub task_id: TaskId,
    pub operator: OperatorAddress,
    pub result: i64,
    pub timestamp: i64,
}

/// A single operator's reported value inside a finalized aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorResponse {
    pub operator: OperatorAddress,
    pub result: i64,
}

/// The finalized aggregate for a task, handed to the transaction submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    /// The plurality value among the responses.
    pub value: i64,
    /// Number of operators that reported `value`.
    pub agreeing: usize,
    /// Every counted response, ordered by operator address.
    pub responses: Vec<OperatorResponse>,
}

/// Receipt returned by the transaction submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash or other backend identifier.
    pub tx_hash: String,
    pub confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_from_bytes_formats_lowercase_hex() {
        let addr = OperatorAddress::from_bytes(&[0xab; ADDRESS_LEN]);
        assert_eq!(addr.as_str(), format!("0x{}", "ab".repeat(20)));

        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[0] = 0x0f;
        bytes[ADDRESS_LEN - 1] = 0xf0;
        let addr = OperatorAddress::from_bytes(&bytes);
        assert_eq!(addr.as_str(), format!("0x0f{}f0", "00".repeat(18)));
        assert_eq!(addr.as_str().len(), 2 + ADDRESS_LEN * 2);
    }

    #[test]
    fn address_parse_roundtrip() {
        let addr = OperatorAddress::from_bytes(&[7u8; ADDRESS_LEN]);
        let parsed: OperatorAddress = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn address_parse_rejects_bad_input() {
        assert_eq!(
            "ab".repeat(20).parse::<OperatorAddress>(),
            Err(AddressError::MissingPrefix)
        );
        assert_eq!(
            "0xabcd".parse::<OperatorAddress>(),
            Err(AddressError::InvalidLength(4))
        );
        assert_eq!(
            format!("0x{}", "AB".repeat(20)).parse::<OperatorAddress>(),
            Err(AddressError::InvalidCharacters)
        );
    }

    #[test]
    fn submission_uses_camel_case_fields() {
        let json = r#"{"taskId":10,"result":-5,"timestamp":1700000000,"signature":"aa","publicKey":"bb"}"#;
        let sub: TaskSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(sub.task_id, 10);
        assert_eq!(sub.result, -5);
        assert_eq!(sub.public_key, "bb");
    }

    #[test]
    fn accepted_submission_rejects_malformed_operator() {
        let json = r#"{"taskId":1,"operator":"nope","result":1,"timestamp":1}"#;
        assert!(serde_json::from_str::<AcceptedSubmission>(json).is_err());
    }
}
