//! Numeric status codes returned to submitting operators.
//!
//! `0` is success. Parameter errors live in `10xxx`, business-rule rejections
//! in `20xxx` and internal errors in `50xxx`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum StatusCode {
    Success = 0,
    ErrParam = 10001,
    ErrTimestamp = 10002,
    ErrPubKeyToAddr = 10003,
    ErrSignature = 10004,
    ErrFinished = 20001,
    ErrOperator = 20002,
    ErrAlreadySubmitted = 20003,
    ErrStore = 50001,
    ErrAuthorizer = 50002,
}

impl StatusCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            10001 => Some(Self::ErrParam),
            10002 => Some(Self::ErrTimestamp),
            10003 => Some(Self::ErrPubKeyToAddr),
            10004 => Some(Self::ErrSignature),
            20001 => Some(Self::ErrFinished),
            20002 => Some(Self::ErrOperator),
            20003 => Some(Self::ErrAlreadySubmitted),
            50001 => Some(Self::ErrStore),
            50002 => Some(Self::ErrAuthorizer),
            _ => None,
        }
    }

    /// Whether a client may retry the same submission later.
    pub fn is_retryable(self) -> bool {
        self.code() >= 50000
    }
}

/// Structured status object answered for every inbound submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub code: u32,
    pub message: String,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success.code(),
            message: "success".to_string(),
        }
    }

    pub fn error(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_from_u32() {
        for code in [
            StatusCode::Success,
            StatusCode::ErrParam,
            StatusCode::ErrTimestamp,
            StatusCode::ErrPubKeyToAddr,
            StatusCode::ErrSignature,
            StatusCode::ErrFinished,
            StatusCode::ErrOperator,
            StatusCode::ErrAlreadySubmitted,
            StatusCode::ErrStore,
            StatusCode::ErrAuthorizer,
        ] {
            assert_eq!(StatusCode::from_u32(code.code()), Some(code));
        }
        assert_eq!(StatusCode::from_u32(42), None);
    }

    #[test]
    fn test_only_internal_errors_are_retryable() {
        assert!(StatusCode::ErrStore.is_retryable());
        assert!(StatusCode::ErrAuthorizer.is_retryable());
        assert!(!StatusCode::ErrAlreadySubmitted.is_retryable());
        assert!(!StatusCode::ErrTimestamp.is_retryable());
    }

    #[test]
    fn test_status_response_serde() {
        let resp = StatusResponse::error(StatusCode::ErrFinished, "task finished");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"code":20001,"message":"task finished"}"#);
        assert!(StatusResponse::success().is_success());
    }
}
