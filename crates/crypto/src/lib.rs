//! Tally Crypto
//!
//! Operator identity primitives: deriving an operator address from an Ed25519
//! public key, building the canonical submission message, and verifying the
//! operator's signature over it.

pub mod keys;
pub mod sign;

pub use keys::OperatorKeypair;
pub use sign::{canonical_message, recover_address, verify};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
}

/// Decode a hex string, tolerating an optional `0x` prefix.
pub(crate) fn decode_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(trimmed)
}
