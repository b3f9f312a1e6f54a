use ed25519_dalek::{Signature, Signer, SigningKey};
use rand::rngs::OsRng;
use tally_core::{OperatorAddress, TaskId};

use crate::sign::{address_from_key_bytes, canonical_message};
use crate::{decode_hex, CryptoError};

/// An operator's Ed25519 signing key.
pub struct OperatorKeypair {
    pub signing_key: SigningKey,
}

impl OperatorKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore a keypair from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    /// Restore a keypair from a hex-encoded 32-byte secret, `0x` optional.
    pub fn from_secret_hex(secret: &str) -> Result<Self, CryptoError> {
        let bytes = decode_hex(secret).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::MalformedKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Public key in the hex transport encoding used by submissions.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    pub fn address(&self) -> OperatorAddress {
        address_from_key_bytes(&self.public_key_bytes())
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_bytes()
    }

    pub fn sign_hex(&self, data: &[u8]) -> String {
        hex::encode(self.sign(data))
    }

    /// Sign the canonical message for a task result, hex-encoded.
    pub fn sign_submission(&self, network: &str, timestamp: i64, task_id: TaskId, result: i64) -> String {
        let message = canonical_message(network, timestamp, task_id, result);
        self.sign_hex(message.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify;

    #[test]
    fn secret_roundtrip() {
        let keypair = OperatorKeypair::generate();
        let restored = OperatorKeypair::from_secret_bytes(&keypair.secret_key_bytes());
        assert_eq!(restored.public_key_bytes(), keypair.public_key_bytes());
        assert_eq!(restored.address(), keypair.address());
    }

    #[test]
    fn secret_hex_roundtrip() {
        let keypair = OperatorKeypair::generate();
        let hex = keypair.secret_key_hex();
        let restored = OperatorKeypair::from_secret_hex(&hex).unwrap();
        assert_eq!(restored.address(), keypair.address());
        let prefixed = OperatorKeypair::from_secret_hex(&format!("0x{hex}")).unwrap();
        assert_eq!(prefixed.address(), keypair.address());

        assert!(matches!(
            OperatorKeypair::from_secret_hex("abcd"),
            Err(CryptoError::MalformedKey(_))
        ));
        assert!(OperatorKeypair::from_secret_hex("zz").is_err());
    }

    #[test]
    fn sign_submission_verifies() {
        let keypair = OperatorKeypair::generate();
        let sig = keypair.sign_submission("net", 100, 7, -3);
        let message = canonical_message("net", 100, 7, -3);
        assert_eq!(verify(&keypair.public_key_hex(), message.as_bytes(), &sig), Ok(true));
    }
}
