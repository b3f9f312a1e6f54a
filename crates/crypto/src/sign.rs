use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use sha2::{Digest, Sha256};
use tally_core::{OperatorAddress, TaskId, ADDRESS_LEN};

use crate::{decode_hex, CryptoError};

/// Build the message an operator signs for a submission.
///
/// Format: `{network}-{timestamp}-{task_id}-{result}`, all decimal, no padding.
pub fn canonical_message(network: &str, timestamp: i64, task_id: TaskId, result: i64) -> String {
    format!("{network}-{timestamp}-{task_id}-{result}")
}

/// Decode a hex-encoded Ed25519 public key.
fn parse_public_key(public_key: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = decode_hex(public_key).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        CryptoError::MalformedKey(format!(
            "expected {PUBLIC_KEY_LENGTH} bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::MalformedKey(e.to_string()))
}

/// Derive the operator address for a raw 32-byte public key.
pub fn address_from_key_bytes(pubkey: &[u8; PUBLIC_KEY_LENGTH]) -> OperatorAddress {
    let digest = Sha256::digest(pubkey);
    let mut body = [0u8; ADDRESS_LEN];
    body.copy_from_slice(&digest[digest.len() - ADDRESS_LEN..]);
    OperatorAddress::from_bytes(&body)
}

/// Recover the operator address from a hex-encoded public key.
///
/// The address is the last 20 bytes of SHA-256 over the key bytes.
pub fn recover_address(public_key: &str) -> Result<OperatorAddress, CryptoError> {
    let key = parse_public_key(public_key)?;
    Ok(address_from_key_bytes(key.as_bytes()))
}

/// Verify a hex-encoded signature over `message` by the hex-encoded `public_key`.
///
/// Returns `Ok(false)` when the signature does not verify; errors are reserved
/// for inputs that cannot be decoded.
pub fn verify(public_key: &str, message: &[u8], signature: &str) -> Result<bool, CryptoError> {
    let key = parse_public_key(public_key)?;

    let sig_bytes =
        decode_hex(signature).map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let sig_bytes: [u8; SIGNATURE_LENGTH] = sig_bytes.as_slice().try_into().map_err(|_| {
        CryptoError::MalformedSignature(format!(
            "expected {SIGNATURE_LENGTH} bytes, got {}",
            sig_bytes.len()
        ))
    })?;
    let signature = Signature::from_bytes(&sig_bytes);

    Ok(key.verify_strict(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::OperatorKeypair;

    const NET: &str = "tally-test";

    #[test]
    fn test_canonical_message_format() {
        assert_eq!(canonical_message("net", 1700000000, 10, 100), "net-1700000000-10-100");
        assert_eq!(canonical_message("net", 5, 0, -42), "net-5-0--42");
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = OperatorKeypair::generate();
        let message = canonical_message(NET, 1700000000, 10, 100);
        let signature = keypair.sign_hex(message.as_bytes());

        assert_eq!(
            verify(&keypair.public_key_hex(), message.as_bytes(), &signature),
            Ok(true)
        );
    }

    #[test]
    fn test_tampered_result_fails() {
        let keypair = OperatorKeypair::generate();
        let message = canonical_message(NET, 1700000000, 10, 100);
        let signature = keypair.sign_hex(message.as_bytes());

        let tampered = canonical_message(NET, 1700000000, 10, 101);
        assert_eq!(
            verify(&keypair.public_key_hex(), tampered.as_bytes(), &signature),
            Ok(false)
        );
    }

    #[test]
    fn test_wrong_pubkey_fails() {
        let keypair1 = OperatorKeypair::generate();
        let keypair2 = OperatorKeypair::generate();
        let message = canonical_message(NET, 1, 2, 3);
        let signature = keypair1.sign_hex(message.as_bytes());

        assert_eq!(
            verify(&keypair2.public_key_hex(), message.as_bytes(), &signature),
            Ok(false)
        );
    }

    #[test]
    fn test_recover_address_is_deterministic() {
        let keypair = OperatorKeypair::generate();
        let a = recover_address(&keypair.public_key_hex()).unwrap();
        let b = recover_address(&format!("0x{}", keypair.public_key_hex())).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, keypair.address());
        assert_eq!(a.as_str().len(), 42);
    }

    #[test]
    fn test_distinct_keys_distinct_addresses() {
        let a = OperatorKeypair::generate().address();
        let b = OperatorKeypair::generate().address();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_key() {
        assert!(matches!(recover_address("zz"), Err(CryptoError::MalformedKey(_))));
        assert!(matches!(recover_address("abcd"), Err(CryptoError::MalformedKey(_))));
        assert!(matches!(
            verify("abcd", b"m", &"00".repeat(64)),
            Err(CryptoError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_malformed_signature() {
        let keypair = OperatorKeypair::generate();
        assert!(matches!(
            verify(&keypair.public_key_hex(), b"m", "not-hex"),
            Err(CryptoError::MalformedSignature(_))
        ));
        assert!(matches!(
            verify(&keypair.public_key_hex(), b"m", "abcd"),
            Err(CryptoError::MalformedSignature(_))
        ));
    }
}
