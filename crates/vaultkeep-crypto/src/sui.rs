//! Sui signing conventions.
//!
//! ```text
//! intent_digest = BLAKE2b-256([scope=0, version=0, app=0] || tx_bytes)
//! serialized    = base64(flag || signature || public_key)
//! address       = "0x" || hex(BLAKE2b-256(flag || public_key))
//! ```

use base64::Engine;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::{PublicKey, Result, Signer};

/// Scheme flag for Ed25519 keys and signatures.
pub const ED25519_FLAG: u8 = 0x00;

/// Intent prefix for transaction data: scope TransactionData, version V0,
/// app id Sui.
pub const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

type Blake2b256 = Blake2b<U32>;

/// Digest that is actually signed for a transaction.
pub fn transaction_intent_digest(tx_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(TRANSACTION_INTENT);
    hasher.update(tx_bytes);
    hasher.finalize().into()
}

/// Sign BCS transaction bytes and return the serialized signature expected
/// by `sui_executeTransactionBlock`.
pub fn sign_transaction<S: Signer + ?Sized>(signer: &S, tx_bytes: &[u8]) -> Result<String> {
    let digest = transaction_intent_digest(tx_bytes);
    let signature = signer.sign(&digest)?;
    let public_key = signer.public_key();

    let mut serialized = Vec::with_capacity(1 + signature.as_bytes().len() + public_key.as_bytes().len());
    serialized.push(public_key.flag());
    serialized.extend_from_slice(signature.as_bytes());
    serialized.extend_from_slice(public_key.as_bytes());

    Ok(base64::engine::general_purpose::STANDARD.encode(serialized))
}

/// Address controlled by `public_key`.
pub fn address(public_key: &PublicKey) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update([public_key.flag()]);
    hasher.update(public_key.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    format!("0x{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ed25519Signer, Signature};

    #[test]
    fn test_serialized_signature_layout() {
        let signer = Ed25519Signer::generate();
        let encoded = sign_transaction(&signer, b"tx-bytes").expect("sign");
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .expect("base64");

        assert_eq!(raw.len(), 1 + 64 + 32);
        assert_eq!(raw[0], ED25519_FLAG);
        assert_eq!(&raw[65..], signer.public_key().as_bytes());

        let mut sig = [0u8; 64];
        sig.copy_from_slice(&raw[1..65]);
        let digest = transaction_intent_digest(b"tx-bytes");
        signer
            .verify(&digest, &Signature::Ed25519(sig))
            .expect("signature over intent digest");
    }

    #[test]
    fn test_intent_digest_depends_on_prefix() {
        let plain: [u8; 32] = Blake2b256::digest(b"abc").into();
        assert_ne!(transaction_intent_digest(b"abc"), plain);
    }

    #[test]
    fn test_address_shape_and_determinism() {
        let signer = Ed25519Signer::from_bytes(&[42u8; 32]);
        let a = address(&signer.public_key());
        let b = address(&signer.public_key());
        assert_eq!(a, b);
        assert_eq!(a.len(), 66);
        assert!(a.starts_with("0x"));

        let other = Ed25519Signer::from_bytes(&[43u8; 32]);
        assert_ne!(a, address(&other.public_key()));
    }
}
