//! Ed25519 signer (RFC 8032).
//!
//! Wraps `ed25519-dalek`. Secret bytes are zeroized when the signer is
//! dropped, and `Debug` only ever prints the public half.

use base64::Engine;
use ed25519_dalek::Signer as _;
use zeroize::Zeroize;

use crate::{sui, CryptoError, PublicKey, Result, Signature, Signer};

/// Ed25519 secret key length.
pub const SECRET_KEY_LEN: usize = 32;

/// The Ed25519 variant of the signing capability.
pub struct Ed25519Signer {
    inner: ed25519_dalek::SigningKey,
}

impl Drop for Ed25519Signer {
    fn drop(&mut self) {
        let mut bytes = self.inner.to_bytes();
        bytes.zeroize();
    }
}

impl Ed25519Signer {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a signer from raw secret bytes.
    pub fn from_bytes(bytes: &[u8; SECRET_KEY_LEN]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Load key material as handed over by an operator.
    ///
    /// Accepted encodings:
    /// - hex of the 32-byte secret, with or without `0x`
    /// - base64 of `flag || secret` (33 bytes, Sui keystore format)
    /// - base64 of the bare 32-byte secret
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);

        let mut raw = if hex_part.len() == SECRET_KEY_LEN * 2 {
            hex::decode(hex_part).map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(trimmed)
                .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?
        };

        let result = match raw.len() {
            SECRET_KEY_LEN => secret_array(&raw).map(|key| Self::from_bytes(&key)),
            len if len == SECRET_KEY_LEN + 1 => {
                if raw[0] != sui::ED25519_FLAG {
                    Err(CryptoError::UnsupportedScheme(raw[0]))
                } else {
                    secret_array(&raw[1..]).map(|key| Self::from_bytes(&key))
                }
            }
            actual => Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_LEN,
                actual,
            }),
        };

        raw.zeroize();
        result
    }

    /// Verify a signature produced by this key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let Signature::Ed25519(bytes) = signature;
        let sig = ed25519_dalek::Signature::from_bytes(bytes);
        self.inner
            .verifying_key()
            .verify_strict(message, &sig)
            .map_err(|_| CryptoError::SignatureVerification)
    }
}

/// Copy a secret slice into a fixed array.
fn secret_array(bytes: &[u8]) -> Result<[u8; SECRET_KEY_LEN]> {
    <[u8; SECRET_KEY_LEN]>::try_from(bytes).map_err(|_| CryptoError::InvalidKeyLength {
        expected: SECRET_KEY_LEN,
        actual: bytes.len(),
    })
}

impl Signer for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Result<Signature> {
        Ok(Signature::Ed25519(self.inner.sign(message).to_bytes()))
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::Ed25519(self.inner.verifying_key().to_bytes())
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public", &hex::encode(self.inner.verifying_key().as_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[test]
    fn test_sign_verify_roundtrip() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"compound").expect("sign");
        assert!(signer.verify(b"compound", &sig).is_ok());
        assert!(signer.verify(b"other", &sig).is_err());
    }

    #[test]
    fn test_rfc8032_public_key() {
        // RFC 8032 test vector 1.
        let signer = Ed25519Signer::from_encoded(SEED_HEX).expect("hex key");
        assert_eq!(
            hex::encode(signer.public_key().as_bytes()),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
    }

    #[test]
    fn test_hex_with_prefix() {
        let a = Ed25519Signer::from_encoded(SEED_HEX).expect("plain");
        let b = Ed25519Signer::from_encoded(&format!("0x{SEED_HEX}")).expect("prefixed");
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_keystore_base64() {
        let seed = hex::decode(SEED_HEX).expect("hex");
        let mut flagged = vec![sui::ED25519_FLAG];
        flagged.extend_from_slice(&seed);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&flagged);

        let from_keystore = Ed25519Signer::from_encoded(&encoded).expect("keystore");
        let from_hex = Ed25519Signer::from_encoded(SEED_HEX).expect("hex");
        assert_eq!(from_keystore.public_key(), from_hex.public_key());
    }

    #[test]
    fn test_rejects_other_scheme_flag() {
        let mut flagged = vec![0x01];
        flagged.extend_from_slice(&[7u8; 32]);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&flagged);
        assert!(matches!(
            Ed25519Signer::from_encoded(&encoded),
            Err(CryptoError::UnsupportedScheme(0x01))
        ));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(
            Ed25519Signer::from_encoded(&encoded),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
        assert!(Ed25519Signer::from_encoded("not a key!").is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let signer = Ed25519Signer::from_encoded(SEED_HEX).expect("key");
        let debug = format!("{signer:?}");
        assert!(!debug.contains(SEED_HEX));
        assert!(debug.contains("d75a9801"));
    }
}
