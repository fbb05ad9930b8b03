//! # vaultkeep-crypto
//!
//! The signing capability used to authorize compound transactions.
//!
//! Callers only ever see the narrow [`Signer`] interface: sign some bytes,
//! report the public key. Each supported key type is one concrete
//! implementation; today that is Ed25519 only.
//!
//! ## Modules
//!
//! - [`ed25519`]: Ed25519 signer, key material loading
//! - [`sui`]: Sui intent digests, serialized signatures, address derivation

pub mod ed25519;
pub mod sui;

pub use ed25519::Ed25519Signer;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Key material could not be decoded.
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// The key carries a scheme flag we do not support.
    #[error("unsupported signature scheme flag: {0:#04x}")]
    UnsupportedScheme(u8),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// A public key, tagged by scheme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519([u8; 32]),
}

impl PublicKey {
    /// Sui signature scheme flag.
    pub fn flag(&self) -> u8 {
        match self {
            Self::Ed25519(_) => sui::ED25519_FLAG,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Ed25519(bytes) => bytes,
        }
    }
}

/// A raw signature, tagged by scheme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signature {
    Ed25519([u8; 64]),
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Ed25519(bytes) => bytes,
        }
    }
}

/// Capability to sign on behalf of the compounding account.
///
/// Loaded once at startup and shared read-only across workers.
pub trait Signer: Send + Sync {
    /// Sign `message` as-is (callers hash or wrap it first where the chain
    /// requires it).
    fn sign(&self, message: &[u8]) -> Result<Signature>;

    /// The key that verifies this signer's signatures.
    fn public_key(&self) -> PublicKey;
}
