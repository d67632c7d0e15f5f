//! Error types for the attestation engine.

use thiserror::Error;

/// Errors raised by key derivation, sealing and challenge handling.
///
/// Integrity failures are reported as [`CryptoError::Integrity`] and carry no
/// detail about where the mismatch occurred.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication tag did not verify (wrong key or tampered data)
    #[error("Integrity check failed")]
    Integrity,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Keys cannot be derived from an empty measurement set
    #[error("Measurement set is empty")]
    EmptyMeasurementSet,

    #[error("Malformed sealed blob: {0}")]
    MalformedBlob(String),

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Encryption failed")]
    Encryption,

    #[error("Nonce registry error: {0}")]
    NonceRegistry(#[from] crate::nonce_registry::RegistryError),
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
