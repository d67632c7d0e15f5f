//! Error types for PcrBind identity operations.
//!
//! Cryptographic and protocol failures during verification are *not* errors:
//! they come back as [`crate::VerificationOutcome::Rejected`]. The types here
//! cover contract violations, unavailable collaborators and storage faults.

use thiserror::Error;

/// Errors reported by a measurement source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source cannot produce measurements (no TPM, access denied, ...)
    #[error("Measurement source unavailable: {0}")]
    Unavailable(String),

    /// A requested register index is outside the PCR bank
    #[error("Invalid PCR index: {0}")]
    InvalidIndex(u8),
}

/// Errors raised by the fingerprint store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("No enrollment for device: {device_id}")]
    NotFound { device_id: String },

    #[error("Policy not found: {policy_id}")]
    PolicyNotFound { policy_id: String },

    /// The fingerprint id is already bound to a different device
    #[error("Fingerprint id {fingerprint_id} already in use")]
    DuplicateFingerprint { fingerprint_id: String },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Measurement error: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] pcrbind_crypto::CryptoError),

    #[error("Core error: {0}")]
    Core(#[from] pcrbind_core::CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    /// Operation not allowed in the session's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
