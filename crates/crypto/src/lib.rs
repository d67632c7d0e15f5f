//! Cryptographic primitives for PcrBind offline attestation.
//!
//! This crate is the attestation engine: it turns a PCR measurement set into
//! keys, seals enrollment snapshots, and runs the challenge-response protocol
//! that proves both the measurement state and freshness.
//!
//! # Algorithms
//!
//! - **Key derivation**: HKDF-SHA256 over the canonical measurement encoding
//! - **Sealing**: ChaCha20-Poly1305 with a random 96-bit nonce per message
//! - **Response signatures**: HMAC-SHA256, compared in constant time
//! - **Nonces**: OS RNG (`OsRng`)
//!
//! # Security Principles
//!
//! - Derived keys are never stored and are zeroized on drop
//! - Decryption fails closed; no partial plaintext is ever returned
//! - Signature and nonce comparisons go through `subtle`, never `==`
//! - A nonce is accepted at most once, process-wide

pub mod challenge;
pub mod engine;
pub mod error;
pub mod kdf;
pub mod nonce_registry;
pub mod sealing;

pub use challenge::{
    compute_signature, constant_time_eq, Challenge, ChallengeResponse, ProtocolRejection,
};
pub use engine::AttestationEngine;
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, derive_signing_key, DerivedKey};
pub use nonce_registry::{NonceRegistry, RegistryError, DEFAULT_NONCE_RETENTION_MS};
pub use sealing::{decrypt, encrypt, SealedBlob, NONCE_LEN, TAG_LEN};
