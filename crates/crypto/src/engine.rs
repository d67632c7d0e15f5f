//! Attestation engine: key derivation, snapshot sealing and the
//! challenge-response protocol, bound to a shared nonce registry.
//!
//! # Protocol
//!
//! 1. Verifier calls [`AttestationEngine::generate_challenge`]; the nonce is
//!    registered as outstanding.
//! 2. Device calls [`AttestationEngine::sign_response`]: HMAC-SHA256 over
//!    `nonce ∥ canonical(measurements)`, keyed by a key derived from those same
//!    measurements. One value proves both the measurement state and freshness.
//! 3. Verifier calls [`AttestationEngine::verify_response`], which recomputes
//!    the MAC, compares in constant time and consumes the nonce.

use std::sync::Arc;

use pcrbind_core::logging::SECURITY_TARGET;
use pcrbind_core::{current_timestamp_ms, MeasurementSet, ProtocolConfig};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

use crate::challenge::{
    compute_signature, constant_time_eq, Challenge, ChallengeResponse, ProtocolRejection,
};
use crate::error::CryptoResult;
use crate::kdf::{self, DerivedKey};
use crate::nonce_registry::NonceRegistry;
use crate::sealing::{self, SealedBlob};

/// Stateless crypto operations plus the shared [`NonceRegistry`].
#[derive(Debug, Clone)]
pub struct AttestationEngine {
    nonce_len: usize,
    registry: Arc<NonceRegistry>,
}

impl AttestationEngine {
    /// Engine with its own registry.
    pub fn new(protocol: &ProtocolConfig) -> Self {
        Self::with_registry(
            protocol,
            Arc::new(NonceRegistry::new(protocol.nonce_retention_ms)),
        )
    }

    /// Engine sharing an existing registry, e.g. one registry per process.
    pub fn with_registry(protocol: &ProtocolConfig, registry: Arc<NonceRegistry>) -> Self {
        Self {
            nonce_len: protocol.nonce_len,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<NonceRegistry> {
        &self.registry
    }

    pub fn derive_key(&self, measurements: &MeasurementSet) -> CryptoResult<DerivedKey> {
        kdf::derive_key(measurements)
    }

    pub fn encrypt(&self, plaintext: &[u8], key: &DerivedKey, aad: &[u8]) -> CryptoResult<SealedBlob> {
        sealing::encrypt(plaintext, key, aad)
    }

    pub fn decrypt(&self, blob: &SealedBlob, key: &DerivedKey, aad: &[u8]) -> CryptoResult<Vec<u8>> {
        sealing::decrypt(blob, key, aad)
    }

    /// Issue a challenge valid for `ttl_ms` and register it as outstanding.
    pub fn generate_challenge(&self, ttl_ms: u64) -> CryptoResult<Challenge> {
        self.generate_challenge_at(ttl_ms, current_timestamp_ms())
    }

    pub fn generate_challenge_at(&self, ttl_ms: u64, now_ms: u64) -> CryptoResult<Challenge> {
        let mut nonce = vec![0u8; self.nonce_len];
        OsRng.fill_bytes(&mut nonce);

        let challenge = Challenge {
            nonce,
            issued_at: now_ms,
            expires_at: now_ms.saturating_add(ttl_ms),
        };
        self.registry.register(&challenge)?;

        debug!(nonce = %challenge.nonce_hex(), expires_at = challenge.expires_at, "Challenge issued");
        Ok(challenge)
    }

    /// Sign `measurements` against `challenge` (device side).
    pub fn sign_response(
        &self,
        challenge: &Challenge,
        measurements: &MeasurementSet,
    ) -> CryptoResult<ChallengeResponse> {
        let key = kdf::derive_signing_key(measurements)?;
        let signature = compute_signature(&key, &challenge.nonce, measurements)?;
        Ok(ChallengeResponse {
            challenge_nonce: challenge.nonce.clone(),
            measurements: measurements.clone(),
            signature,
        })
    }

    /// Verify `response` against the issued `challenge` and consume its nonce.
    ///
    /// `key_deriver` maps the disclosed measurements to the expected signing
    /// key; a deriver failure counts as a bad signature.
    pub fn verify_response<F>(
        &self,
        challenge: &Challenge,
        response: &ChallengeResponse,
        key_deriver: F,
    ) -> Result<(), ProtocolRejection>
    where
        F: Fn(&MeasurementSet) -> CryptoResult<DerivedKey>,
    {
        self.verify_response_at(challenge, response, key_deriver, current_timestamp_ms())
    }

    pub fn verify_response_at<F>(
        &self,
        challenge: &Challenge,
        response: &ChallengeResponse,
        key_deriver: F,
        now_ms: u64,
    ) -> Result<(), ProtocolRejection>
    where
        F: Fn(&MeasurementSet) -> CryptoResult<DerivedKey>,
    {
        let result = if !constant_time_eq(&challenge.nonce, &response.challenge_nonce) {
            Err(ProtocolRejection::ChallengeMismatch)
        } else {
            self.registry.check_and_consume(&challenge.nonce, now_ms, || {
                Self::signature_valid(response, &key_deriver)
            })
        };

        if let Err(rejection) = result {
            warn!(
                target: SECURITY_TARGET,
                nonce = %challenge.nonce_hex(),
                %rejection,
                "Challenge response rejected"
            );
        }
        result
    }

    fn signature_valid<F>(response: &ChallengeResponse, key_deriver: &F) -> bool
    where
        F: Fn(&MeasurementSet) -> CryptoResult<DerivedKey>,
    {
        let Ok(key) = key_deriver(&response.measurements) else {
            return false;
        };
        match compute_signature(&key, &response.challenge_nonce, &response.measurements) {
            Ok(expected) => constant_time_eq(&expected, &response.signature),
            Err(_) => false,
        }
    }
}
