//! Challenge and response messages and the response MAC.

use hmac::{Hmac, Mac};
use pcrbind_core::{MeasurementSet, KEY_LEN};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::DerivedKey;

type HmacSha256 = Hmac<Sha256>;

/// A single-use freshness challenge issued by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Random nonce from the OS RNG
    #[serde(with = "hex")]
    pub nonce: Vec<u8>,
    /// Issue time (Unix epoch milliseconds)
    pub issued_at: u64,
    /// Expiry time (Unix epoch milliseconds); the challenge is dead from this instant on
    pub expires_at: u64,
}

impl Challenge {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn nonce_hex(&self) -> String {
        hex::encode(&self.nonce)
    }
}

/// Device answer to a [`Challenge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// Nonce of the challenge being answered
    #[serde(with = "hex")]
    pub challenge_nonce: Vec<u8>,
    /// Measurements the device discloses
    pub measurements: MeasurementSet,
    /// HMAC-SHA256 over `challenge_nonce ∥ canonical(measurements)`
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

/// Why the protocol layer refused a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolRejection {
    /// The response answers a different challenge, or one never issued here
    ChallengeMismatch,
    /// The challenge outlived its freshness window
    Expired,
    /// The challenge was already consumed by an earlier response
    Replayed,
    /// The MAC does not match the disclosed measurements and nonce
    BadSignature,
}

impl std::fmt::Display for ProtocolRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ProtocolRejection::ChallengeMismatch => "challenge mismatch",
            ProtocolRejection::Expired => "challenge expired",
            ProtocolRejection::Replayed => "challenge replayed",
            ProtocolRejection::BadSignature => "bad signature",
        };
        f.write_str(text)
    }
}

/// Compute the response MAC for `nonce` and `measurements`.
pub fn compute_signature(
    key: &DerivedKey,
    nonce: &[u8],
    measurements: &MeasurementSet,
) -> CryptoResult<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.as_bytes().len(),
        }
    })?;
    mac.update(nonce);
    mac.update(&measurements.canonical_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time equality over byte strings. Length differences are not secret.
pub fn constant_time_eq(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}
