//! Measurement-to-key derivation.
//!
//! Keys are derived with HKDF-SHA256 over the canonical encoding of a
//! [`MeasurementSet`]. The canonical encoding is sorted by register index, so
//! any permutation of the same index/value pairs yields the same key, while a
//! change to any single value yields an unrelated key.
//!
//! Sealing and signing keys share the same input keying material but use
//! distinct HKDF `info` labels.

use hkdf::Hkdf;
use pcrbind_core::{MeasurementSet, KEY_LEN};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

const KDF_SALT: &[u8] = b"pcrbind.kdf.salt.v1";
const SEALING_INFO: &[u8] = b"pcrbind.sealing-key.v1";
const SIGNING_INFO: &[u8] = b"pcrbind.signing-key.v1";

/// A 256-bit symmetric key derived from measurements. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    /// Wrap raw key bytes. Fails unless exactly [`KEY_LEN`] bytes are given.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for DerivedKey {}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Derive the snapshot sealing key for a measurement set.
pub fn derive_key(measurements: &MeasurementSet) -> CryptoResult<DerivedKey> {
    derive(measurements, SEALING_INFO)
}

/// Derive the challenge-response signing key for a measurement set.
pub fn derive_signing_key(measurements: &MeasurementSet) -> CryptoResult<DerivedKey> {
    derive(measurements, SIGNING_INFO)
}

fn derive(measurements: &MeasurementSet, info: &[u8]) -> CryptoResult<DerivedKey> {
    if measurements.is_empty() {
        return Err(CryptoError::EmptyMeasurementSet);
    }

    let mut ikm = measurements.canonical_bytes();
    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), &ikm);
    ikm.zeroize();

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;
    let key = DerivedKey(okm);
    okm.zeroize();
    Ok(key)
}
