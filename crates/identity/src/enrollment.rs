//! Enrollment records: the sealed measurement snapshot and the identifiers
//! that bind it to a device.
//!
//! The snapshot is sealed under a key derived from the enrollment-time
//! measurements, with associated data naming the record it belongs to. A blob
//! copied into another device's record therefore fails to open even when the
//! measurements happen to match.

use pcrbind_core::{MeasurementSet, PcrIndex};
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};

const FINGERPRINT_DOMAIN: &[u8] = b"pcrbind.fingerprint-id.v1";
const RECORD_AAD_DOMAIN: &[u8] = b"pcrbind.record.v1";

/// Upper bound on device id length, in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 256;

/// Plaintext sealed inside a fingerprint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementSnapshot {
    pub device_id: String,
    pub measurements: MeasurementSet,
    pub captured_at: u64,
}

impl MeasurementSnapshot {
    pub fn indices(&self) -> Vec<PcrIndex> {
        self.measurements.indices()
    }
}

/// What `enroll` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentReceipt {
    pub fingerprint_id: String,
    pub policy_id: String,
}

/// Deterministic fingerprint id: hex BLAKE3 of a domain tag and the device id.
pub fn fingerprint_id_for(device_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(FINGERPRINT_DOMAIN);
    hasher.update(device_id.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Associated data binding a sealed snapshot to its record.
pub fn record_aad(device_id: &str, fingerprint_id: &str, policy_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(
        RECORD_AAD_DOMAIN.len() + 12 + device_id.len() + fingerprint_id.len() + policy_id.len(),
    );
    aad.extend_from_slice(RECORD_AAD_DOMAIN);
    for part in [device_id, fingerprint_id, policy_id] {
        aad.extend_from_slice(&(part.len() as u32).to_be_bytes());
        aad.extend_from_slice(part.as_bytes());
    }
    aad
}

/// Reject empty, oversized or control-character device ids.
pub fn validate_device_id(device_id: &str) -> IdentityResult<()> {
    if device_id.is_empty() {
        return Err(IdentityError::InvalidDeviceId("device id is empty".into()));
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(IdentityError::InvalidDeviceId(format!(
            "device id exceeds {MAX_DEVICE_ID_LEN} bytes"
        )));
    }
    if device_id.chars().any(char::is_control) {
        return Err(IdentityError::InvalidDeviceId(
            "device id contains control characters".into(),
        ));
    }
    Ok(())
}
