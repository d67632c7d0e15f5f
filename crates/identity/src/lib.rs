//! Offline device fingerprinting bound to PCR measurements.
//!
//! A device is enrolled by reading a set of platform configuration registers,
//! deriving a key from their values and sealing a snapshot of them under that
//! key. Verification issues a single-use challenge, has the device sign its
//! current measurements against it, and then tries to open the stored
//! snapshot with a key derived from those current measurements. Only an
//! unchanged platform state can open it.
//!
//! # Components
//!
//! - [`measurement`]: hardware TPM, deterministic simulator and fallback sources
//! - [`store`]: SQLite store of sealed records, policies and the audit trail
//! - [`verifier`]: enrollment and the verification protocol
//! - [`verification_state`]: per-session state machine and rejection reasons
//!
//! # Security Model
//!
//! - Derivation keys are never persisted; they are recomputed from measurements
//! - Challenge nonces come from the OS RNG and are accepted at most once
//! - Integrity and protocol failures are typed rejections, never panics
//! - Every rejection is logged on the `pcrbind::security` target and audited

pub mod audit;
pub mod enrollment;
pub mod error;
pub mod measurement;
pub mod policy;
pub mod simulator;
pub mod store;
pub mod tpm;
pub mod verification_state;
pub mod verifier;

pub use audit::{AuditEvent, AuditKind};
pub use enrollment::{
    fingerprint_id_for, record_aad, validate_device_id, EnrollmentReceipt, MeasurementSnapshot,
    MAX_DEVICE_ID_LEN,
};
pub use error::{IdentityError, IdentityResult, SourceError, StoreError, StoreResult};
pub use measurement::{
    select_source, FallbackSource, MeasurementSource, SourceKind, StaticMeasurementSource,
};
pub use policy::{Policy, POLICY_ID_LEN};
pub use simulator::SimulatedPcrSource;
pub use store::{DeviceFingerprint, FingerprintStore};
pub use tpm::SysfsPcrSource;
pub use verification_state::{
    RejectionReason, StateTransition, VerificationOutcome, VerificationSession, VerificationState,
};
pub use verifier::OfflineVerifier;
