//! Offline verifier: enrollment and challenge-response verification of a
//! device's PCR state against its sealed enrollment snapshot.
//!
//! # Verification
//!
//! 1. [`OfflineVerifier::begin`] loads the enrollment and issues a challenge
//!    that lives for the policy's freshness window.
//! 2. [`OfflineVerifier::respond`] reads the policy's registers from the
//!    measurement source and signs them against the challenge.
//! 3. [`OfflineVerifier::submit`] checks the response (nonce, expiry, replay,
//!    MAC) and then opens the stored snapshot with a key derived from the
//!    disclosed measurements. Opening succeeds only if those measurements are
//!    the enrolled ones.
//!
//! [`OfflineVerifier::verify`] runs all three steps. Every rejection is logged
//! on the security target and appended to the audit trail.

use std::sync::Arc;

use pcrbind_core::logging::SECURITY_TARGET;
use pcrbind_core::{current_timestamp_ms, Config, MeasurementSet};
use pcrbind_crypto::{derive_signing_key, AttestationEngine};
use tracing::{error, info, warn};
use zeroize::Zeroize;

use crate::audit::{AuditEvent, AuditKind};
use crate::enrollment::{
    fingerprint_id_for, record_aad, validate_device_id, EnrollmentReceipt, MeasurementSnapshot,
};
use crate::error::{IdentityError, IdentityResult, StoreError};
use crate::measurement::{select_source, MeasurementSource, SourceKind};
use crate::policy::Policy;
use crate::store::{DeviceFingerprint, FingerprintStore};
use crate::verification_state::{
    RejectionReason, VerificationOutcome, VerificationSession, VerificationState,
};

/// Enrolls devices and verifies them offline.
///
/// `Send + Sync`; share it across threads behind an `Arc`.
#[derive(Debug)]
pub struct OfflineVerifier {
    config: Config,
    engine: AttestationEngine,
    store: FingerprintStore,
    source: Arc<dyn MeasurementSource>,
}

impl OfflineVerifier {
    /// Validate `config`, open the store and select the measurement source.
    pub fn open(config: Config) -> IdentityResult<Self> {
        config.validate()?;
        let store = FingerprintStore::open(config.storage.database_path())?;
        let source = select_source(&config)?;
        let engine = AttestationEngine::new(&config.protocol);
        Ok(Self::with_components(config, engine, store, source))
    }

    /// Like [`open`](Self::open) but with a caller-supplied measurement source.
    pub fn with_source(config: Config, source: Arc<dyn MeasurementSource>) -> IdentityResult<Self> {
        config.validate()?;
        let store = FingerprintStore::open(config.storage.database_path())?;
        let engine = AttestationEngine::new(&config.protocol);
        Ok(Self::with_components(config, engine, store, source))
    }

    /// Assemble a verifier from parts. Verifiers built from clones of one
    /// engine share its nonce registry.
    pub fn with_components(
        config: Config,
        engine: AttestationEngine,
        store: FingerprintStore,
        source: Arc<dyn MeasurementSource>,
    ) -> Self {
        info!(
            source = %source.kind(),
            store = %store.path().display(),
            "Offline verifier ready"
        );
        Self {
            config,
            engine,
            store,
            source,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &AttestationEngine {
        &self.engine
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Capture the device's current measurements and seal them as its
    /// enrollment. Replaces any earlier enrollment of the same device.
    pub fn enroll(&self, device_id: &str) -> IdentityResult<EnrollmentReceipt> {
        validate_device_id(device_id)?;

        let measurements = self
            .source
            .read(device_id, &self.config.measurement.default_pcrs)?;
        let key = self.engine.derive_key(&measurements)?;

        let policy = Policy::generate(measurements.indices(), self.config.protocol.challenge_ttl_ms);
        let fingerprint_id = fingerprint_id_for(device_id);
        let now = current_timestamp_ms();

        let snapshot = MeasurementSnapshot {
            device_id: device_id.to_string(),
            measurements,
            captured_at: now,
        };
        let mut plaintext = serde_json::to_vec(&snapshot)?;
        let sealed = self.engine.encrypt(
            &plaintext,
            &key,
            &record_aad(device_id, &fingerprint_id, &policy.policy_id),
        );
        plaintext.zeroize();

        let record = DeviceFingerprint {
            fingerprint_id: fingerprint_id.clone(),
            device_id: device_id.to_string(),
            encrypted_snapshot: sealed?,
            policy_id: policy.policy_id.clone(),
            created_at: now,
        };
        let replaced = self.store.put(&record, &policy)?;

        let kind = if replaced {
            AuditKind::Reenrolled
        } else {
            AuditKind::Enrolled
        };
        self.audit(device_id, kind, &policy.policy_id);
        info!(
            device_id = %device_id,
            fingerprint_id = %fingerprint_id,
            policy_id = %policy.policy_id,
            pcrs = ?policy.permitted_pcrs,
            replaced,
            "Device enrolled"
        );

        Ok(EnrollmentReceipt {
            fingerprint_id,
            policy_id: policy.policy_id,
        })
    }

    /// Run a complete verification of `device_id`.
    pub fn verify(&self, device_id: &str) -> IdentityResult<VerificationOutcome> {
        let mut session = self.begin(device_id)?;
        if let Some(outcome) = session.outcome() {
            return Ok(outcome);
        }
        self.respond(&mut session)?;
        self.submit(&mut session)
    }

    /// Start a session: load the enrollment and issue a challenge.
    ///
    /// An unknown device yields a session already rejected with
    /// [`RejectionReason::NotEnrolled`].
    pub fn begin(&self, device_id: &str) -> IdentityResult<VerificationSession> {
        validate_device_id(device_id)?;
        let mut session = VerificationSession::new(device_id);

        match self.store.get_with_policy(device_id) {
            Ok((_, policy)) => {
                let challenge = self.engine.generate_challenge(policy.freshness_window_ms)?;
                session.on_challenge_issued(challenge, policy)?;
            }
            Err(StoreError::NotFound { .. }) => {
                self.reject(&mut session, RejectionReason::NotEnrolled)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(session)
    }

    /// Device side: read the policy's registers and sign them.
    pub fn respond(&self, session: &mut VerificationSession) -> IdentityResult<()> {
        let (Some(challenge), Some(policy)) = (session.challenge(), session.policy()) else {
            return Err(IdentityError::InvalidState(format!(
                "cannot respond in state {}",
                session.state().name()
            )));
        };
        let measurements = self
            .source
            .read(session.device_id(), &policy.permitted_pcrs)?;
        let response = self.engine.sign_response(challenge, &measurements)?;
        session.on_response_received(response)
    }

    /// Check the received response and decide the session.
    pub fn submit(&self, session: &mut VerificationSession) -> IdentityResult<VerificationOutcome> {
        self.submit_at(session, current_timestamp_ms())
    }

    /// [`submit`](Self::submit) with an explicit clock.
    pub fn submit_at(
        &self,
        session: &mut VerificationSession,
        now_ms: u64,
    ) -> IdentityResult<VerificationOutcome> {
        let (challenge, policy, response) = match session.state() {
            VerificationState::ResponseReceived {
                challenge,
                policy,
                response,
            } => (challenge.clone(), policy.clone(), response.clone()),
            other => {
                return Err(IdentityError::InvalidState(format!(
                    "cannot submit in state {}",
                    other.name()
                )))
            }
        };

        let protocol =
            self.engine
                .verify_response_at(&challenge, &response, derive_signing_key, now_ms);
        if let Err(rejection) = protocol {
            return self.reject(session, rejection.into());
        }

        let device_id = session.device_id().to_string();
        match self.open_snapshot(&device_id, &policy, &response.measurements)? {
            Ok(fingerprint_id) => {
                session.on_verified(fingerprint_id.clone())?;
                self.audit(&device_id, AuditKind::Verified, &policy.policy_id);
                info!(
                    device_id = %device_id,
                    fingerprint_id = %fingerprint_id,
                    policy_id = %policy.policy_id,
                    "Device verified"
                );
                Ok(VerificationOutcome::Verified {
                    fingerprint_id,
                    policy_id: policy.policy_id,
                })
            }
            Err(reason) => self.reject(session, reason),
        }
    }

    /// Open the stored snapshot with a key derived from `measurements`.
    /// The inner `Err` is a verification rejection.
    fn open_snapshot(
        &self,
        device_id: &str,
        policy: &Policy,
        measurements: &MeasurementSet,
    ) -> IdentityResult<Result<String, RejectionReason>> {
        let record = match self.store.get(device_id) {
            Ok(record) => record,
            Err(StoreError::NotFound { .. }) => return Ok(Err(RejectionReason::NotEnrolled)),
            Err(e) => return Err(e.into()),
        };
        // Re-enrolled since the challenge was issued.
        if record.policy_id != policy.policy_id {
            return Ok(Err(RejectionReason::SnapshotMismatch));
        }

        let Ok(key) = self.engine.derive_key(measurements) else {
            return Ok(Err(RejectionReason::SnapshotMismatch));
        };
        let aad = record_aad(device_id, &record.fingerprint_id, &record.policy_id);
        let Ok(mut plaintext) = self.engine.decrypt(&record.encrypted_snapshot, &key, &aad) else {
            return Ok(Err(RejectionReason::SnapshotMismatch));
        };

        let snapshot: Result<MeasurementSnapshot, _> = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        let snapshot = snapshot?;

        if snapshot.device_id != device_id || &snapshot.measurements != measurements {
            return Ok(Err(RejectionReason::SnapshotMismatch));
        }
        Ok(Ok(record.fingerprint_id))
    }

    fn reject(
        &self,
        session: &mut VerificationSession,
        reason: RejectionReason,
    ) -> IdentityResult<VerificationOutcome> {
        session.on_rejected(reason)?;
        warn!(
            target: SECURITY_TARGET,
            device_id = %session.device_id(),
            %reason,
            "Verification rejected"
        );
        // Unknown device ids are not persisted; anyone can ask about one.
        if reason != RejectionReason::NotEnrolled {
            self.audit(session.device_id(), AuditKind::Rejected, reason.as_str());
        }
        Ok(VerificationOutcome::Rejected(reason))
    }

    /// Remove a device's enrollment. Returns whether one existed.
    pub fn delete_enrollment(&self, device_id: &str) -> IdentityResult<bool> {
        validate_device_id(device_id)?;
        let deleted = self.store.delete(device_id)?;
        if deleted {
            self.audit(device_id, AuditKind::Deleted, "");
            info!(device_id = %device_id, "Enrollment deleted");
        }
        Ok(deleted)
    }

    pub fn enrollment(&self, device_id: &str) -> IdentityResult<Option<DeviceFingerprint>> {
        match self.store.get(device_id) {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_enrollments(&self) -> IdentityResult<Vec<DeviceFingerprint>> {
        Ok(self.store.list()?)
    }

    pub fn audit_trail(&self, device_id: &str) -> IdentityResult<Vec<AuditEvent>> {
        Ok(self.store.audit_trail(device_id)?)
    }

    // Audit is best effort: a failed append is logged, the operation stands.
    fn audit(&self, device_id: &str, kind: AuditKind, detail: &str) {
        if let Err(e) = self
            .store
            .append_audit(device_id, kind, detail, current_timestamp_ms())
        {
            error!(device_id = %device_id, kind = kind.as_str(), error = %e, "Failed to append audit event");
        }
    }
}
