//! Enrollment and verification of a single device through its lifecycle.

use crate::test_utils::*;
use pcrbind_core::MeasurementSet;
use pcrbind_identity::{fingerprint_id_for, AuditKind, RejectionReason, VerificationOutcome};

#[test]
fn test_enroll_then_verify_same_state() {
    let fixture = TestVerifier::new();
    fixture.source.set("dev-1", baseline_measurements());

    let receipt = fixture.verifier.enroll("dev-1").unwrap();
    assert_eq!(receipt.fingerprint_id, fingerprint_id_for("dev-1"));
    assert!(!receipt.policy_id.is_empty());

    let outcome = fixture.verifier.verify("dev-1").unwrap();
    assert_eq!(
        outcome,
        VerificationOutcome::Verified {
            fingerprint_id: receipt.fingerprint_id,
            policy_id: receipt.policy_id,
        }
    );
}

#[test]
fn test_register_change_is_snapshot_mismatch() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    fixture.source.update("dev-1", 7, "zz");
    let outcome = fixture.verifier.verify("dev-1").unwrap();
    assert_eq!(outcome, VerificationOutcome::Rejected(RejectionReason::SnapshotMismatch));

    // Restoring the register restores verification.
    fixture.source.update("dev-1", 7, "cc");
    assert!(fixture.verifier.verify("dev-1").unwrap().is_verified());
}

#[test]
fn test_unenrolled_device_is_distinct_rejection() {
    let fixture = TestVerifier::new();
    fixture.source.set("ghost", baseline_measurements());

    let outcome = fixture.verifier.verify("ghost").unwrap();
    assert_eq!(outcome.rejection(), Some(RejectionReason::NotEnrolled));
    assert_ne!(outcome.rejection(), Some(RejectionReason::SnapshotMismatch));
}

#[test]
fn test_reenrollment_replaces_baseline() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");
    let old_policy = fixture.verifier.enrollment("dev-1").unwrap().unwrap().policy_id;

    let updated = MeasurementSet::from_pairs([(0, "aa"), (1, "b2"), (7, "c2")]);
    fixture.source.set("dev-1", updated);
    let receipt = fixture.verifier.enroll("dev-1").unwrap();
    assert_ne!(receipt.policy_id, old_policy);
    assert!(fixture.verifier.verify("dev-1").unwrap().is_verified());

    fixture.source.set("dev-1", baseline_measurements());
    assert_eq!(
        fixture.verifier.verify("dev-1").unwrap().rejection(),
        Some(RejectionReason::SnapshotMismatch)
    );

    // The old policy is gone with the old record.
    assert!(fixture.verifier.store().get_policy(&old_policy).is_err());
    assert_eq!(fixture.verifier.list_enrollments().unwrap().len(), 1);
}

#[test]
fn test_policy_reflects_enrollment() {
    let fixture = TestVerifier::with_config(|config| {
        config.protocol.challenge_ttl_ms = 5_000;
    });
    fixture.enroll_baseline("dev-1");

    let (_, policy) = fixture.verifier.store().get_with_policy("dev-1").unwrap();
    assert_eq!(policy.permitted_pcrs, vec![0, 1, 7]);
    assert_eq!(policy.freshness_window_ms, 5_000);

    let session = fixture.verifier.begin("dev-1").unwrap();
    let challenge = session.challenge().unwrap();
    assert_eq!(challenge.expires_at - challenge.issued_at, 5_000);
    assert_eq!(challenge.nonce.len(), 32);
}

#[test]
fn test_delete_then_verify() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    assert!(fixture.verifier.delete_enrollment("dev-1").unwrap());
    assert_eq!(
        fixture.verifier.verify("dev-1").unwrap().rejection(),
        Some(RejectionReason::NotEnrolled)
    );

    let kinds: Vec<_> = fixture
        .verifier
        .audit_trail("dev-1")
        .unwrap()
        .iter()
        .map(|event| event.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![AuditKind::Enrolled, AuditKind::Deleted]
    );
}

#[test]
fn test_session_history_records_each_step() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    let mut session = fixture.verifier.begin("dev-1").unwrap();
    fixture.verifier.respond(&mut session).unwrap();
    fixture.verifier.submit(&mut session).unwrap();

    let steps: Vec<_> = session
        .history()
        .iter()
        .map(|t| (t.from_state, t.to_state))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("IDLE", "CHALLENGE_ISSUED"),
            ("CHALLENGE_ISSUED", "RESPONSE_RECEIVED"),
            ("RESPONSE_RECEIVED", "VERIFIED"),
        ]
    );
}
