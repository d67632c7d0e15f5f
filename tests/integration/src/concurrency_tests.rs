//! Concurrent enrollment and verification across threads.

use std::sync::Arc;
use std::thread;

use crate::test_utils::*;
use pcrbind_core::MeasurementSet;
use pcrbind_identity::RejectionReason;

#[test]
fn test_parallel_devices_verify_independently() {
    let fixture = TestVerifier::new();
    let devices: Vec<String> = (0..8).map(|i| format!("dev-{i}")).collect();
    for (i, device) in devices.iter().enumerate() {
        let value = format!("{i:02x}");
        fixture.source.set(
            device.as_str(),
            MeasurementSet::from_pairs([(0, "aa"), (1, value.as_str()), (7, "cc")]),
        );
    }

    let handles: Vec<_> = devices
        .iter()
        .cloned()
        .map(|device| {
            let verifier = Arc::clone(&fixture.verifier);
            thread::spawn(move || {
                verifier.enroll(&device).unwrap();
                (0..4)
                    .map(|_| verifier.verify(&device).unwrap())
                    .all(|outcome| outcome.is_verified())
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(fixture.verifier.list_enrollments().unwrap().len(), devices.len());
}

#[test]
fn test_drift_on_one_device_does_not_affect_others() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("stable");
    fixture.enroll_baseline("drifting");
    fixture.source.update("drifting", 0, "ff");

    let stable = {
        let verifier = Arc::clone(&fixture.verifier);
        thread::spawn(move || verifier.verify("stable").unwrap())
    };
    let drifting = {
        let verifier = Arc::clone(&fixture.verifier);
        thread::spawn(move || verifier.verify("drifting").unwrap())
    };

    assert!(stable.join().unwrap().is_verified());
    assert_eq!(
        drifting.join().unwrap().rejection(),
        Some(RejectionReason::SnapshotMismatch)
    );
}

#[test]
fn test_racing_reenrollment_leaves_consistent_record() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let verifier = Arc::clone(&fixture.verifier);
            thread::spawn(move || {
                verifier.enroll("dev-1").unwrap();
                verifier.verify("dev-1").unwrap()
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.join().unwrap();
        // A verification can lose its policy to a concurrent re-enrollment,
        // but never sees a half-written record.
        assert!(
            outcome.is_verified()
                || outcome.rejection() == Some(RejectionReason::SnapshotMismatch),
            "unexpected outcome {outcome:?}"
        );
    }

    assert_eq!(fixture.verifier.list_enrollments().unwrap().len(), 1);
    assert!(fixture.verifier.verify("dev-1").unwrap().is_verified());
}
