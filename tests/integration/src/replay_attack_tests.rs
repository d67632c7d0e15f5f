//! Replay attack detection tests
//!
//! A captured response must never verify twice, no matter how it is
//! resubmitted or how many callers race with it.

use std::sync::Arc;
use std::thread;

use crate::test_utils::*;
use pcrbind_crypto::Challenge;
use pcrbind_identity::{RejectionReason, VerificationOutcome};

#[test]
fn test_captured_response_replayed_after_success() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    let mut session = fixture.verifier.begin("dev-1").unwrap();
    fixture.verifier.respond(&mut session).unwrap();
    let mut replay = session.clone();

    assert!(fixture.verifier.submit(&mut session).unwrap().is_verified());
    assert_eq!(
        fixture.verifier.submit(&mut replay).unwrap(),
        VerificationOutcome::Rejected(RejectionReason::ReplayedChallenge)
    );
}

#[test]
fn test_old_response_against_new_challenge() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    // Capture a complete response from an earlier session.
    let mut earlier = fixture.verifier.begin("dev-1").unwrap();
    fixture.verifier.respond(&mut earlier).unwrap();
    let captured = earlier.response().unwrap().clone();
    assert!(fixture.verifier.submit(&mut earlier).unwrap().is_verified());

    // Present it to a fresh challenge.
    let mut fresh = fixture.verifier.begin("dev-1").unwrap();
    fresh.on_response_received(captured).unwrap();
    assert_eq!(
        fixture.verifier.submit(&mut fresh).unwrap().rejection(),
        Some(RejectionReason::ChallengeMismatch)
    );
}

#[test]
fn test_response_to_unissued_nonce() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    // A self-made challenge the verifier never issued, paired with a response
    // that matches it exactly.
    let forged = Challenge {
        nonce: vec![0x5a; 32],
        issued_at: current_timestamp_ms(),
        expires_at: u64::MAX,
    };
    let response = fixture
        .verifier
        .engine()
        .sign_response(&forged, &baseline_measurements())
        .unwrap();

    let mut session = fixture.verifier.begin("dev-1").unwrap();
    session.on_response_received(response).unwrap();
    assert_eq!(
        fixture.verifier.submit(&mut session).unwrap().rejection(),
        Some(RejectionReason::ChallengeMismatch)
    );
}

#[test]
fn test_expired_challenge_rejected() {
    let fixture = TestVerifier::with_config(|config| {
        config.protocol.challenge_ttl_ms = 1;
    });
    fixture.enroll_baseline("dev-1");

    let mut session = fixture.verifier.begin("dev-1").unwrap();
    fixture.verifier.respond(&mut session).unwrap();
    let mut retry = session.clone();
    thread::sleep(std::time::Duration::from_millis(20));

    assert_eq!(
        fixture.verifier.submit(&mut session).unwrap().rejection(),
        Some(RejectionReason::ExpiredChallenge)
    );

    // Once observed expired, the nonce stays dead.
    assert_eq!(
        fixture.verifier.submit(&mut retry).unwrap().rejection(),
        Some(RejectionReason::ExpiredChallenge)
    );
    // A terminal session cannot be resubmitted at all.
    assert!(fixture.verifier.submit(&mut session).is_err());
}

#[test]
fn test_bad_signature_does_not_burn_challenge() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    let mut session = fixture.verifier.begin("dev-1").unwrap();
    let challenge = session.challenge().unwrap().clone();
    let mut honest = session.clone();

    let mut forged = fixture
        .verifier
        .engine()
        .sign_response(&challenge, &baseline_measurements())
        .unwrap();
    forged.signature.iter_mut().for_each(|b| *b = !*b);
    session.on_response_received(forged).unwrap();
    assert_eq!(
        fixture.verifier.submit(&mut session).unwrap().rejection(),
        Some(RejectionReason::BadSignature)
    );

    // The legitimate device can still answer the same challenge.
    fixture.verifier.respond(&mut honest).unwrap();
    assert!(fixture.verifier.submit(&mut honest).unwrap().is_verified());
}

#[test]
fn test_concurrent_submissions_single_winner() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    let mut session = fixture.verifier.begin("dev-1").unwrap();
    fixture.verifier.respond(&mut session).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let verifier = Arc::clone(&fixture.verifier);
            let mut copy = session.clone();
            thread::spawn(move || verifier.submit(&mut copy).unwrap())
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = outcomes.iter().filter(|o| o.is_verified()).count();
    assert_eq!(winners, 1);
    assert!(outcomes
        .iter()
        .filter(|o| !o.is_verified())
        .all(|o| o.rejection() == Some(RejectionReason::ReplayedChallenge)));
}
