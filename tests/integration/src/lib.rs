//! End-to-end tests for enrollment and offline verification
//!
//! This test suite validates:
//! - Enroll/verify round trips and measurement drift detection
//! - Replay, expiry and concurrent submission of challenge responses
//! - Tampering with persisted records
//! - Independence of concurrent verifications of different devices

pub mod test_utils;

#[cfg(test)]
mod end_to_end_tests;

#[cfg(test)]
mod replay_attack_tests;

#[cfg(test)]
mod tamper_tests;

#[cfg(test)]
mod concurrency_tests;
