//! Process-wide registry of issued challenge nonces.
//!
//! Implements single-use semantics for challenges: a nonce is registered as
//! outstanding when issued and is consumed by the first response that passes
//! verification. The check, the signature verification and the consume step
//! all run under one lock, so concurrent responses to the same challenge can
//! never both be accepted.
//!
//! Entries are kept for a retention window past their expiry so late replays
//! are still recognised, then swept lazily whenever a new nonce is registered.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

use crate::challenge::{Challenge, ProtocolRejection};

/// Default retention of spent nonces past expiry (10 minutes).
pub const DEFAULT_NONCE_RETENTION_MS: u64 = 600_000;

/// Maximum number of tracked nonces (prevents memory exhaustion).
const MAX_TRACKED_NONCES: usize = 100_000;

/// Registry error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate nonce: {0}")]
    DuplicateNonce(String),

    #[error("Nonce tracking limit exceeded")]
    CapacityExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NonceState {
    Outstanding,
    Consumed { consumed_at: u64 },
    Expired,
}

#[derive(Debug, Clone, Copy)]
struct NonceEntry {
    state: NonceState,
    expires_at: u64,
}

/// Single-use tracker for challenge nonces.
#[derive(Debug)]
pub struct NonceRegistry {
    entries: Mutex<HashMap<Vec<u8>, NonceEntry>>,
    retention_ms: u64,
}

impl NonceRegistry {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Vec<u8>, NonceEntry>> {
        // Every critical section leaves the map consistent, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a freshly issued challenge as outstanding.
    pub fn register(&self, challenge: &Challenge) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        Self::sweep(&mut entries, challenge.issued_at, self.retention_ms);

        if entries.contains_key(&challenge.nonce) {
            return Err(RegistryError::DuplicateNonce(challenge.nonce_hex()));
        }
        if entries.len() >= MAX_TRACKED_NONCES {
            return Err(RegistryError::CapacityExceeded);
        }

        entries.insert(
            challenge.nonce.clone(),
            NonceEntry {
                state: NonceState::Outstanding,
                expires_at: challenge.expires_at,
            },
        );
        Ok(())
    }

    /// Accept a response for `nonce` at most once.
    ///
    /// Checks, in order: the nonce was issued here, it has not been consumed,
    /// it has not expired, and `verify_signature` holds. Only when all pass is
    /// the nonce marked consumed. An expired outstanding nonce is retired on
    /// first observation. A failed signature leaves the nonce outstanding.
    pub fn check_and_consume<F>(
        &self,
        nonce: &[u8],
        now_ms: u64,
        verify_signature: F,
    ) -> Result<(), ProtocolRejection>
    where
        F: FnOnce() -> bool,
    {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(nonce)
            .ok_or(ProtocolRejection::ChallengeMismatch)?;

        match entry.state {
            NonceState::Consumed { .. } => return Err(ProtocolRejection::Replayed),
            NonceState::Expired => return Err(ProtocolRejection::Expired),
            NonceState::Outstanding => {}
        }

        if now_ms >= entry.expires_at {
            entry.state = NonceState::Expired;
            return Err(ProtocolRejection::Expired);
        }

        if !verify_signature() {
            return Err(ProtocolRejection::BadSignature);
        }

        entry.state = NonceState::Consumed { consumed_at: now_ms };
        Ok(())
    }

    /// Number of challenges still awaiting a response.
    pub fn outstanding_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| entry.state == NonceState::Outstanding)
            .count()
    }

    /// Whether `nonce` has been consumed by a valid response.
    pub fn is_consumed(&self, nonce: &[u8]) -> bool {
        self.lock()
            .get(nonce)
            .map(|entry| matches!(entry.state, NonceState::Consumed { .. }))
            .unwrap_or(false)
    }

    /// Total tracked nonces (outstanding, consumed and expired).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop entries whose retention window has passed.
    fn sweep(entries: &mut HashMap<Vec<u8>, NonceEntry>, now_ms: u64, retention_ms: u64) {
        let before = entries.len();
        entries.retain(|_, entry| {
            let anchor = match entry.state {
                NonceState::Consumed { consumed_at } => consumed_at.max(entry.expires_at),
                _ => entry.expires_at,
            };
            now_ms < anchor.saturating_add(retention_ms)
        });
        let swept = before - entries.len();
        if swept > 0 {
            debug!(swept, remaining = entries.len(), "Swept retired nonces");
        }
    }
}

impl Default for NonceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_RETENTION_MS)
    }
}
