//! Verification session state machine.
//!
//! Tracks one verification attempt from the first call to a final verdict.
//! Each transition is recorded in the session history for audit.
//!
//! # State Transitions
//!
//! ```text
//! Idle
//!     ↓ (challenge issued)
//! ChallengeIssued
//!     ↓ (response received)
//! ResponseReceived
//!     ↓ (protocol and snapshot checks)
//! Verified | Rejected
//! ```
//!
//! Any non-terminal state can move to `Rejected`. `Verified` and `Rejected`
//! are terminal.

use std::fmt;

use pcrbind_core::current_timestamp_ms;
use pcrbind_crypto::{Challenge, ChallengeResponse, ProtocolRejection};
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};
use crate::policy::Policy;

/// Maximum number of transitions kept per session.
const MAX_HISTORY_SIZE: usize = 16;

/// Why a verification was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// The challenge outlived the policy's freshness window
    ExpiredChallenge,
    /// The challenge nonce was already consumed
    ReplayedChallenge,
    /// The response MAC does not match
    BadSignature,
    /// Current measurements differ from the enrolled snapshot
    SnapshotMismatch,
    /// The response answers a different or unknown challenge
    ChallengeMismatch,
    /// No enrollment exists for the device
    NotEnrolled,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::ExpiredChallenge => "EXPIRED_CHALLENGE",
            RejectionReason::ReplayedChallenge => "REPLAYED_CHALLENGE",
            RejectionReason::BadSignature => "BAD_SIGNATURE",
            RejectionReason::SnapshotMismatch => "SNAPSHOT_MISMATCH",
            RejectionReason::ChallengeMismatch => "CHALLENGE_MISMATCH",
            RejectionReason::NotEnrolled => "NOT_ENROLLED",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ProtocolRejection> for RejectionReason {
    fn from(rejection: ProtocolRejection) -> Self {
        match rejection {
            ProtocolRejection::ChallengeMismatch => RejectionReason::ChallengeMismatch,
            ProtocolRejection::Expired => RejectionReason::ExpiredChallenge,
            ProtocolRejection::Replayed => RejectionReason::ReplayedChallenge,
            ProtocolRejection::BadSignature => RejectionReason::BadSignature,
        }
    }
}

/// Final verdict of a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Verified {
        fingerprint_id: String,
        policy_id: String,
    },
    Rejected(RejectionReason),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified { .. })
    }

    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            VerificationOutcome::Rejected(reason) => Some(*reason),
            VerificationOutcome::Verified { .. } => None,
        }
    }
}

/// State of a verification session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    /// Nothing issued yet
    Idle,

    /// A challenge is outstanding for the device
    ChallengeIssued { challenge: Challenge, policy: Policy },

    /// The device answered; checks pending
    ResponseReceived {
        challenge: Challenge,
        policy: Policy,
        response: ChallengeResponse,
    },

    Verified {
        fingerprint_id: String,
        policy_id: String,
        verified_at: u64,
    },

    Rejected {
        reason: RejectionReason,
        rejected_at: u64,
    },
}

impl VerificationState {
    pub fn name(&self) -> &'static str {
        match self {
            VerificationState::Idle => "IDLE",
            VerificationState::ChallengeIssued { .. } => "CHALLENGE_ISSUED",
            VerificationState::ResponseReceived { .. } => "RESPONSE_RECEIVED",
            VerificationState::Verified { .. } => "VERIFIED",
            VerificationState::Rejected { .. } => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationState::Verified { .. } | VerificationState::Rejected { .. }
        )
    }
}

/// Record of a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub from_state: &'static str,
    pub to_state: &'static str,
    pub timestamp: u64,
    pub reason: Option<String>,
}

/// One verification attempt for one device.
///
/// Cloning a session after the response was received yields a second handle
/// on the same challenge and response, which is how a captured response is
/// resubmitted.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    device_id: String,
    state: VerificationState,
    history: Vec<StateTransition>,
}

impl VerificationSession {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            state: VerificationState::Idle,
            history: Vec::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> &VerificationState {
        &self.state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        match &self.state {
            VerificationState::ChallengeIssued { challenge, .. }
            | VerificationState::ResponseReceived { challenge, .. } => Some(challenge),
            _ => None,
        }
    }

    pub fn policy(&self) -> Option<&Policy> {
        match &self.state {
            VerificationState::ChallengeIssued { policy, .. }
            | VerificationState::ResponseReceived { policy, .. } => Some(policy),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&ChallengeResponse> {
        match &self.state {
            VerificationState::ResponseReceived { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Verdict, once the session reached a terminal state.
    pub fn outcome(&self) -> Option<VerificationOutcome> {
        match &self.state {
            VerificationState::Verified {
                fingerprint_id,
                policy_id,
                ..
            } => Some(VerificationOutcome::Verified {
                fingerprint_id: fingerprint_id.clone(),
                policy_id: policy_id.clone(),
            }),
            VerificationState::Rejected { reason, .. } => {
                Some(VerificationOutcome::Rejected(*reason))
            }
            _ => None,
        }
    }

    /// Transition: Idle → ChallengeIssued
    pub fn on_challenge_issued(&mut self, challenge: Challenge, policy: Policy) -> IdentityResult<()> {
        match &self.state {
            VerificationState::Idle => {
                let reason = format!("policy {}", policy.policy_id);
                self.transition(
                    VerificationState::ChallengeIssued { challenge, policy },
                    Some(reason),
                );
                Ok(())
            }
            other => Err(invalid("issue a challenge", other)),
        }
    }

    /// Transition: ChallengeIssued → ResponseReceived
    pub fn on_response_received(&mut self, response: ChallengeResponse) -> IdentityResult<()> {
        match &self.state {
            VerificationState::ChallengeIssued { challenge, policy } => {
                let next = VerificationState::ResponseReceived {
                    challenge: challenge.clone(),
                    policy: policy.clone(),
                    response,
                };
                self.transition(next, None);
                Ok(())
            }
            other => Err(invalid("receive a response", other)),
        }
    }

    /// Transition: ResponseReceived → Verified
    pub fn on_verified(&mut self, fingerprint_id: String) -> IdentityResult<()> {
        match &self.state {
            VerificationState::ResponseReceived { policy, .. } => {
                let next = VerificationState::Verified {
                    fingerprint_id,
                    policy_id: policy.policy_id.clone(),
                    verified_at: current_timestamp_ms(),
                };
                self.transition(next, None);
                Ok(())
            }
            other => Err(invalid("verify", other)),
        }
    }

    /// Transition: any non-terminal state → Rejected
    pub fn on_rejected(&mut self, reason: RejectionReason) -> IdentityResult<()> {
        if self.state.is_terminal() {
            return Err(invalid("reject", &self.state));
        }
        let next = VerificationState::Rejected {
            reason,
            rejected_at: current_timestamp_ms(),
        };
        self.transition(next, Some(reason.as_str().to_string()));
        Ok(())
    }

    fn transition(&mut self, next: VerificationState, reason: Option<String>) {
        let transition = StateTransition {
            from_state: self.state.name(),
            to_state: next.name(),
            timestamp: current_timestamp_ms(),
            reason,
        };
        self.state = next;

        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.remove(0);
        }
        self.history.push(transition);
    }
}

fn invalid(action: &str, state: &VerificationState) -> IdentityError {
    IdentityError::InvalidState(format!("cannot {action} in state {}", state.name()))
}
