//! Per-enrollment verification policy.

use pcrbind_core::{current_timestamp_ms, PcrIndex};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Length of a generated policy id, in random bytes.
pub const POLICY_ID_LEN: usize = 16;

/// Immutable policy generated alongside each enrollment.
///
/// `permitted_pcrs` is the exact register set read at enrollment and at every
/// verification of the device. `freshness_window_ms` is the lifetime of every
/// challenge issued for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub permitted_pcrs: Vec<PcrIndex>,
    pub freshness_window_ms: u64,
    pub created_at: u64,
}

impl Policy {
    /// New policy with a random 128-bit id.
    pub fn generate(permitted_pcrs: Vec<PcrIndex>, freshness_window_ms: u64) -> Self {
        let mut id = [0u8; POLICY_ID_LEN];
        OsRng.fill_bytes(&mut id);

        let mut permitted_pcrs = permitted_pcrs;
        permitted_pcrs.sort_unstable();
        permitted_pcrs.dedup();

        Self {
            policy_id: hex::encode(id),
            permitted_pcrs,
            freshness_window_ms,
            created_at: current_timestamp_ms(),
        }
    }
}
