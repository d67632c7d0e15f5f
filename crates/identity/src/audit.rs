//! Audit trail entries persisted alongside fingerprint records.

use serde::{Deserialize, Serialize};

/// What happened to a device's enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Enrolled,
    Reenrolled,
    Deleted,
    Verified,
    Rejected,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Enrolled => "ENROLLED",
            AuditKind::Reenrolled => "REENROLLED",
            AuditKind::Deleted => "DELETED",
            AuditKind::Verified => "VERIFIED",
            AuditKind::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "ENROLLED" => AuditKind::Enrolled,
            "REENROLLED" => AuditKind::Reenrolled,
            "DELETED" => AuditKind::Deleted,
            "VERIFIED" => AuditKind::Verified,
            "REJECTED" => AuditKind::Rejected,
            _ => return None,
        })
    }
}

/// One row of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Assigned by the store, strictly increasing
    pub seq_no: u64,
    pub device_id: String,
    pub kind: AuditKind,
    /// Free-form detail, e.g. the rejection reason or policy id
    pub detail: String,
    /// Unix milliseconds
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_text() {
        for kind in [
            AuditKind::Enrolled,
            AuditKind::Reenrolled,
            AuditKind::Deleted,
            AuditKind::Verified,
            AuditKind::Rejected,
        ] {
            assert_eq!(AuditKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AuditKind::parse("enrolled"), None);
    }
}
