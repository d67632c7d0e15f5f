//! Tampering with persisted records, directly through SQLite.

use rusqlite::{params, Connection};

use crate::test_utils::*;
use pcrbind_identity::{IdentityError, RejectionReason, StoreError};

fn read_blob(conn: &Connection, device_id: &str) -> Vec<u8> {
    conn.query_row(
        "SELECT encrypted_snapshot FROM fingerprints WHERE device_id = ?1",
        params![device_id],
        |row| row.get(0),
    )
    .unwrap()
}

fn write_blob(conn: &Connection, device_id: &str, blob: &[u8]) {
    conn.execute(
        "UPDATE fingerprints SET encrypted_snapshot = ?1 WHERE device_id = ?2",
        params![blob, device_id],
    )
    .unwrap();
}

#[test]
fn test_flipped_bits_in_stored_blob() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");
    let conn = Connection::open(fixture.database_path()).unwrap();
    let original = read_blob(&conn, "dev-1");

    // Nonce, ciphertext body and tag.
    for position in [0, original.len() / 2, original.len() - 1] {
        let mut tampered = original.clone();
        tampered[position] ^= 0x01;
        write_blob(&conn, "dev-1", &tampered);

        assert_eq!(
            fixture.verifier.verify("dev-1").unwrap().rejection(),
            Some(RejectionReason::SnapshotMismatch),
            "flip at byte {position} went undetected"
        );
    }

    write_blob(&conn, "dev-1", &original);
    assert!(fixture.verifier.verify("dev-1").unwrap().is_verified());
}

#[test]
fn test_blob_transplanted_between_devices() {
    let fixture = TestVerifier::new();
    // Identical measurements, so both records are sealed under the same key.
    fixture.enroll_baseline("dev-1");
    fixture.enroll_baseline("dev-2");

    let conn = Connection::open(fixture.database_path()).unwrap();
    let foreign = read_blob(&conn, "dev-2");
    write_blob(&conn, "dev-1", &foreign);

    assert_eq!(
        fixture.verifier.verify("dev-1").unwrap().rejection(),
        Some(RejectionReason::SnapshotMismatch)
    );
    assert!(fixture.verifier.verify("dev-2").unwrap().is_verified());
}

#[test]
fn test_policy_swapped_to_other_record() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");
    fixture.enroll_baseline("dev-2");

    let conn = Connection::open(fixture.database_path()).unwrap();
    let other_policy: String = conn
        .query_row(
            "SELECT policy_id FROM fingerprints WHERE device_id = 'dev-2'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    conn.execute(
        "UPDATE fingerprints SET policy_id = ?1 WHERE device_id = 'dev-1'",
        params![other_policy],
    )
    .unwrap();

    assert_eq!(
        fixture.verifier.verify("dev-1").unwrap().rejection(),
        Some(RejectionReason::SnapshotMismatch)
    );
}

#[test]
fn test_truncated_blob_is_corrupt_record() {
    let fixture = TestVerifier::new();
    fixture.enroll_baseline("dev-1");

    let conn = Connection::open(fixture.database_path()).unwrap();
    write_blob(&conn, "dev-1", &[0u8; 8]);

    assert!(matches!(
        fixture.verifier.verify("dev-1"),
        Err(IdentityError::Store(StoreError::Corrupt(_)))
    ));
}
