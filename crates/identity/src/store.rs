//! Durable fingerprint store backed by SQLite.
//!
//! One database file holds three tables:
//! - `fingerprints`: one row per device, the sealed enrollment snapshot
//! - `policies`: the policy generated for each live enrollment
//! - `audit_events`: append-only history of enrollments and verifications
//!
//! # Guarantees
//!
//! - Writes go through a single connection behind a mutex, so concurrent
//!   writers for the same device serialize (last writer wins).
//! - A re-enrollment replaces the record and its policy in one transaction;
//!   readers see either the old pair or the new pair, never a mix.
//! - Reads open short-lived read-only connections and run concurrently with
//!   each other. WAL mode lets them proceed while a write is in flight.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pcrbind_crypto::SealedBlob;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditKind};
use crate::error::{StoreError, StoreResult};
use crate::policy::Policy;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persisted enrollment record. The derivation key is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    pub fingerprint_id: String,
    pub device_id: String,
    pub encrypted_snapshot: SealedBlob,
    pub policy_id: String,
    /// Unix milliseconds
    pub created_at: u64,
}

/// Column values as read from SQLite, before decoding.
struct RawFingerprint {
    fingerprint_id: String,
    device_id: String,
    encrypted_snapshot: Vec<u8>,
    policy_id: String,
    created_at: i64,
}

impl RawFingerprint {
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            fingerprint_id: row.get(offset)?,
            device_id: row.get(offset + 1)?,
            encrypted_snapshot: row.get(offset + 2)?,
            policy_id: row.get(offset + 3)?,
            created_at: row.get(offset + 4)?,
        })
    }

    fn decode(self) -> StoreResult<DeviceFingerprint> {
        let encrypted_snapshot = SealedBlob::from_bytes(&self.encrypted_snapshot).map_err(|e| {
            StoreError::Corrupt(format!("snapshot for {}: {e}", self.device_id))
        })?;
        Ok(DeviceFingerprint {
            fingerprint_id: self.fingerprint_id,
            device_id: self.device_id,
            encrypted_snapshot,
            policy_id: self.policy_id,
            created_at: self.created_at as u64,
        })
    }
}

struct RawPolicy {
    policy_id: String,
    permitted_pcrs: String,
    freshness_window_ms: i64,
    created_at: i64,
}

impl RawPolicy {
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            policy_id: row.get(offset)?,
            permitted_pcrs: row.get(offset + 1)?,
            freshness_window_ms: row.get(offset + 2)?,
            created_at: row.get(offset + 3)?,
        })
    }

    fn decode(self) -> StoreResult<Policy> {
        Ok(Policy {
            permitted_pcrs: serde_json::from_str(&self.permitted_pcrs)?,
            policy_id: self.policy_id,
            freshness_window_ms: self.freshness_window_ms as u64,
            created_at: self.created_at as u64,
        })
    }
}

const FINGERPRINT_COLUMNS: &str =
    "f.fingerprint_id, f.device_id, f.encrypted_snapshot, f.policy_id, f.created_at";
const POLICY_COLUMNS: &str = "p.policy_id, p.permitted_pcrs, p.freshness_window_ms, p.created_at";

/// SQLite-backed store of enrollment records, policies and audit events.
pub struct FingerprintStore {
    path: PathBuf,
    writer: Mutex<Connection>,
}

impl std::fmt::Debug for FingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FingerprintStore {
    /// Create or open the store at `path`.
    ///
    /// Any failure here (unwritable directory, unreadable database, schema
    /// error) is fatal for the caller.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "Opening fingerprint store");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            path,
            writer: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS policies (
                policy_id TEXT PRIMARY KEY,
                permitted_pcrs TEXT NOT NULL,
                freshness_window_ms INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fingerprints (
                device_id TEXT PRIMARY KEY,
                fingerprint_id TEXT NOT NULL UNIQUE,
                encrypted_snapshot BLOB NOT NULL,
                policy_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_events (
                seq_no INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_device ON audit_events(device_id);
            "#,
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Store `record` with its `policy`, replacing any prior enrollment of the
    /// same device together with its policy. Returns whether a record was
    /// replaced.
    pub fn put(&self, record: &DeviceFingerprint, policy: &Policy) -> StoreResult<bool> {
        if record.policy_id != policy.policy_id {
            return Err(StoreError::Corrupt(format!(
                "record references policy {} but {} was supplied",
                record.policy_id, policy.policy_id
            )));
        }

        let mut conn = self.writer();
        let tx = conn.transaction()?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT device_id FROM fingerprints WHERE fingerprint_id = ?1",
                params![record.fingerprint_id],
                |row| row.get(0),
            )
            .optional()?;
        if owner.as_deref().is_some_and(|owner| owner != record.device_id) {
            return Err(StoreError::DuplicateFingerprint {
                fingerprint_id: record.fingerprint_id.clone(),
            });
        }

        let prior_policy: Option<String> = tx
            .query_row(
                "SELECT policy_id FROM fingerprints WHERE device_id = ?1",
                params![record.device_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(prior_policy) = &prior_policy {
            tx.execute(
                "DELETE FROM fingerprints WHERE device_id = ?1",
                params![record.device_id],
            )?;
            tx.execute(
                "DELETE FROM policies WHERE policy_id = ?1",
                params![prior_policy],
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO policies (policy_id, permitted_pcrs, freshness_window_ms, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                policy.policy_id,
                serde_json::to_string(&policy.permitted_pcrs)?,
                policy.freshness_window_ms as i64,
                policy.created_at as i64,
            ],
        )?;
        tx.execute(
            r#"
            INSERT INTO fingerprints (
                device_id, fingerprint_id, encrypted_snapshot, policy_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.device_id,
                record.fingerprint_id,
                record.encrypted_snapshot.to_bytes(),
                record.policy_id,
                record.created_at as i64,
            ],
        )?;
        tx.commit()?;

        debug!(
            device_id = %record.device_id,
            policy_id = %record.policy_id,
            replaced = prior_policy.is_some(),
            "Fingerprint stored"
        );
        Ok(prior_policy.is_some())
    }

    pub fn get(&self, device_id: &str) -> StoreResult<DeviceFingerprint> {
        let conn = self.reader()?;
        let raw = conn
            .query_row(
                &format!("SELECT {FINGERPRINT_COLUMNS} FROM fingerprints f WHERE f.device_id = ?1"),
                params![device_id],
                |row| RawFingerprint::from_row(row, 0),
            )
            .optional()?;
        raw.ok_or_else(|| StoreError::NotFound {
            device_id: device_id.to_string(),
        })?
        .decode()
    }

    pub fn get_policy(&self, policy_id: &str) -> StoreResult<Policy> {
        let conn = self.reader()?;
        let raw = conn
            .query_row(
                &format!("SELECT {POLICY_COLUMNS} FROM policies p WHERE p.policy_id = ?1"),
                params![policy_id],
                |row| RawPolicy::from_row(row, 0),
            )
            .optional()?;
        raw.ok_or_else(|| StoreError::PolicyNotFound {
            policy_id: policy_id.to_string(),
        })?
        .decode()
    }

    /// Record and policy read in one statement, so both come from the same
    /// enrollment.
    pub fn get_with_policy(&self, device_id: &str) -> StoreResult<(DeviceFingerprint, Policy)> {
        let conn = self.reader()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {FINGERPRINT_COLUMNS}, {POLICY_COLUMNS} \
                     FROM fingerprints f LEFT JOIN policies p ON p.policy_id = f.policy_id \
                     WHERE f.device_id = ?1"
                ),
                params![device_id],
                |row| {
                    let record = RawFingerprint::from_row(row, 0)?;
                    let policy = match row.get::<_, Option<String>>(5)? {
                        Some(_) => Some(RawPolicy::from_row(row, 5)?),
                        None => None,
                    };
                    Ok((record, policy))
                },
            )
            .optional()?;

        let (record, policy) = raw.ok_or_else(|| StoreError::NotFound {
            device_id: device_id.to_string(),
        })?;
        let record = record.decode()?;
        let policy = policy
            .ok_or_else(|| StoreError::PolicyNotFound {
                policy_id: record.policy_id.clone(),
            })?
            .decode()?;
        Ok((record, policy))
    }

    /// Remove a device's record and its policy. Returns whether one existed.
    pub fn delete(&self, device_id: &str) -> StoreResult<bool> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;

        let policy_id: Option<String> = tx
            .query_row(
                "SELECT policy_id FROM fingerprints WHERE device_id = ?1",
                params![device_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(policy_id) = policy_id else {
            return Ok(false);
        };

        tx.execute(
            "DELETE FROM fingerprints WHERE device_id = ?1",
            params![device_id],
        )?;
        tx.execute("DELETE FROM policies WHERE policy_id = ?1", params![policy_id])?;
        tx.commit()?;

        debug!(device_id = %device_id, "Fingerprint deleted");
        Ok(true)
    }

    /// All records, ordered by device id.
    pub fn list(&self) -> StoreResult<Vec<DeviceFingerprint>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FINGERPRINT_COLUMNS} FROM fingerprints f ORDER BY f.device_id"
        ))?;
        let rows = stmt
            .query_map([], |row| RawFingerprint::from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawFingerprint::decode).collect()
    }

    pub fn contains_fingerprint_id(&self, fingerprint_id: &str) -> StoreResult<bool> {
        let conn = self.reader()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM fingerprints WHERE fingerprint_id = ?1",
                params![fingerprint_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Append an audit event, returning its sequence number.
    pub fn append_audit(
        &self,
        device_id: &str,
        kind: AuditKind,
        detail: &str,
        timestamp: u64,
    ) -> StoreResult<u64> {
        let conn = self.writer();
        conn.execute(
            "INSERT INTO audit_events (device_id, kind, detail, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![device_id, kind.as_str(), detail, timestamp as i64],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    /// Audit events for `device_id`, oldest first.
    pub fn audit_trail(&self, device_id: &str) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT seq_no, device_id, kind, detail, timestamp
            FROM audit_events
            WHERE device_id = ?1
            ORDER BY seq_no ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![device_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(seq_no, device_id, kind, detail, timestamp)| {
                let kind = AuditKind::parse(&kind)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown audit kind {kind}")))?;
                Ok(AuditEvent {
                    seq_no: seq_no as u64,
                    device_id,
                    kind,
                    detail,
                    timestamp: timestamp as u64,
                })
            })
            .collect()
    }
}
