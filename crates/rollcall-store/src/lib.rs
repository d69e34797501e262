//! rollcall-store: SQLite-backed [`IdentityStore`].
//!
//! Descriptors are stored as little-endian `f32` blobs alongside their
//! dimension and the model version that produced them.

use chrono::{DateTime, Local};
use rollcall_core::{Descriptor, IdentityRecord, IdentityStore, StoreError};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories
    /// and the schema as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "identity store opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn()
            .execute_batch(
                r#"
                PRAGMA foreign_keys=ON;

                CREATE TABLE IF NOT EXISTS identities (
                  id TEXT PRIMARY KEY,
                  label TEXT NOT NULL UNIQUE,
                  attributes TEXT NOT NULL,
                  created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS descriptors (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
                  model_version TEXT,
                  dim INTEGER NOT NULL,
                  data BLOB NOT NULL,
                  created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_descriptors_identity ON descriptors(identity_id);
                "#,
            )
            .map_err(backend)
    }

    pub fn identity_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))
            .map_err(backend)?;
        Ok(n as usize)
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn encode_values(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_values(blob: &[u8], dim: usize) -> Option<Vec<f32>> {
    if blob.len() != dim * 4 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn parse_time(id: &str, raw: &str) -> Result<DateTime<Local>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Local))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn insert_descriptor(
    conn: &Connection,
    identity_id: &str,
    descriptor: &Descriptor,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO descriptors (identity_id, model_version, dim, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            identity_id,
            descriptor.model_version,
            descriptor.len() as i64,
            encode_values(&descriptor.values),
            Local::now().to_rfc3339(),
        ],
    )
}

impl IdentityStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare("SELECT id, label, attributes, created_at FROM identities ORDER BY rowid ASC")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(backend)?;

        let mut records = Vec::new();
        for row in rows {
            let (id, label, attributes, created_at) = row.map_err(backend)?;
            let attributes: BTreeMap<String, String> =
                serde_json::from_str(&attributes).map_err(|e| StoreError::Corrupt {
                    id: id.clone(),
                    reason: format!("bad attributes: {e}"),
                })?;
            let created_at = parse_time(&id, &created_at)?;
            records.push(IdentityRecord {
                id,
                label,
                attributes,
                descriptors: Vec::new(),
                created_at,
            });
        }

        let mut stmt = conn
            .prepare(
                "SELECT model_version, dim, data FROM descriptors
                 WHERE identity_id = ?1 ORDER BY id ASC",
            )
            .map_err(backend)?;
        for record in &mut records {
            let rows = stmt
                .query_map(params![record.id], |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })
                .map_err(backend)?;
            for row in rows {
                let (model_version, dim, data) = row.map_err(backend)?;
                let values = usize::try_from(dim)
                    .ok()
                    .and_then(|dim| decode_values(&data, dim))
                    .ok_or_else(|| StoreError::Corrupt {
                        id: record.id.clone(),
                        reason: format!("descriptor blob of {} bytes for dim {dim}", data.len()),
                    })?;
                record.descriptors.push(Descriptor {
                    values,
                    model_version,
                });
            }
        }

        tracing::debug!(identities = records.len(), "identities loaded");
        Ok(records)
    }

    fn insert_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let attributes = serde_json::to_string(&record.attributes)
            .map_err(|e| StoreError::Backend(format!("cannot encode attributes: {e}")))?;

        let tx = conn.transaction().map_err(backend)?;
        tx.execute(
            "INSERT INTO identities (id, label, attributes, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.label, attributes, record.created_at.to_rfc3339()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateLabel(record.label.clone())
            } else {
                backend(e)
            }
        })?;
        for descriptor in &record.descriptors {
            insert_descriptor(&tx, &record.id, descriptor).map_err(backend)?;
        }
        tx.commit().map_err(backend)?;

        tracing::debug!(
            identity = %record.id,
            label = %record.label,
            descriptors = record.descriptors.len(),
            "identity stored"
        );
        Ok(())
    }

    fn append(&self, identity_id: &str, descriptor: &Descriptor) -> Result<(), StoreError> {
        let conn = self.conn();
        let exists = conn
            .query_row(
                "SELECT 1 FROM identities WHERE id = ?1",
                params![identity_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(backend)?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound(identity_id.to_string()));
        }
        insert_descriptor(&conn, identity_id, descriptor).map_err(backend)?;
        Ok(())
    }
}
