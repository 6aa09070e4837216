//! Embedded SQLite backend: sessions, chunks and artifacts in one database
//! file. `INSERT OR REPLACE` on the `(session_id, idx)` key gives chunk
//! overwrite semantics for free.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parcel_core::{ArtifactInfo, FileIdentifier};
use rusqlite::{params, Connection, OptionalExtension};

use super::{artifact_info, ChunkBackend, StoredSession};
use crate::StoreError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id           TEXT PRIMARY KEY,
        total_chunks INTEGER NOT NULL,
        modified_ms  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS chunks (
        session_id TEXT NOT NULL,
        idx        INTEGER NOT NULL,
        payload    BLOB NOT NULL,
        PRIMARY KEY (session_id, idx)
    );
    CREATE TABLE IF NOT EXISTS artifacts (
        name       TEXT PRIMARY KEY,
        data       BLOB NOT NULL,
        size       INTEGER NOT NULL,
        created_ms INTEGER NOT NULL
    );
";

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                context: format!("failed to create {}", parent.display()),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-applied: every multi-step
        // write runs inside a transaction.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ChunkBackend for SqliteBackend {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn load_session(&self, id: &FileIdentifier) -> Result<Option<u32>, StoreError> {
        let total = self
            .conn()
            .query_row(
                "SELECT total_chunks FROM sessions WHERE id = ?1",
                params![id.as_str()],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(total)
    }

    fn create_session(&self, id: &FileIdentifier, total_chunks: u32) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO sessions (id, total_chunks, modified_ms) VALUES (?1, ?2, ?3)",
            params![id.as_str(), total_chunks, now_ms()],
        )?;
        Ok(())
    }

    fn put_chunk(&self, id: &FileIdentifier, index: u32, payload: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO chunks (session_id, idx, payload) VALUES (?1, ?2, ?3)",
            params![id.as_str(), index, payload],
        )?;
        tx.execute(
            "UPDATE sessions SET modified_ms = ?2 WHERE id = ?1",
            params![id.as_str(), now_ms()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn chunk_count(&self, id: &FileIdentifier) -> Result<u32, StoreError> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM chunks WHERE session_id = ?1",
            params![id.as_str()],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    fn read_chunk(&self, id: &FileIdentifier, index: u32) -> Result<Option<Bytes>, StoreError> {
        let payload = self
            .conn()
            .query_row(
                "SELECT payload FROM chunks WHERE session_id = ?1 AND idx = ?2",
                params![id.as_str(), index],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(payload.map(Bytes::from))
    }

    fn discard_session(&self, id: &FileIdentifier) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE session_id = ?1", params![id.as_str()])?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<StoredSession>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.total_chunks, s.modified_ms,
                    (SELECT COUNT(*) FROM chunks c WHERE c.session_id = s.id)
             FROM sessions s",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, u32>(3)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (raw_id, total_chunks, modified_ms, uploaded_chunks) = row?;
            let Ok(id) = FileIdentifier::parse(&raw_id) else {
                tracing::warn!(id = raw_id, "skipping session with invalid identifier");
                continue;
            };
            sessions.push(StoredSession {
                id,
                total_chunks,
                uploaded_chunks,
                modified: UNIX_EPOCH + Duration::from_millis(modified_ms.max(0) as u64),
            });
        }
        Ok(sessions)
    }

    fn commit_artifact(&self, id: &FileIdentifier, parts: &[Bytes]) -> Result<ArtifactInfo, StoreError> {
        let data: Vec<u8> = parts.concat();
        let size = data.len() as u64;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO artifacts (name, data, size, created_ms) VALUES (?1, ?2, ?3, ?4)",
            params![id.as_str(), data, size as i64, now_ms()],
        )?;
        tx.execute("DELETE FROM chunks WHERE session_id = ?1", params![id.as_str()])?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;

        Ok(artifact_info(id, size))
    }

    fn find_artifact(&self, id: &FileIdentifier) -> Result<Option<ArtifactInfo>, StoreError> {
        let size = self
            .conn()
            .query_row(
                "SELECT size FROM artifacts WHERE name = ?1",
                params![id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(size.map(|s| artifact_info(id, s as u64)))
    }

    fn read_artifact(&self, id: &FileIdentifier) -> Result<Option<Bytes>, StoreError> {
        let data = self
            .conn()
            .query_row(
                "SELECT data FROM artifacts WHERE name = ?1",
                params![id.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(data.map(Bytes::from))
    }

    fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name, size FROM artifacts ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (name, size) = row?;
            if let Ok(id) = FileIdentifier::parse(&name) {
                out.push(artifact_info(&id, size as u64));
            }
        }
        Ok(out)
    }
}
