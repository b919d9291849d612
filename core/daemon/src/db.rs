//! SQLite persistence for the qmon daemon.
//!
//! One `kv` table holds every persisted store as a JSON document. The engine
//! treats each key independently, so writes are plain upserts with no
//! transaction spanning keys.

use chrono::Utc;
use qmon_core::{KvStore, MonitorError};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::PathBuf;

pub struct Db {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRow {
    pub key: String,
    pub bytes: usize,
    pub updated_at: String,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>, String> {
        self.with_connection(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|err| format!("Failed to read key {}: {}", key, err))
        })
    }

    pub fn put_value(&self, key: &str, value: &str) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET \
                    value = excluded.value, \
                    updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map_err(|err| format!("Failed to write key {}: {}", key, err))?;
            Ok(())
        })
    }

    pub fn delete_value(&self, key: &str) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|err| format!("Failed to delete key {}: {}", key, err))?;
            Ok(())
        })
    }

    pub fn delete_all(&self) -> Result<usize, String> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv", [])
                .map_err(|err| format!("Failed to clear kv table: {}", err))
        })
    }

    pub fn list_keys(&self) -> Result<Vec<KeyRow>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT key, length(value), updated_at FROM kv ORDER BY key ASC")
                .map_err(|err| format!("Failed to prepare kv query: {}", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(KeyRow {
                        key: row.get(0)?,
                        bytes: row.get::<_, i64>(1)?.max(0) as usize,
                        updated_at: row.get(2)?,
                    })
                })
                .map_err(|err| format!("Failed to read kv rows: {}", err))?;

            let mut keys = Vec::new();
            for row in rows {
                keys.push(row.map_err(|err| format!("Failed to decode kv row: {}", err))?);
            }
            Ok(keys)
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create qmon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl KvStore for Db {
    fn get(&self, key: &str) -> qmon_core::Result<Option<String>> {
        self.get_value(key).map_err(MonitorError::StoreUnavailable)
    }

    fn set(&mut self, key: &str, value: &str) -> qmon_core::Result<()> {
        self.put_value(key, value)
            .map_err(|details| MonitorError::StoreWrite {
                key: key.to_string(),
                details,
            })
    }

    fn remove(&mut self, key: &str) -> qmon_core::Result<()> {
        self.delete_value(key)
            .map_err(|details| MonitorError::StoreWrite {
                key: key.to_string(),
                details,
            })
    }

    fn clear(&mut self) -> qmon_core::Result<()> {
        self.delete_all()
            .map(|removed| tracing::debug!(removed, "Cleared kv table"))
            .map_err(MonitorError::StoreUnavailable)
    }
}
