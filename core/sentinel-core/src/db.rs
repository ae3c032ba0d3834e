//! SQLite-backed `RecordStore`.
//!
//! One row per collection holding the JSON snapshot. A save is a single
//! upsert, so every snapshot replacement is atomic.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use sentinel_protocol::TrackedRecord;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Result, SentinelError};
use crate::store::RecordStore;

pub struct SqliteStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

fn sqlite(context: &str) -> impl FnOnce(rusqlite::Error) -> SentinelError + '_ {
    move |source| SentinelError::Sqlite {
        context: context.to_string(),
        source,
    }
}

impl SqliteStore {
    pub fn new(path: PathBuf, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Self { path, clock };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Collection names with a stored snapshot.
    pub fn collections(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM collections ORDER BY name")
                .map_err(sqlite("prepare collection list"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sqlite("list collections"))?;
            let mut names = Vec::new();
            for row in rows {
                names.push(row.map_err(sqlite("decode collection name"))?);
            }
            Ok(names)
        })
    }

    /// When the snapshot for `collection` was last written.
    pub fn updated_at(&self, collection: &str) -> Result<Option<DateTime<Utc>>> {
        let stamp: Option<String> = self.with_connection(|conn| {
            conn.query_row(
                "SELECT updated_at FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite("load collection timestamp"))
        })?;

        stamp
            .map(|stamp| {
                DateTime::parse_from_rfc3339(&stamp)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|err| SentinelError::Io {
                        context: format!("decode timestamp for collection {collection}"),
                        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
                    })
            })
            .transpose()
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS collections (
                    name TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    record_count INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                 );",
            )
            .map_err(sqlite("initialize schema"))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| SentinelError::Io {
                context: "create store directory".to_string(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn =
            Connection::open_with_flags(&self.path, flags).map_err(sqlite("open sqlite db"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sqlite("enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(sqlite("set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(sqlite("set busy_timeout"))?;

        Ok(conn)
    }
}

impl RecordStore for SqliteStore {
    fn load(&self, collection: &str) -> Result<Vec<TrackedRecord>> {
        let payload: Option<String> = self.with_connection(|conn| {
            conn.query_row(
                "SELECT payload FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite("load collection"))
        })?;

        match payload {
            Some(payload) => {
                serde_json::from_str(&payload).map_err(|source| SentinelError::Json {
                    context: format!("decode collection {collection}"),
                    source,
                })
            }
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, collection: &str, records: &[TrackedRecord]) -> Result<()> {
        let payload = serde_json::to_string(records).map_err(|source| SentinelError::Json {
            context: format!("encode collection {collection}"),
            source,
        })?;

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO collections (name, payload, record_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    payload = excluded.payload,
                    record_count = excluded.record_count,
                    updated_at = excluded.updated_at",
                params![
                    collection,
                    payload,
                    records.len() as i64,
                    self.clock.now().to_rfc3339()
                ],
            )
            .map_err(sqlite("save collection"))?;
            Ok(())
        })
    }
}
