//! SQLite persistence: the allow-list and the access audit log.
//!
//! Both tables are created on open if they do not exist yet and are never
//! migrated.

pub mod access_log;
pub mod allow_list;

use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

use crate::error::GateResult;

pub use access_log::AccessEvent;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS allowed_plates (
    id INTEGER PRIMARY KEY,
    plate_text TEXT UNIQUE
);
CREATE TABLE IF NOT EXISTS access_log (
    id INTEGER PRIMARY KEY,
    timestamp TEXT,
    plate_text TEXT,
    confidence REAL,
    allowed INTEGER
);
";

/// Exact-match lookup of normalized plates.
pub trait AllowListStore {
    /// Row id of the plate if it is allowed.
    fn lookup(&self, plate: &str) -> GateResult<Option<i64>>;
}

/// Append-only access history. The store stamps each row.
pub trait AuditLog {
    fn append(&self, plate: Option<&str>, confidence: f32, allowed: bool) -> GateResult<()>;
}

/// Everything the gate loop needs from storage.
pub trait GateStore: AllowListStore + AuditLog {}

impl<T: AllowListStore + AuditLog> GateStore for T {}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        debug!("Opening gate database {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> GateResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> GateResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
