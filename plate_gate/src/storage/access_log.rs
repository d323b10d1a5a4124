use chrono::NaiveDateTime;
use rusqlite::params;

use super::{AuditLog, SqliteStore};
use crate::error::GateResult;

/// One row of the access history.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessEvent {
    pub id: i64,
    /// UTC, stamped by the database when the row was written.
    pub timestamp: NaiveDateTime,
    /// `None` when OCR produced nothing usable for the box.
    pub plate: Option<String>,
    pub confidence: f64,
    pub allowed: bool,
}

impl AuditLog for SqliteStore {
    fn append(&self, plate: Option<&str>, confidence: f32, allowed: bool) -> GateResult<()> {
        self.conn().execute(
            "INSERT INTO access_log (timestamp, plate_text, confidence, allowed) \
             VALUES (datetime('now'), ?1, ?2, ?3)",
            params![plate, f64::from(confidence), allowed],
        )?;
        Ok(())
    }
}

impl SqliteStore {
    /// Latest events first.
    pub fn recent(&self, limit: usize) -> GateResult<Vec<AccessEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, timestamp, plate_text, confidence, allowed FROM access_log \
             ORDER BY id DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AccessEvent {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    plate: row.get(2)?,
                    confidence: row.get(3)?,
                    allowed: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}
