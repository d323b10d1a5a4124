use rusqlite::{params, OptionalExtension};

use super::{AllowListStore, SqliteStore};
use crate::error::{GateError, GateResult};
use crate::plate_detection::normalize;

impl AllowListStore for SqliteStore {
    fn lookup(&self, plate: &str) -> GateResult<Option<i64>> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM allowed_plates WHERE plate_text = ?1",
                params![plate],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

impl SqliteStore {
    /// Adds a plate, normalizing it first. Returns `false` if it was already
    /// allowed.
    pub fn insert(&self, plate: &str) -> GateResult<bool> {
        let plate = normalized(plate)?;
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO allowed_plates (plate_text) VALUES (?1)",
            params![plate],
        )?;
        Ok(changed > 0)
    }

    /// Returns `false` if the plate was not on the list.
    pub fn remove(&self, plate: &str) -> GateResult<bool> {
        let plate = normalized(plate)?;
        let changed = self.conn().execute(
            "DELETE FROM allowed_plates WHERE plate_text = ?1",
            params![plate],
        )?;
        Ok(changed > 0)
    }

    pub fn list(&self) -> GateResult<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT plate_text FROM allowed_plates ORDER BY plate_text")?;
        let plates = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(plates)
    }
}

fn normalized(plate: &str) -> GateResult<String> {
    let text = normalize(plate);
    if text.is_empty() {
        return Err(GateError::InvalidPlate(plate.to_string()));
    }
    Ok(text)
}
