use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::util::now_utc_string;

/// Durable record that a stage finished over the whole table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageMarker {
    pub stage: String,
    pub rows_processed: i64,
    pub checksum: String,
    pub completed_at: String,
}

pub fn load_marker(connection: &Connection, stage: &str) -> Result<Option<StageMarker>> {
    let marker = connection
        .query_row(
            "SELECT stage, rows_processed, checksum, completed_at FROM stage_runs WHERE stage = ?1",
            params![stage],
            |row| {
                Ok(StageMarker {
                    stage: row.get(0)?,
                    rows_processed: row.get(1)?,
                    checksum: row.get(2)?,
                    completed_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(marker)
}

pub fn load_markers(connection: &Connection) -> Result<Vec<StageMarker>> {
    let mut statement = connection.prepare(
        "SELECT stage, rows_processed, checksum, completed_at FROM stage_runs ORDER BY completed_at, stage",
    )?;
    let markers = statement
        .query_map([], |row| {
            Ok(StageMarker {
                stage: row.get(0)?,
                rows_processed: row.get(1)?,
                checksum: row.get(2)?,
                completed_at: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<StageMarker>>>()?;
    Ok(markers)
}

/// Upserts the marker. Callers pass the transaction holding the stage's
/// final writes so the marker commits together with them.
pub fn write_marker(
    connection: &Connection,
    stage: &str,
    rows_processed: i64,
    checksum: &str,
) -> Result<()> {
    connection.execute(
        "
        INSERT INTO stage_runs(stage, rows_processed, checksum, completed_at)
        VALUES(?1, ?2, ?3, ?4)
        ON CONFLICT(stage) DO UPDATE SET
          rows_processed=excluded.rows_processed,
          checksum=excluded.checksum,
          completed_at=excluded.completed_at
        ",
        params![stage, rows_processed, checksum, now_utc_string()],
    )?;
    Ok(())
}

pub fn clear_marker(connection: &Connection, stage: &str) -> Result<()> {
    connection.execute("DELETE FROM stage_runs WHERE stage = ?1", params![stage])?;
    Ok(())
}
