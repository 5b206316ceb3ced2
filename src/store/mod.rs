//! SQLite row store: connection setup, schema migrations, stage markers and
//! the row-level reads and writes the stages share.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::util::ensure_parent_directory;

mod markers;
mod migrations;
mod movies;

pub use markers::{clear_marker, load_marker, load_markers, write_marker};
pub use migrations::{apply_migrations, current_schema_version};
pub use movies::{
    MovieKey, apply_omdb_match, apply_tmdb_match, columns_checksum, enrichment_coverage,
    load_movie_summary, load_movie_texts, load_omdb_pending, load_tmdb_pending,
};

/// Opens (creating if needed) the row store and brings its schema up to date.
pub fn open_store(db_path: &Path) -> Result<Connection> {
    ensure_parent_directory(db_path)?;

    let mut connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;

    let version = apply_migrations(&mut connection)?;
    info!(path = %db_path.display(), schema_version = version, "row store ready");

    Ok(connection)
}

/// Opens an existing store without migrating it. Used by read-only commands.
pub fn open_existing_store(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        anyhow::bail!("row store not found: {}", db_path.display());
    }

    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    Ok(connection)
}

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")?;
    Ok(())
}

pub fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}

pub fn count_movies(connection: &Connection) -> Result<i64> {
    count_rows(connection, "SELECT COUNT(*) FROM movies")
}

#[cfg(test)]
pub(crate) fn open_test_store() -> Connection {
    let mut connection = Connection::open_in_memory().expect("in-memory DB should open");
    configure_connection(&connection).expect("pragmas should apply");
    apply_migrations(&mut connection).expect("migrations should apply");
    connection
}
