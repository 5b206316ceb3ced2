use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::util::now_utc_string;

pub const LATEST_SCHEMA_VERSION: u32 = 4;

struct Migration {
    version: u32,
    name: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "base_tables",
        apply: create_base_tables,
    },
    Migration {
        version: 2,
        name: "tmdb_enrichment_columns",
        apply: add_tmdb_columns,
    },
    Migration {
        version: 3,
        name: "omdb_enrichment_columns",
        apply: add_omdb_columns,
    },
    Migration {
        version: 4,
        name: "stage_runs",
        apply: create_stage_runs,
    },
];

/// Applies every pending migration, each in its own transaction, and
/// returns the resulting schema version.
pub fn apply_migrations(connection: &mut Connection) -> Result<u32> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
          version INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          applied_at TEXT NOT NULL
        );
        ",
    )?;

    let mut current = current_schema_version(connection)?;
    if current > LATEST_SCHEMA_VERSION {
        bail!(
            "row store schema version {current} is newer than supported version {LATEST_SCHEMA_VERSION}"
        );
    }

    let start = current;
    for migration in MIGRATIONS.iter().filter(|m| m.version > start) {
        let tx = connection.transaction()?;
        (migration.apply)(&tx).with_context(|| {
            format!(
                "migration {} ({}) failed",
                migration.version, migration.name
            )
        })?;
        tx.execute(
            "INSERT INTO schema_migrations(version, name, applied_at) VALUES(?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_string()],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
        current = migration.version;
    }

    Ok(current)
}

pub fn current_schema_version(connection: &Connection) -> Result<u32> {
    let version = connection
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<u32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);
    Ok(version)
}

fn create_base_tables(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS movies (
          id INTEGER PRIMARY KEY,
          title TEXT NOT NULL,
          year INTEGER,
          avg_rating REAL,
          imdb_url TEXT
        );

        CREATE TABLE IF NOT EXISTS genres (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS movie_genre (
          movie_id INTEGER NOT NULL,
          genre_id INTEGER NOT NULL,
          PRIMARY KEY (movie_id, genre_id),
          FOREIGN KEY (movie_id) REFERENCES movies(id) ON DELETE CASCADE,
          FOREIGN KEY (genre_id) REFERENCES genres(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS ratings (
          id INTEGER PRIMARY KEY,
          movie_id INTEGER NOT NULL,
          user_id INTEGER NOT NULL,
          rating REAL NOT NULL,
          FOREIGN KEY (movie_id) REFERENCES movies(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_movies_title ON movies(title);
        CREATE INDEX IF NOT EXISTS idx_ratings_movie ON ratings(movie_id);
        ",
    )?;
    Ok(())
}

fn add_tmdb_columns(connection: &Connection) -> Result<()> {
    ensure_column_exists(connection, "movies", "tmdb_id TEXT")?;
    ensure_column_exists(connection, "movies", "tmdb_title TEXT")?;
    ensure_column_exists(connection, "movies", "tmdb_overview TEXT")?;
    ensure_column_exists(connection, "movies", "tmdb_year TEXT")?;
    ensure_column_exists(connection, "movies", "director TEXT")?;
    ensure_column_exists(connection, "movies", "\"cast\" TEXT")?;
    Ok(())
}

fn add_omdb_columns(connection: &Connection) -> Result<()> {
    ensure_column_exists(connection, "movies", "omdb_overview TEXT")
}

fn create_stage_runs(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS stage_runs (
          stage TEXT PRIMARY KEY,
          rows_processed INTEGER NOT NULL,
          checksum TEXT NOT NULL,
          completed_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// Tolerates columns that already exist, e.g. on stores written by older tooling.
fn ensure_column_exists(
    connection: &Connection,
    table_name: &str,
    column_definition: &str,
) -> Result<()> {
    let Some(column_token) = column_definition.split_whitespace().next() else {
        bail!("invalid column definition: {column_definition}");
    };
    let column_name = column_token.trim_matches('"');

    let pragma_sql = format!("PRAGMA table_info({table_name})");
    let mut statement = connection
        .prepare(&pragma_sql)
        .with_context(|| format!("failed to inspect schema for table {table_name}"))?;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let existing_name: String = row.get(1)?;
        if existing_name == column_name {
            return Ok(());
        }
    }

    let alter_sql = format!("ALTER TABLE {table_name} ADD COLUMN {column_definition}");
    connection
        .execute(&alter_sql, [])
        .with_context(|| format!("failed to add column {column_name} on {table_name}"))?;

    Ok(())
}
