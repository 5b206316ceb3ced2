use anyhow::Result;
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};

use crate::lookup::omdb::OmdbMatch;
use crate::lookup::tmdb::TmdbMatch;
use crate::lookup::year_range;
use crate::semantic::MovieText;

/// The lookup key of a movie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieKey {
    pub id: i64,
    pub title: String,
    pub year: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieSummary {
    pub id: i64,
    pub title: String,
    pub year: Option<i64>,
    pub avg_rating: Option<f64>,
}

/// How many rows carry each enrichment column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentCoverage {
    pub movies: i64,
    pub tmdb_overview: i64,
    pub omdb_overview: i64,
    pub director: i64,
    pub cast: i64,
}

const STAGE_B_PENDING: &str = "
    omdb_overview IS NULL
    OR director IS NULL OR TRIM(director) = ''
    OR \"cast\" IS NULL OR TRIM(\"cast\") = ''
";

fn load_keys(connection: &Connection, filter: &str) -> Result<Vec<MovieKey>> {
    let sql = format!("SELECT id, title, year FROM movies WHERE {filter} ORDER BY id ASC");
    let mut statement = connection.prepare(&sql)?;
    let mut rows = statement.query([])?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        out.push(MovieKey {
            id: row.get(0)?,
            title: row.get(1)?,
            year: row.get(2)?,
        });
    }

    Ok(out)
}

/// Movies with no TMDB match recorded yet.
pub fn load_tmdb_pending(connection: &Connection) -> Result<Vec<MovieKey>> {
    load_keys(connection, "tmdb_id IS NULL")
}

/// Movies still missing an OMDb overview or a director/cast value.
pub fn load_omdb_pending(connection: &Connection) -> Result<Vec<MovieKey>> {
    load_keys(connection, STAGE_B_PENDING)
}

/// Writes a TMDB match without replacing values already present.
pub fn apply_tmdb_match(connection: &Connection, movie_id: i64, found: &TmdbMatch) -> Result<usize> {
    let tmdb_year = year_range(found.release_date.as_deref()).map(|(start, _)| start.to_string());
    let changed = connection.execute(
        "
        UPDATE movies SET
          tmdb_id = COALESCE(tmdb_id, ?2),
          tmdb_title = COALESCE(tmdb_title, ?3),
          tmdb_overview = COALESCE(tmdb_overview, ?4),
          tmdb_year = COALESCE(tmdb_year, ?5),
          director = COALESCE(director, ?6),
          \"cast\" = COALESCE(\"cast\", ?7)
        WHERE id = ?1
        ",
        params![
            movie_id,
            found.tmdb_id.to_string(),
            found.title,
            found.overview,
            tmdb_year,
            found.director,
            found.cast,
        ],
    )?;
    Ok(changed)
}

/// Writes an OMDb match. `omdb_overview` is only set when null; director and
/// cast only when null or blank.
pub fn apply_omdb_match(connection: &Connection, movie_id: i64, found: &OmdbMatch) -> Result<usize> {
    let changed = connection.execute(
        "
        UPDATE movies SET
          omdb_overview = COALESCE(omdb_overview, ?2),
          director = CASE
            WHEN director IS NULL OR TRIM(director) = '' THEN COALESCE(?3, director)
            ELSE director
          END,
          \"cast\" = CASE
            WHEN \"cast\" IS NULL OR TRIM(\"cast\") = '' THEN COALESCE(?4, \"cast\")
            ELSE \"cast\"
          END
        WHERE id = ?1
        ",
        params![movie_id, found.plot, found.director, found.actors],
    )?;
    Ok(changed)
}

/// Every movie with its genres and enrichment fields, ordered by id.
pub fn load_movie_texts(connection: &Connection) -> Result<Vec<MovieText>> {
    let mut statement = connection.prepare(
        "
        SELECT
          m.id,
          m.title,
          m.year,
          (
            SELECT GROUP_CONCAT(name, ', ') FROM (
              SELECT g.name AS name
              FROM movie_genre mg
              JOIN genres g ON g.id = mg.genre_id
              WHERE mg.movie_id = m.id
              ORDER BY g.name
            )
          ),
          m.director,
          m.\"cast\",
          m.tmdb_overview,
          m.omdb_overview
        FROM movies m
        ORDER BY m.id ASC
        ",
    )?;

    let mut rows = statement.query([])?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        out.push(MovieText {
            id: row.get(0)?,
            title: row.get(1)?,
            year: row.get(2)?,
            genres: row.get(3)?,
            director: row.get(4)?,
            cast: row.get(5)?,
            tmdb_overview: row.get(6)?,
            omdb_overview: row.get(7)?,
        });
    }

    Ok(out)
}

pub fn load_movie_summary(connection: &Connection, movie_id: i64) -> Result<Option<MovieSummary>> {
    let mut statement =
        connection.prepare("SELECT id, title, year, avg_rating FROM movies WHERE id = ?1")?;
    let mut rows = statement.query(params![movie_id])?;

    match rows.next()? {
        Some(row) => Ok(Some(MovieSummary {
            id: row.get(0)?,
            title: row.get(1)?,
            year: row.get(2)?,
            avg_rating: row.get(3)?,
        })),
        None => Ok(None),
    }
}

pub fn enrichment_coverage(connection: &Connection) -> Result<EnrichmentCoverage> {
    let coverage = connection.query_row(
        "
        SELECT
          COUNT(*),
          COUNT(tmdb_overview),
          COUNT(omdb_overview),
          SUM(CASE WHEN director IS NOT NULL AND TRIM(director) <> '' THEN 1 ELSE 0 END),
          SUM(CASE WHEN \"cast\" IS NOT NULL AND TRIM(\"cast\") <> '' THEN 1 ELSE 0 END)
        FROM movies
        ",
        [],
        |row| {
            Ok(EnrichmentCoverage {
                movies: row.get(0)?,
                tmdb_overview: row.get(1)?,
                omdb_overview: row.get(2)?,
                director: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                cast: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            })
        },
    )?;
    Ok(coverage)
}

/// SHA-256 over `id` plus the given columns of every movie, in id order.
/// Column names are trusted identifiers, never user input.
pub fn columns_checksum(connection: &Connection, columns: &[&str]) -> Result<String> {
    let select = columns
        .iter()
        .map(|column| format!("COALESCE(CAST({column} AS TEXT), '\u{1}')"))
        .collect::<Vec<String>>()
        .join(", ");
    let sql = format!("SELECT id, {select} FROM movies ORDER BY id ASC");

    let mut statement = connection.prepare(&sql)?;
    let mut rows = statement.query([])?;
    let mut hasher = Sha256::new();

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        hasher.update(id.to_le_bytes());
        for index in 0..columns.len() {
            let value: String = row.get(index + 1)?;
            hasher.update(value.as_bytes());
            hasher.update([0_u8]);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}
