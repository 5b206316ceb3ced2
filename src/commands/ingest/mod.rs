use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, Transaction, params};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cli::IngestArgs;
use crate::model::StageName;
use crate::store::{self, count_movies};
use crate::util::sha256_files;

mod insert;
mod movielens;
#[cfg(test)]
pub(crate) mod fixtures;
mod tmdb5000;

use insert::*;
use movielens::*;
use tmdb5000::*;

/// Where the dataset lives on disk.
#[derive(Debug, Clone)]
pub struct IngestSource {
    pub dataset_dir: PathBuf,
    pub tmdb5000_csv: Option<PathBuf>,
}

impl IngestSource {
    fn item_path(&self) -> PathBuf {
        self.dataset_dir.join("u.item")
    }

    fn genre_path(&self) -> PathBuf {
        self.dataset_dir.join("u.genre")
    }

    fn ratings_path(&self) -> PathBuf {
        self.dataset_dir.join("u.data")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub movielens_movies: usize,
    pub tmdb_movies_added: usize,
    pub ratings_inserted: usize,
    pub ratings_skipped: usize,
    pub genres: usize,
    pub movies_total: i64,
    pub checksum: String,
}

pub fn run(args: IngestArgs) -> Result<()> {
    let mut connection = store::open_store(&args.store.db_path)?;

    if count_movies(&connection)? > 0 {
        if !args.force {
            bail!(
                "row store {} already holds movies; pass --force to wipe and re-ingest",
                args.store.db_path.display()
            );
        }
        warn!(path = %args.store.db_path.display(), "wiping existing movies before re-ingest");
        wipe_movies(&mut connection)?;
    }

    let source = IngestSource {
        dataset_dir: args.dataset.dataset_dir.clone(),
        tmdb5000_csv: args.dataset.tmdb5000_csv.clone(),
    };
    let outcome = ingest_dataset(&mut connection, &source)?;

    info!(
        movies = outcome.movies_total,
        ratings = outcome.ratings_inserted,
        genres = outcome.genres,
        "ingest completed"
    );
    Ok(())
}

/// Loads the dataset into an empty store in a single transaction and records
/// the ingest marker with it. Missing or malformed input aborts everything.
pub fn ingest_dataset(connection: &mut Connection, source: &IngestSource) -> Result<IngestOutcome> {
    let item_path = source.item_path();
    let genre_path = source.genre_path();
    let ratings_path = source.ratings_path();
    for path in [&item_path, &genre_path, &ratings_path] {
        if !path.is_file() {
            bail!("missing MovieLens file: {}", path.display());
        }
    }

    info!(dir = %source.dataset_dir.display(), "reading MovieLens dataset");
    let genre_names = read_genre_index(&genre_path)?;
    let movies = read_movielens_items(&item_path, &genre_names)?;
    let ratings = read_movielens_ratings(&ratings_path)?;
    info!(movies = movies.len(), ratings = ratings.len(), "parsed MovieLens files");

    let tmdb_movies = match &source.tmdb5000_csv {
        Some(path) => {
            let rows = read_tmdb5000_movies(path)?;
            info!(path = %path.display(), movies = rows.len(), "parsed TMDB 5000 csv");
            rows
        }
        None => Vec::new(),
    };

    let mut fingerprint_inputs = vec![
        genre_path.as_path(),
        item_path.as_path(),
        ratings_path.as_path(),
    ];
    if let Some(path) = &source.tmdb5000_csv {
        fingerprint_inputs.push(path.as_path());
    }
    let checksum = sha256_files(&fingerprint_inputs)?;

    let tx = connection.transaction()?;
    if count_movies(&tx)? > 0 {
        bail!("refusing to ingest into a non-empty movies table");
    }

    let mut outcome = insert_dataset(&tx, &movies, &ratings, &tmdb_movies)?;
    outcome.movies_total = count_movies(&tx)?;
    outcome.checksum = checksum;

    if outcome.movies_total == 0 {
        bail!("dataset in {} produced no movies", source.dataset_dir.display());
    }

    store::write_marker(
        &tx,
        StageName::Ingest.as_str(),
        outcome.movies_total,
        &outcome.checksum,
    )?;
    tx.commit()?;

    if outcome.ratings_skipped > 0 {
        warn!(skipped = outcome.ratings_skipped, "ratings referenced unknown movie ids");
    }
    info!(
        movielens = outcome.movielens_movies,
        tmdb_added = outcome.tmdb_movies_added,
        genres = outcome.genres,
        "dataset merged into row store"
    );

    Ok(outcome)
}

/// Removes all movie data and every stage marker, since they describe rows
/// that no longer exist.
fn wipe_movies(connection: &mut Connection) -> Result<()> {
    let tx = connection.transaction()?;
    tx.execute_batch(
        "
        DELETE FROM ratings;
        DELETE FROM movie_genre;
        DELETE FROM genres;
        DELETE FROM movies;
        DELETE FROM stage_runs;
        ",
    )?;
    tx.commit()?;
    Ok(())
}
