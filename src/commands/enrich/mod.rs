use anyhow::{Result, bail};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::cli::{EnrichArgs, HttpArgs, ServiceArgs};
use crate::lookup::LookupError;
use crate::lookup::omdb::{self, OmdbApi, OmdbClient};
use crate::lookup::tmdb::{self, TmdbApi, TmdbClient};
use crate::model::StageName;
use crate::store::{self, MovieKey, count_movies};

mod omdb_stage;
#[cfg(test)]
mod tests;
mod tmdb_stage;

pub use omdb_stage::enrich_omdb;
pub use tmdb_stage::enrich_tmdb;

/// Rows committed per transaction.
pub const ENRICH_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct EnrichOptions {
    pub batch_size: usize,
    pub max_consecutive_failures: usize,
}

impl EnrichOptions {
    pub fn from_services(services: &ServiceArgs) -> Self {
        Self {
            batch_size: ENRICH_BATCH_SIZE,
            max_consecutive_failures: services.max_consecutive_failures.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichOutcome {
    pub rows_pending: usize,
    pub rows_processed: usize,
    pub rows_written: usize,
    pub matched: usize,
    pub not_found: usize,
    pub lookup_failures: usize,
}

pub fn run_tmdb(args: EnrichArgs) -> Result<()> {
    let mut connection = open_ingested_store(&args)?;
    let client = tmdb_client(&args.services, &args.http)?;
    let outcome = enrich_tmdb(
        &mut connection,
        &client,
        EnrichOptions::from_services(&args.services),
    )?;
    log_outcome(StageName::TmdbEnrich, &outcome);
    Ok(())
}

pub fn run_omdb(args: EnrichArgs) -> Result<()> {
    let mut connection = open_ingested_store(&args)?;
    let client = omdb_client(&args.services, &args.http)?;
    let outcome = enrich_omdb(
        &mut connection,
        &client,
        EnrichOptions::from_services(&args.services),
    )?;
    log_outcome(StageName::OmdbEnrich, &outcome);
    Ok(())
}

fn open_ingested_store(args: &EnrichArgs) -> Result<Connection> {
    let connection = store::open_store(&args.store.db_path)?;
    if count_movies(&connection)? == 0 {
        bail!(
            "row store {} has no movies; run ingest first",
            args.store.db_path.display()
        );
    }
    Ok(connection)
}

pub fn tmdb_client(services: &ServiceArgs, http: &HttpArgs) -> Result<TmdbClient> {
    match &services.tmdb_api_key {
        Some(key) if !key.is_blank() => {
            TmdbClient::new(key.clone(), http.timeout(), http.http_retries)
        }
        _ => bail!("TMDB_API_KEY is not set"),
    }
}

pub fn omdb_client(services: &ServiceArgs, http: &HttpArgs) -> Result<OmdbClient> {
    match &services.omdb_api_key {
        Some(key) if !key.is_blank() => {
            OmdbClient::new(key.clone(), http.timeout(), http.http_retries)
        }
        _ => bail!("OMDB_API_KEY is not set"),
    }
}

fn log_outcome(stage: StageName, outcome: &EnrichOutcome) {
    info!(
        stage = %stage,
        processed = outcome.rows_processed,
        written = outcome.rows_written,
        matched = outcome.matched,
        not_found = outcome.not_found,
        failed = outcome.lookup_failures,
        "enrichment completed"
    );
}

fn lookup_year(key: &MovieKey) -> Option<i32> {
    key.year.and_then(|year| i32::try_from(year).ok())
}

/// Counts lookup failures in a row; any answer from the service resets it.
struct FailureStreak {
    limit: usize,
    current: usize,
}

impl FailureStreak {
    fn new(limit: usize) -> Self {
        Self { limit, current: 0 }
    }

    fn reset(&mut self) {
        self.current = 0;
    }

    /// Returns true once the streak reaches the limit.
    fn record(&mut self) -> bool {
        self.current += 1;
        self.current >= self.limit
    }
}

type ApplyFn<M> = fn(&Connection, i64, &M) -> Result<usize>;

/// Shared row loop of both enrichment stages.
///
/// Lookups run outside any transaction; each batch of matches is written in
/// one transaction, and the last batch's transaction also records the stage
/// marker. An interrupted stage keeps its committed batches but no marker.
fn enrich_rows<M>(
    connection: &mut Connection,
    stage: StageName,
    pending: Vec<MovieKey>,
    options: EnrichOptions,
    checksum_columns: &[&str],
    lookup: impl Fn(&MovieKey) -> Result<Option<M>, LookupError>,
    apply: ApplyFn<M>,
) -> Result<EnrichOutcome> {
    store::clear_marker(connection, stage.as_str())?;

    let batch_size = options.batch_size.max(1);
    let mut streak = FailureStreak::new(options.max_consecutive_failures.max(1));
    let mut outcome = EnrichOutcome {
        rows_pending: pending.len(),
        ..EnrichOutcome::default()
    };

    info!(stage = %stage, pending = pending.len(), "enrichment started");

    let batch_count = pending.len().div_ceil(batch_size);
    if batch_count == 0 {
        commit_batch(connection, stage, &[], apply, Some(checksum_columns), 0)?;
        return Ok(outcome);
    }

    for (batch_index, batch) in pending.chunks(batch_size).enumerate() {
        let mut found = Vec::<(i64, M)>::new();

        for key in batch {
            outcome.rows_processed += 1;
            match lookup(key) {
                Ok(Some(value)) => {
                    streak.reset();
                    outcome.matched += 1;
                    found.push((key.id, value));
                }
                Ok(None) => {
                    streak.reset();
                    outcome.not_found += 1;
                    debug!(stage = %stage, movie_id = key.id, title = %key.title, "no match");
                }
                Err(err) => {
                    outcome.lookup_failures += 1;
                    debug!(stage = %stage, movie_id = key.id, title = %key.title, error = %err, "lookup failed");
                    if streak.record() {
                        let written = commit_batch(connection, stage, &found, apply, None, 0)?;
                        warn!(stage = %stage, written, "kept matches found before giving up");
                        bail!(
                            "{stage}: giving up after {} consecutive lookup failures (last: {err})",
                            streak.limit
                        );
                    }
                }
            }
        }

        let is_last = batch_index + 1 == batch_count;
        let no_answers = outcome.matched == 0 && outcome.not_found == 0;
        if is_last && no_answers {
            bail!("{stage}: all {} lookups failed", outcome.lookup_failures);
        }

        let finish = is_last.then_some(checksum_columns);
        outcome.rows_written += commit_batch(
            connection,
            stage,
            &found,
            apply,
            finish,
            outcome.rows_processed,
        )?;

        info!(
            stage = %stage,
            batch = batch_index + 1,
            batches = batch_count,
            processed = outcome.rows_processed,
            matched = outcome.matched,
            "enrichment batch committed"
        );
    }

    if outcome.lookup_failures > 0 {
        warn!(
            stage = %stage,
            failed = outcome.lookup_failures,
            "some lookups failed; those rows were left untouched"
        );
    }

    Ok(outcome)
}

/// Writes one batch of matches. When `finish` is set the stage marker is
/// written in the same transaction, checksummed over those columns.
fn commit_batch<M>(
    connection: &mut Connection,
    stage: StageName,
    found: &[(i64, M)],
    apply: ApplyFn<M>,
    finish: Option<&[&str]>,
    rows_processed: usize,
) -> Result<usize> {
    let tx = connection.transaction()?;
    let mut written = 0_usize;

    for (movie_id, value) in found {
        written += apply(&tx, *movie_id, value)?;
    }

    if let Some(columns) = finish {
        let checksum = store::columns_checksum(&tx, columns)?;
        store::write_marker(&tx, stage.as_str(), rows_processed as i64, &checksum)?;
    }

    tx.commit()?;
    Ok(written)
}
