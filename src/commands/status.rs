use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::index::read_index_header;
use crate::model::StageName;
use crate::store::{self, count_rows};

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = &args.store.db_path;
    let index_path = args.store.resolved_index_path();

    info!(db_path = %db_path.display(), "status requested");

    if db_path.exists() {
        let connection = store::open_existing_store(db_path)?;
        let schema_version = store::current_schema_version(&connection).unwrap_or(0);
        let genres = count_rows(&connection, "SELECT COUNT(*) FROM genres").unwrap_or(0);
        let ratings = count_rows(&connection, "SELECT COUNT(*) FROM ratings").unwrap_or(0);

        match store::enrichment_coverage(&connection) {
            Ok(coverage) => info!(
                path = %db_path.display(),
                schema_version,
                movies = coverage.movies,
                genres,
                ratings,
                tmdb_overview = coverage.tmdb_overview,
                omdb_overview = coverage.omdb_overview,
                director = coverage.director,
                cast = coverage.cast,
                "row store status"
            ),
            Err(err) => warn!(path = %db_path.display(), error = %err, "row store has no movies table"),
        }

        let markers = store::load_markers(&connection).unwrap_or_default();
        for stage in StageName::ALL {
            match markers.iter().find(|marker| marker.stage == stage.as_str()) {
                Some(marker) => info!(
                    stage = %stage,
                    rows = marker.rows_processed,
                    completed_at = %marker.completed_at,
                    checksum = %marker.checksum,
                    "stage complete"
                ),
                None => info!(stage = %stage, "stage not complete"),
            }
        }
    } else {
        warn!(path = %db_path.display(), "row store missing");
    }

    match read_index_header(&index_path) {
        Ok(Some(header)) => info!(
            path = %index_path.display(),
            vectors = header.count,
            dimensions = header.dimensions,
            "index status"
        ),
        Ok(None) => warn!(path = %index_path.display(), "index file missing"),
        Err(err) => warn!(path = %index_path.display(), error = %err, "index file unreadable"),
    }

    Ok(())
}
