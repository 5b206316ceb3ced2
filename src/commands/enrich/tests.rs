use rusqlite::params;

use super::*;
use crate::commands::ingest::fixtures::write_movielens_fixture;
use crate::commands::ingest::{IngestSource, ingest_dataset};
use crate::lookup::omdb::fakes::FakeOmdb;
use crate::lookup::tmdb::fakes::FakeTmdb;

fn ingested_store() -> Connection {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let dataset_dir = write_movielens_fixture(dir.path());
    let mut connection = store::open_test_store();
    ingest_dataset(
        &mut connection,
        &IngestSource {
            dataset_dir,
            tmdb5000_csv: None,
        },
    )
    .expect("fixture ingest should succeed");
    connection
}

fn options() -> EnrichOptions {
    EnrichOptions {
        batch_size: 3,
        max_consecutive_failures: 25,
    }
}

fn fake_tmdb() -> FakeTmdb {
    FakeTmdb::default()
        .with_movie("Toy Story", 862, "1995-10-30", "Toys come alive.")
        .with_movie("GoldenEye", 710, "1995-11-16", "")
        .with_movie("The Usual Suspects", 629, "1995-07-19", "A boat explodes.")
}

fn column(connection: &Connection, movie_id: i64, name: &str) -> Option<String> {
    connection
        .query_row(
            &format!("SELECT {name} FROM movies WHERE id = ?1"),
            params![movie_id],
            |row| row.get(0),
        )
        .expect("movie should exist")
}

fn marker_exists(connection: &Connection, stage: StageName) -> bool {
    store::load_marker(connection, stage.as_str())
        .expect("marker query should succeed")
        .is_some()
}

#[test]
fn tmdb_stage_writes_matches_and_leaves_misses_null() {
    let mut connection = ingested_store();

    let outcome = enrich_tmdb(&mut connection, &fake_tmdb(), options()).expect("stage should succeed");

    assert_eq!(outcome.rows_pending, 4);
    assert_eq!(outcome.matched, 3);
    assert_eq!(outcome.not_found, 1);
    assert_eq!(outcome.lookup_failures, 0);

    assert_eq!(column(&connection, 1, "tmdb_overview").as_deref(), Some("Toys come alive."));
    // Found with an empty overview is still a completed row.
    assert_eq!(column(&connection, 2, "tmdb_overview").as_deref(), Some(""));
    assert_eq!(column(&connection, 3, "tmdb_id").as_deref(), Some("629"));
    assert_eq!(
        column(&connection, 3, "\"cast\"").as_deref(),
        Some("Star of The Usual Suspects (Lead)")
    );
    assert_eq!(column(&connection, 4, "tmdb_overview"), None);
    assert_eq!(column(&connection, 4, "director"), None);

    assert!(marker_exists(&connection, StageName::TmdbEnrich));
}

#[test]
fn tmdb_stage_rerun_only_visits_unmatched_rows() {
    let mut connection = ingested_store();
    enrich_tmdb(&mut connection, &fake_tmdb(), options()).expect("first run should succeed");

    let fake = fake_tmdb().with_movie("Heat", 949, "1995-12-15", "A heist.");
    let outcome = enrich_tmdb(&mut connection, &fake, options()).expect("second run should succeed");

    assert_eq!(outcome.rows_pending, 1);
    assert_eq!(outcome.matched, 1);
    assert_eq!(column(&connection, 4, "tmdb_overview").as_deref(), Some("A heist."));
    assert_eq!(column(&connection, 1, "tmdb_overview").as_deref(), Some("Toys come alive."));
}

#[test]
fn single_failed_lookup_leaves_its_row_for_the_next_run() {
    let mut connection = ingested_store();
    let flaky = fake_tmdb().failing_on("GoldenEye");

    let outcome = enrich_tmdb(&mut connection, &flaky, options()).expect("stage should succeed");

    assert_eq!(outcome.rows_pending, 4);
    assert_eq!(outcome.lookup_failures, 1);
    assert_eq!(outcome.matched, 2);
    assert_eq!(outcome.not_found, 1);
    assert_eq!(outcome.rows_written, 2);
    assert_eq!(column(&connection, 2, "tmdb_id"), None);
    assert_eq!(column(&connection, 2, "tmdb_overview"), None);
    assert_eq!(column(&connection, 1, "tmdb_overview").as_deref(), Some("Toys come alive."));
    assert_eq!(column(&connection, 3, "tmdb_id").as_deref(), Some("629"));
    assert!(marker_exists(&connection, StageName::TmdbEnrich));

    let retry = enrich_tmdb(&mut connection, &fake_tmdb(), options()).expect("retry should succeed");
    assert_eq!(retry.rows_pending, 2);
    assert_eq!(column(&connection, 2, "tmdb_id").as_deref(), Some("710"));
}

#[test]
fn unreachable_tmdb_trips_the_failure_streak() {
    let mut connection = ingested_store();
    let fake = FakeTmdb {
        unreachable: true,
        ..FakeTmdb::default()
    };

    let err = enrich_tmdb(
        &mut connection,
        &fake,
        EnrichOptions {
            batch_size: 100,
            max_consecutive_failures: 2,
        },
    )
    .expect_err("stage should give up");

    assert!(err.to_string().contains("consecutive lookup failures"));
    assert_eq!(fake.queries.borrow().len(), 2);
    assert!(!marker_exists(&connection, StageName::TmdbEnrich));
}

#[test]
fn omdb_stage_never_overwrites_stage_a_credits() {
    let mut connection = ingested_store();
    enrich_tmdb(&mut connection, &fake_tmdb(), options()).expect("tmdb stage should succeed");

    let omdb = FakeOmdb::default()
        .with_movie("Toy Story", "1995", "Woody is jealous.", "John Lasseter", "Tom Hanks")
        .with_movie("Heat", "1995", "Cops and robbers.", "Michael Mann", "Al Pacino, Robert De Niro");

    let outcome = enrich_omdb(&mut connection, &omdb, options()).expect("omdb stage should succeed");
    assert_eq!(outcome.matched, 2);

    assert_eq!(column(&connection, 1, "omdb_overview").as_deref(), Some("Woody is jealous."));
    assert_eq!(column(&connection, 1, "director").as_deref(), Some("Director of Toy Story"));
    assert_eq!(column(&connection, 1, "\"cast\"").as_deref(), Some("Star of Toy Story (Lead)"));

    assert_eq!(column(&connection, 4, "omdb_overview").as_deref(), Some("Cops and robbers."));
    assert_eq!(column(&connection, 4, "director").as_deref(), Some("Michael Mann"));
    assert_eq!(
        column(&connection, 4, "\"cast\"").as_deref(),
        Some("Al Pacino, Robert De Niro")
    );
    assert_eq!(column(&connection, 4, "tmdb_overview"), None);

    assert!(marker_exists(&connection, StageName::OmdbEnrich));
}

#[test]
fn omdb_row_failure_is_skipped_and_the_stage_completes() {
    let mut connection = ingested_store();
    let omdb = FakeOmdb::default()
        .with_movie("Toy Story", "1995", "Woody is jealous.", "John Lasseter", "Tom Hanks")
        .failing_on("Heat");

    let outcome = enrich_omdb(&mut connection, &omdb, options()).expect("stage should succeed");

    assert_eq!(outcome.lookup_failures, 1);
    assert_eq!(outcome.matched, 1);
    assert_eq!(column(&connection, 1, "omdb_overview").as_deref(), Some("Woody is jealous."));
    assert_eq!(column(&connection, 4, "omdb_overview"), None);
    assert!(marker_exists(&connection, StageName::OmdbEnrich));
}

#[test]
fn unreachable_omdb_fails_the_stage_without_writes() {
    let mut connection = ingested_store();
    let fake = FakeOmdb {
        unreachable: true,
        ..FakeOmdb::default()
    };

    let err = enrich_omdb(&mut connection, &fake, options()).expect_err("stage should fail");

    assert!(err.to_string().contains("all 4 lookups failed"));
    let filled = store::enrichment_coverage(&connection)
        .expect("coverage should load")
        .omdb_overview;
    assert_eq!(filled, 0);
    assert!(!marker_exists(&connection, StageName::OmdbEnrich));
}

#[test]
fn empty_pending_set_still_marks_the_stage_complete() {
    let mut connection = ingested_store();
    connection
        .execute("UPDATE movies SET tmdb_id = 'manual'", [])
        .expect("seed update should succeed");

    let outcome = enrich_tmdb(&mut connection, &FakeTmdb::default(), options())
        .expect("stage should succeed");

    assert_eq!(outcome.rows_pending, 0);
    assert!(marker_exists(&connection, StageName::TmdbEnrich));
}

#[test]
fn missing_api_keys_are_reported_before_any_lookup() {
    let services = ServiceArgs {
        tmdb_api_key: None,
        omdb_api_key: Some("   ".parse().expect("api key parse is infallible")),
        max_consecutive_failures: 25,
    };
    let http = HttpArgs {
        http_timeout_secs: 1,
        http_retries: 1,
    };

    let tmdb_err = tmdb_client(&services, &http).err().expect("missing key should fail");
    assert!(tmdb_err.to_string().contains("TMDB_API_KEY"));
    let omdb_err = omdb_client(&services, &http).err().expect("blank key should fail");
    assert!(omdb_err.to_string().contains("OMDB_API_KEY"));
}
