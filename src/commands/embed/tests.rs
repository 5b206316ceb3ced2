use std::fs;

use super::*;
use crate::commands::ingest::fixtures::{FIXTURE_MOVIES, write_movielens_fixture};
use crate::commands::ingest::{IngestSource, ingest_dataset};
use crate::semantic::LocalHashEmbedder;

const MODEL: &str = "test-hash";

struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn model_id(&self) -> &str {
        MODEL
    }

    fn backend(&self) -> &str {
        "test"
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("model server unavailable")
    }
}

struct ShortEmbedder;

impl Embedder for ShortEmbedder {
    fn model_id(&self) -> &str {
        MODEL
    }

    fn backend(&self) -> &str {
        "test"
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![1.0, 0.0]; texts.len().saturating_sub(1)])
    }
}

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

#[test]
fn build_index_stores_one_vector_per_movie() {
    let mut connection = ingested_store();
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let index_path = dir.path().join("index").join("movies.idx");
    let embedder = LocalHashEmbedder::new(MODEL, 32);

    let outcome = build_index(&mut connection, &embedder, &index_path, 3).expect("index should build");
    assert_eq!(outcome.movies_embedded, FIXTURE_MOVIES.len());
    assert_eq!(outcome.dimensions, 32);

    let index = VectorIndex::load(&index_path).expect("index should load");
    let expected_ids = FIXTURE_MOVIES.iter().map(|(id, _, _)| *id).collect::<Vec<i64>>();
    assert_eq!(index.ids(), expected_ids.as_slice());

    let marker = store::load_marker(&connection, StageName::Embed.as_str())
        .expect("marker query should succeed")
        .expect("embed marker should exist");
    assert_eq!(marker.rows_processed, FIXTURE_MOVIES.len() as i64);
    assert_eq!(marker.checksum, outcome.checksum);

    assert!(
        index_is_current(&connection, &index_path, &embedder)
            .expect("check should succeed")
            .is_some()
    );
}

#[test]
fn index_goes_stale_when_file_rows_or_model_change() {
    let mut connection = ingested_store();
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let index_path = dir.path().join("movies.idx");
    let embedder = LocalHashEmbedder::new(MODEL, 16);
    build_index(&mut connection, &embedder, &index_path, 8).expect("index should build");

    assert!(
        index_is_current(&connection, &index_path, &LocalHashEmbedder::new("other-model", 16))
            .expect("check should succeed")
            .is_none()
    );

    connection
        .execute("UPDATE movies SET tmdb_overview = 'Toys come alive.' WHERE id = 1", [])
        .expect("update should succeed");
    assert!(
        index_is_current(&connection, &index_path, &embedder)
            .expect("check should succeed")
            .is_none()
    );

    build_index(&mut connection, &embedder, &index_path, 8).expect("rebuild should succeed");
    connection
        .execute("INSERT INTO movies(id, title, year) VALUES (99, 'Avatar', 2009)", [])
        .expect("insert should succeed");
    assert!(
        index_is_current(&connection, &index_path, &embedder)
            .expect("check should succeed")
            .is_none()
    );

    connection
        .execute("DELETE FROM movies WHERE id = 99", [])
        .expect("delete should succeed");
    assert!(
        index_is_current(&connection, &index_path, &embedder)
            .expect("check should succeed")
            .is_some()
    );

    fs::write(&index_path, b"").expect("index should be truncated");
    assert!(
        index_is_current(&connection, &index_path, &embedder)
            .expect("check should succeed")
            .is_none()
    );
}

#[test]
fn embedder_failure_leaves_no_index_and_no_marker() {
    let mut connection = ingested_store();
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let index_path = dir.path().join("movies.idx");

    let err = build_index(&mut connection, &BrokenEmbedder, &index_path, 2).expect_err("build should fail");
    assert!(format!("{err:#}").contains("model server unavailable"));
    assert!(!index_path.exists());
    assert!(
        store::load_marker(&connection, StageName::Embed.as_str())
            .expect("marker query should succeed")
            .is_none()
    );
}

#[test]
fn embedder_returning_too_few_vectors_is_rejected() {
    let mut connection = ingested_store();
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let index_path = dir.path().join("movies.idx");

    let err = build_index(&mut connection, &ShortEmbedder, &index_path, 4).expect_err("build should fail");
    assert!(err.to_string().contains("vectors for 4 texts"));
    assert!(!index_path.exists());
}

#[test]
fn index_goes_stale_when_embedder_width_or_backend_changes() {
    let mut connection = ingested_store();
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let index_path = dir.path().join("movies.idx");
    let embedder = LocalHashEmbedder::new(MODEL, 384);
    build_index(&mut connection, &embedder, &index_path, 8).expect("index should build");

    assert!(
        index_is_current(&connection, &index_path, &embedder)
            .expect("check should succeed")
            .is_some()
    );
    assert!(
        index_is_current(&connection, &index_path, &LocalHashEmbedder::new(MODEL, 512))
            .expect("check should succeed")
            .is_none()
    );
    // Same model id from another backend.
    assert!(
        index_is_current(&connection, &index_path, &ShortEmbedder)
            .expect("check should succeed")
            .is_none()
    );
}

#[test]
fn fingerprint_depends_on_embedder_and_text() {
    let movie = MovieText {
        id: 1,
        title: "Heat".to_string(),
        ..MovieText::default()
    };
    let changed = MovieText {
        tmdb_overview: Some("A heist.".to_string()),
        ..movie.clone()
    };
    let embedder = LocalHashEmbedder::new(MODEL, 32);
    let single = std::slice::from_ref(&movie);

    let base = content_fingerprint(&embedder, single);
    assert_eq!(base, content_fingerprint(&embedder, single));
    assert_ne!(base, content_fingerprint(&LocalHashEmbedder::new("other", 32), single));
    assert_ne!(base, content_fingerprint(&LocalHashEmbedder::new(MODEL, 64), single));
    assert_ne!(base, content_fingerprint(&ShortEmbedder, single));
    assert_ne!(base, content_fingerprint(&embedder, &[changed]));
}
