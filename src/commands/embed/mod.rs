use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cli::EmbedArgs;
use crate::index::{VectorIndex, read_index_header};
use crate::model::{EmbeddingRunManifest, StageName};
use crate::semantic::{
    Embedder, MovieText, build_embedder, movie_payload_for_embedding, resolve_model_config,
};
use crate::store::{self, count_movies};
use crate::util::{
    ensure_directory, file_is_non_empty, now_utc_string, utc_compact_string, write_json_pretty,
};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedOutcome {
    pub movies_embedded: usize,
    pub dimensions: usize,
    pub checksum: String,
}

pub fn run(args: EmbedArgs) -> Result<()> {
    let index_path = args.store.resolved_index_path();
    let model = resolve_model_config(
        &args.embedding.emb_model,
        args.embedding.embed_url.as_deref(),
        args.embedding.embed_dim,
    );
    let embedder = build_embedder(&model, args.http.timeout())?;
    let batch_size = args.embedding.embed_batch_size.max(1);

    let mut connection = store::open_store(&args.store.db_path)?;
    let started_at = now_utc_string();
    let started = Instant::now();

    let outcome = build_index(&mut connection, embedder.as_ref(), &index_path, batch_size)?;

    ensure_directory(&args.store.manifest_dir)?;
    let run_stamp = utc_compact_string(Utc::now());
    let manifest = EmbeddingRunManifest {
        manifest_version: 1,
        run_id: format!("embed-{run_stamp}"),
        generated_at: started_at,
        model_id: model.model_id.clone(),
        backend: model.backend.clone(),
        embedding_dim: outcome.dimensions,
        normalization: model.normalization.clone(),
        index_path: index_path.display().to_string(),
        movies_embedded: outcome.movies_embedded,
        batch_size,
        content_checksum: outcome.checksum.clone(),
        duration_ms: started.elapsed().as_millis(),
    };
    let manifest_path = args
        .store
        .manifest_dir
        .join(format!("embedding_run_{run_stamp}.json"));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        path = %manifest_path.display(),
        model_id = %model.model_id,
        movies = outcome.movies_embedded,
        "embedding run completed"
    );
    Ok(())
}

/// SHA-256 over the embedder identity (model, backend, width) and every
/// movie's canonical text, in id order.
pub fn content_fingerprint(embedder: &dyn Embedder, movies: &[MovieText]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(embedder.model_id().as_bytes());
    hasher.update([0_u8]);
    hasher.update(embedder.backend().as_bytes());
    hasher.update([0_u8]);
    match embedder.dimensions() {
        Some(dimensions) => hasher.update((dimensions as u64).to_le_bytes()),
        None => hasher.update(b"auto"),
    }
    hasher.update([0_u8]);

    for movie in movies {
        hasher.update(movie.id.to_le_bytes());
        hasher.update(movie_payload_for_embedding(movie).as_bytes());
        hasher.update([0_u8]);
    }

    format!("{:x}", hasher.finalize())
}

/// Returns why the on-disk index can be reused, or `None` when it must be
/// rebuilt. Besides the marker, the file must be non-empty, hold one vector
/// per movie of the embedder's width and have been built by the same
/// embedder from the current row contents.
pub fn index_is_current(
    connection: &Connection,
    index_path: &Path,
    embedder: &dyn Embedder,
) -> Result<Option<String>> {
    let Some(marker) = store::load_marker(connection, StageName::Embed.as_str())? else {
        return Ok(None);
    };

    if !file_is_non_empty(index_path) {
        debug!(path = %index_path.display(), "index file missing or empty");
        return Ok(None);
    }

    let header = match read_index_header(index_path) {
        Ok(Some(header)) => header,
        Ok(None) => return Ok(None),
        Err(err) => {
            debug!(path = %index_path.display(), error = %err, "index header unreadable");
            return Ok(None);
        }
    };

    if let Some(expected) = embedder.dimensions() {
        if header.dimensions != expected {
            debug!(
                indexed = header.dimensions,
                expected, "index dimension differs from the embedder"
            );
            return Ok(None);
        }
    }

    let movies = count_movies(connection)?;
    if header.count as i64 != movies {
        debug!(indexed = header.count, movies, "index count differs from row count");
        return Ok(None);
    }

    let texts = store::load_movie_texts(connection)?;
    if marker.checksum != content_fingerprint(embedder, &texts) {
        debug!("rows or embedder changed since the index was built");
        return Ok(None);
    }

    Ok(Some(format!(
        "index holds {} vectors built from the current rows",
        header.count
    )))
}

/// Embeds every movie and replaces the index file, then records the embed
/// marker. Any embedding or write failure leaves the previous marker cleared.
pub fn build_index(
    connection: &mut Connection,
    embedder: &dyn Embedder,
    index_path: &Path,
    batch_size: usize,
) -> Result<EmbedOutcome> {
    store::clear_marker(connection, StageName::Embed.as_str())?;

    let movies = store::load_movie_texts(connection)?;
    if movies.is_empty() {
        bail!("no movies to embed; run ingest first");
    }

    let checksum = content_fingerprint(embedder, &movies);
    let batch_size = batch_size.max(1);
    let batch_count = movies.len().div_ceil(batch_size);
    let mut index = VectorIndex::new();

    info!(
        model_id = %embedder.model_id(),
        movies = movies.len(),
        batch_size,
        "embedding started"
    );

    for (batch_index, batch) in movies.chunks(batch_size).enumerate() {
        let payloads = batch
            .iter()
            .map(movie_payload_for_embedding)
            .collect::<Vec<String>>();
        let vectors = embedder
            .embed_batch(&payloads)
            .with_context(|| format!("embedding batch {} failed", batch_index + 1))?;

        if vectors.len() != batch.len() {
            bail!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            );
        }

        for (movie, vector) in batch.iter().zip(&vectors) {
            index
                .add(movie.id, vector)
                .with_context(|| format!("failed to index movie {}", movie.id))?;
        }

        info!(
            batch = batch_index + 1,
            batches = batch_count,
            indexed = index.len(),
            "embed batch completed"
        );
    }

    index.save(index_path)?;

    let written = read_index_header(index_path)?
        .with_context(|| format!("index file {} vanished after write", index_path.display()))?;
    if written.count != movies.len() {
        bail!(
            "index file {} holds {} entries, expected {}",
            index_path.display(),
            written.count,
            movies.len()
        );
    }

    let tx = connection.transaction()?;
    store::write_marker(
        &tx,
        StageName::Embed.as_str(),
        movies.len() as i64,
        &checksum,
    )?;
    tx.commit()?;

    info!(
        path = %index_path.display(),
        vectors = index.len(),
        dimensions = index.dimensions(),
        "index written"
    );

    Ok(EmbedOutcome {
        movies_embedded: index.len(),
        dimensions: index.dimensions(),
        checksum,
    })
}
