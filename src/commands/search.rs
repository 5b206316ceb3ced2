use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use tracing::info;

use crate::cli::SearchArgs;
use crate::index::{SearchHit, VectorIndex};
use crate::model::{SearchResponse, SearchResult};
use crate::semantic::{Embedder, build_embedder, normalize_whitespace, resolve_model_config};
use crate::store;

pub fn run(args: SearchArgs) -> Result<()> {
    let query = normalize_whitespace(&args.query);
    if query.is_empty() {
        bail!("--query must not be empty");
    }

    let index_path = args.store.resolved_index_path();
    let index = VectorIndex::load(&index_path)?;
    let model = resolve_model_config(
        &args.embedding.emb_model,
        args.embedding.embed_url.as_deref(),
        args.embedding.embed_dim,
    );
    let embedder = build_embedder(&model, args.http.timeout())?;
    let connection = store::open_existing_store(&args.store.db_path)?;

    let response = search_movies(&connection, &index, embedder.as_ref(), &query, args.k)?;
    info!(
        query = %response.query,
        returned = response.returned,
        model_id = %response.model_id,
        "search completed"
    );

    if args.json {
        write_json_response(&response)
    } else {
        write_text_response(&response)
    }
}

/// Embeds the query, ranks the index by inner product and attaches each
/// hit's title and year from the row store.
pub fn search_movies(
    connection: &Connection,
    index: &VectorIndex,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
) -> Result<SearchResponse> {
    let mut vectors = embedder.embed_batch(&[query.to_string()])?;
    let Some(query_vector) = vectors.pop() else {
        bail!("embedder returned no vector for the query");
    };
    if !index.is_empty() && query_vector.len() != index.dimensions() {
        bail!(
            "query vector has {} dimensions but the index has {}; was it built with another model?",
            query_vector.len(),
            index.dimensions()
        );
    }

    let hits = index.search(&query_vector, k);
    let mut results = Vec::with_capacity(hits.len());
    for (rank, SearchHit { id, score }) in hits.into_iter().enumerate() {
        let summary = store::load_movie_summary(connection, id)?;
        results.push(SearchResult {
            rank: rank + 1,
            movie_id: id,
            score,
            title: summary.as_ref().map(|movie| movie.title.clone()),
            year: summary.as_ref().and_then(|movie| movie.year),
            avg_rating: summary.as_ref().and_then(|movie| movie.avg_rating),
        });
    }

    Ok(SearchResponse {
        query: query.to_string(),
        model_id: embedder.model_id().to_string(),
        k,
        returned: results.len(),
        results,
    })
}

fn write_json_response(response: &SearchResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, response)
        .context("failed to serialize search json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(response: &SearchResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Query: {}", response.query)?;
    writeln!(output, "Model: {}", response.model_id)?;
    writeln!(output, "Results: {}", response.returned)?;

    for result in &response.results {
        let year = result
            .year
            .map(|year| format!(" ({year})"))
            .unwrap_or_default();
        writeln!(
            output,
            "{:>3}. [{}] {}{} score={:.4}",
            result.rank,
            result.movie_id,
            result.title.as_deref().unwrap_or("<missing row>"),
            year,
            result.score
        )?;
    }

    output.flush()?;
    Ok(())
}
