use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const LOCAL_BACKEND: &str = "local-hash-v1";
pub const HTTP_BACKEND: &str = "http-embed-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub dimensions: Option<usize>,
    pub normalization: String,
    pub backend: String,
    pub endpoint: Option<String>,
}

pub fn resolve_model_config(
    model_id: &str,
    embed_url: Option<&str>,
    embed_dim: Option<usize>,
) -> SemanticModelConfig {
    let trimmed = model_id.trim();
    let resolved_id = if trimmed.is_empty() {
        DEFAULT_MODEL_NAME
    } else {
        trimmed
    };

    match embed_url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => SemanticModelConfig {
            model_id: resolved_id.to_string(),
            dimensions: embed_dim,
            normalization: DEFAULT_NORMALIZATION.to_string(),
            backend: HTTP_BACKEND.to_string(),
            endpoint: Some(url.trim_end_matches('/').to_string()),
        },
        None => SemanticModelConfig {
            model_id: resolved_id.to_string(),
            dimensions: Some(embed_dim.unwrap_or(DEFAULT_EMBEDDING_DIM)),
            normalization: DEFAULT_NORMALIZATION.to_string(),
            backend: LOCAL_BACKEND.to_string(),
            endpoint: None,
        },
    }
}

/// Turns text into fixed-size vectors. Implementations must return one
/// vector per input, all of the same length.
pub trait Embedder {
    fn model_id(&self) -> &str;
    fn backend(&self) -> &str;
    /// `None` when the width is only known from the vectors themselves.
    fn dimensions(&self) -> Option<usize>;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub fn build_embedder(config: &SemanticModelConfig, timeout: Duration) -> Result<Box<dyn Embedder>> {
    match config.endpoint.as_deref() {
        Some(endpoint) => Ok(Box::new(HttpEmbedder::new(
            endpoint,
            &config.model_id,
            config.dimensions,
            timeout,
        )?)),
        None => Ok(Box::new(LocalHashEmbedder::new(
            &config.model_id,
            config.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIM),
        ))),
    }
}

/// Deterministic feature-hashing embedder. Needs no model files, so the
/// pipeline and its tests run offline.
pub struct LocalHashEmbedder {
    model_id: String,
    dimensions: usize,
}

impl LocalHashEmbedder {
    pub fn new(model_id: &str, dimensions: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dimensions: dimensions.max(8),
        }
    }
}

impl Embedder for LocalHashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn backend(&self) -> &str {
        LOCAL_BACKEND
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| embed_text_local(text, self.dimensions))
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Calls an Ollama-compatible `/api/embed` endpoint.
pub struct HttpEmbedder {
    client: Client,
    url: String,
    model_id: String,
    dimensions: Option<usize>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        model_id: &str,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding http client")?;

        Ok(Self {
            client,
            url: format!("{}/api/embed", endpoint.trim_end_matches('/')),
            model_id: model_id.to_string(),
            dimensions,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn backend(&self) -> &str {
        HTTP_BACKEND
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest {
                model: &self.model_id,
                input: texts,
            })
            .send()
            .with_context(|| format!("embedding request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("embedding endpoint {} returned {}", self.url, status);
        }

        let body: EmbedResponse = response
            .json()
            .with_context(|| format!("failed to decode embedding response from {}", self.url))?;

        if body.embeddings.len() != texts.len() {
            bail!(
                "embedding endpoint returned {} vectors for {} inputs",
                body.embeddings.len(),
                texts.len()
            );
        }

        let mut out = body.embeddings;
        for vector in &mut out {
            if let Some(expected) = self.dimensions {
                if vector.len() != expected {
                    bail!(
                        "embedding dimension mismatch for model '{}': expected {}, got {}",
                        self.model_id,
                        expected,
                        vector.len()
                    );
                }
            }
            normalize_vector(vector);
        }

        Ok(out)
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Enriched view of a movie row as read for embedding.
#[derive(Debug, Clone, Default)]
pub struct MovieText {
    pub id: i64,
    pub title: String,
    pub year: Option<i64>,
    pub genres: Option<String>,
    pub director: Option<String>,
    pub cast: Option<String>,
    pub tmdb_overview: Option<String>,
    pub omdb_overview: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(normalize_whitespace)
        .filter(|value| !value.is_empty())
}

/// TMDB overview wins, OMDb overview is the fallback, otherwise none.
pub fn preferred_overview(movie: &MovieText) -> Option<String> {
    non_blank(movie.tmdb_overview.as_deref()).or_else(|| non_blank(movie.omdb_overview.as_deref()))
}

pub fn movie_payload_for_embedding(movie: &MovieText) -> String {
    let mut parts = Vec::<String>::new();

    let title = normalize_whitespace(&movie.title);
    if !title.is_empty() {
        parts.push(title);
    }
    if let Some(year) = movie.year {
        parts.push(format!("Year: {year}"));
    }
    if let Some(genres) = non_blank(movie.genres.as_deref()) {
        parts.push(format!("Genres: {genres}"));
    }
    if let Some(director) = non_blank(movie.director.as_deref()) {
        parts.push(format!("Director: {director}"));
    }
    if let Some(cast) = non_blank(movie.cast.as_deref()) {
        parts.push(format!("Cast: {cast}"));
    }
    if let Some(overview) = preferred_overview(movie) {
        parts.push(overview);
    }

    parts.join(" | ")
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in &tokens {
        let hash = stable_hash(token);
        let index = (hash % dims as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn dot_product(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 0.0;
    }

    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| left_value * right_value)
        .sum::<f32>()
}

// First eight bytes of SHA-256, so vectors stay identical across toolchains.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let words = payload
        .split_whitespace()
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

pub fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    for value in values {
        *value /= norm;
    }
}
