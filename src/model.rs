use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Ingest,
    TmdbEnrich,
    OmdbEnrich,
    Embed,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::Ingest,
        StageName::TmdbEnrich,
        StageName::OmdbEnrich,
        StageName::Embed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::TmdbEnrich => "tmdb_enrich",
            Self::OmdbEnrich => "omdb_enrich",
            Self::Embed => "embed",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Pending,
    Skipped,
    Running,
    Done,
    DoneWithWarnings,
    Failed,
}

impl StageState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Skipped => "SKIPPED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::DoneWithWarnings => "DONE_WITH_WARNINGS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage error does to the rest of the pipeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    Fatal,
    Warn,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageName,
    pub policy: ErrorPolicy,
    pub state: StageState,
    pub rows_processed: usize,
    pub rows_written: usize,
    pub duration_ms: u128,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelinePaths {
    pub db_path: String,
    pub index_path: String,
    pub manifest_dir: String,
    pub dataset_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub schema_version: u32,
    pub status: String,
    pub paths: PipelinePaths,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub model_id: String,
    pub backend: String,
    pub embedding_dim: usize,
    pub normalization: String,
    pub index_path: String,
    pub movies_embedded: usize,
    pub batch_size: usize,
    pub content_checksum: String,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub movie_id: i64,
    pub score: f32,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub avg_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub model_id: String,
    pub k: usize,
    pub returned: usize,
    pub results: Vec<SearchResult>,
}
