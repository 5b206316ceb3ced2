use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::lookup::ApiKey;
use crate::model::ErrorPolicy;
use crate::semantic::DEFAULT_MODEL_NAME;

pub const INDEX_FILE_NAME: &str = "movies.idx";

#[derive(Parser, Debug)]
#[command(
    name = "moviepipe",
    version,
    about = "Movie dataset ingest, metadata enrichment and vector index pipeline"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs every stage in order, skipping the ones already complete.
    Run(RunArgs),
    Ingest(IngestArgs),
    EnrichTmdb(EnrichArgs),
    EnrichOmdb(EnrichArgs),
    Embed(EmbedArgs),
    Search(SearchArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, env = "DB_PATH", default_value = "data/movies.db")]
    pub db_path: PathBuf,

    #[arg(long, env = "INDEX_DIR", default_value = "data/index")]
    pub index_dir: PathBuf,

    /// Overrides `<index-dir>/movies.idx`.
    #[arg(long, env = "INDEX_PATH")]
    pub index_path: Option<PathBuf>,

    #[arg(long, env = "MANIFEST_DIR", default_value = "data/manifests")]
    pub manifest_dir: PathBuf,
}

impl StoreArgs {
    pub fn resolved_index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.index_dir.join(INDEX_FILE_NAME))
    }
}

#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// MovieLens 100k directory holding u.item, u.genre and u.data.
    #[arg(long, env = "DATASET_DIR", default_value = "data/ml-100k")]
    pub dataset_dir: PathBuf,

    #[arg(long, env = "TMDB5000_CSV")]
    pub tmdb5000_csv: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    #[arg(long, env = "EMB_MODEL", default_value = DEFAULT_MODEL_NAME)]
    pub emb_model: String,

    /// Base URL of an `/api/embed` service; the local hashing backend is used when unset.
    #[arg(long, env = "EMBED_URL")]
    pub embed_url: Option<String>,

    #[arg(long, env = "EMBED_DIM")]
    pub embed_dim: Option<usize>,

    #[arg(long, env = "EMBED_BATCH_SIZE", default_value_t = 256)]
    pub embed_batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 20)]
    pub http_timeout_secs: u64,

    /// Extra attempts after the first one for transient lookup failures.
    #[arg(long, env = "HTTP_RETRIES", default_value_t = 3)]
    pub http_retries: u32,
}

impl HttpArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    #[arg(long, env = "TMDB_API_KEY", hide_env_values = true)]
    pub tmdb_api_key: Option<ApiKey>,

    #[arg(long, env = "OMDB_API_KEY", hide_env_values = true)]
    pub omdb_api_key: Option<ApiKey>,

    /// Consecutive failed lookups after which a stage gives up on its service.
    #[arg(long, env = "MAX_CONSECUTIVE_FAILURES", default_value_t = 25)]
    pub max_consecutive_failures: usize,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub http: HttpArgs,

    #[command(flatten)]
    pub services: ServiceArgs,

    #[arg(long, env = "TMDB_ON_ERROR", value_enum, default_value_t = ErrorPolicy::Fatal)]
    pub tmdb_on_error: ErrorPolicy,

    #[arg(long, env = "OMDB_ON_ERROR", value_enum, default_value_t = ErrorPolicy::Warn)]
    pub omdb_on_error: ErrorPolicy,

    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub api_host: String,

    #[arg(long, env = "API_PORT", default_value_t = 8000)]
    pub api_port: u16,

    /// Command started once every stage is done, e.g. `-- uvicorn app:app`.
    #[arg(last = true)]
    pub serve_command: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Wipe existing movies (and all stage markers) before loading.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EnrichArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub http: HttpArgs,

    #[command(flatten)]
    pub services: ServiceArgs,
}

#[derive(Args, Debug, Clone)]
pub struct EmbedArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub http: HttpArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub http: HttpArgs,

    #[arg(long)]
    pub query: String,

    #[arg(long, default_value_t = 10)]
    pub k: usize,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}
