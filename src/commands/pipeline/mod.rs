//! The stage controller: ingest, TMDB enrichment, OMDb enrichment and index
//! build, in that order, each skipped when its completion marker and artifact
//! say it is already done.

use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::cli::{HttpArgs, RunArgs, ServiceArgs};
use crate::commands::embed::{build_index, index_is_current};
use crate::commands::enrich::{
    EnrichOptions, enrich_omdb, enrich_tmdb, omdb_client, tmdb_client,
};
use crate::commands::ingest::{IngestSource, ingest_dataset};
use crate::lookup::omdb::OmdbApi;
use crate::lookup::tmdb::TmdbApi;
use crate::model::{
    ErrorPolicy, PipelinePaths, PipelineRunManifest, StageName, StageReport, StageState,
};
use crate::semantic::{Embedder, SemanticModelConfig, build_embedder, resolve_model_config};
use crate::store::{self, count_movies};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

mod controller;
mod serve;

pub use controller::run_pipeline;
pub use serve::{ServeEnv, hand_off};

/// Everything the controller needs besides its external collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub db_path: PathBuf,
    pub index_path: PathBuf,
    pub manifest_dir: PathBuf,
    pub dataset: IngestSource,
    pub embed_batch_size: usize,
    pub enrich: EnrichOptions,
    pub tmdb_policy: ErrorPolicy,
    pub omdb_policy: ErrorPolicy,
}

impl PipelineSettings {
    pub fn from_args(args: &RunArgs) -> Self {
        Self {
            db_path: args.store.db_path.clone(),
            index_path: args.store.resolved_index_path(),
            manifest_dir: args.store.manifest_dir.clone(),
            dataset: IngestSource {
                dataset_dir: args.dataset.dataset_dir.clone(),
                tmdb5000_csv: args.dataset.tmdb5000_csv.clone(),
            },
            embed_batch_size: args.embedding.embed_batch_size.max(1),
            enrich: EnrichOptions::from_services(&args.services),
            tmdb_policy: args.tmdb_on_error,
            omdb_policy: args.omdb_on_error,
        }
    }

    pub fn policy_for(&self, stage: StageName) -> ErrorPolicy {
        match stage {
            StageName::TmdbEnrich => self.tmdb_policy,
            StageName::OmdbEnrich => self.omdb_policy,
            StageName::Ingest | StageName::Embed => ErrorPolicy::Fatal,
        }
    }
}

/// External collaborators of the stages. Each is built only when its stage
/// actually runs, so a missing API key surfaces as that stage's error.
pub trait StageServices {
    fn tmdb(&self) -> Result<Box<dyn TmdbApi>>;
    fn omdb(&self) -> Result<Box<dyn OmdbApi>>;
    fn embedder(&self) -> Result<Box<dyn Embedder>>;
}

/// Real HTTP clients and the configured embedding backend.
pub struct ConfiguredServices {
    services: ServiceArgs,
    http: HttpArgs,
    model: SemanticModelConfig,
}

impl StageServices for ConfiguredServices {
    fn tmdb(&self) -> Result<Box<dyn TmdbApi>> {
        Ok(Box::new(tmdb_client(&self.services, &self.http)?))
    }

    fn omdb(&self) -> Result<Box<dyn OmdbApi>> {
        Ok(Box::new(omdb_client(&self.services, &self.http)?))
    }

    fn embedder(&self) -> Result<Box<dyn Embedder>> {
        build_embedder(&self.model, self.http.timeout())
    }
}

/// Returns the process exit code: 0 after a successful run without a serve
/// command, otherwise the serve command's own exit code.
pub fn run(args: RunArgs) -> Result<i32> {
    let settings = PipelineSettings::from_args(&args);
    let model = resolve_model_config(
        &args.embedding.emb_model,
        args.embedding.embed_url.as_deref(),
        args.embedding.embed_dim,
    );
    let services = ConfiguredServices {
        services: args.services.clone(),
        http: args.http.clone(),
        model: model.clone(),
    };

    let outcome = run_pipeline(&settings, &services)?;
    if let Some(stage) = outcome.failed_stage() {
        bail!(
            "pipeline failed at stage {stage}; see {}",
            outcome.manifest_path.display()
        );
    }

    if args.serve_command.is_empty() {
        return Ok(0);
    }

    let env = ServeEnv {
        db_path: settings.db_path.clone(),
        index_path: settings.index_path.clone(),
        emb_model: model.model_id,
        api_host: args.api_host.clone(),
        api_port: args.api_port,
    };
    hand_off(&args.serve_command, &env)
}
