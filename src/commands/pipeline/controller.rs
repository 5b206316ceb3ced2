use super::*;

const PIPELINE_MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub manifest: PipelineRunManifest,
    pub manifest_path: PathBuf,
}

impl PipelineOutcome {
    pub fn failed_stage(&self) -> Option<StageName> {
        self.manifest
            .stages
            .iter()
            .find(|report| report.state == StageState::Failed)
            .map(|report| report.stage)
    }

    #[cfg(test)]
    pub fn report(&self, stage: StageName) -> Option<&StageReport> {
        self.manifest
            .stages
            .iter()
            .find(|report| report.stage == stage)
    }
}

enum StageResult {
    Skipped(String),
    Ran { processed: usize, written: usize },
}

/// Runs the stages in order and writes the run manifest. A stage error
/// under `Fatal` halts the run and leaves later stages `PENDING`; under
/// `Warn` the stage ends `DONE_WITH_WARNINGS` and the run continues.
///
/// Only store-level problems (opening or migrating the row store, writing
/// the manifest) are returned as `Err`.
pub fn run_pipeline(
    settings: &PipelineSettings,
    services: &dyn StageServices,
) -> Result<PipelineOutcome> {
    let started_at = now_utc_string();
    let run_stamp = utc_compact_string(Utc::now());
    let mut connection = store::open_store(&settings.db_path)?;
    let schema_version = store::current_schema_version(&connection)?;

    let mut reports = StageName::ALL
        .iter()
        .map(|stage| StageReport {
            stage: *stage,
            policy: settings.policy_for(*stage),
            state: StageState::Pending,
            rows_processed: 0,
            rows_written: 0,
            duration_ms: 0,
            skip_reason: None,
            error: None,
        })
        .collect::<Vec<StageReport>>();

    for report in &mut reports {
        let stage = report.stage;
        let started = Instant::now();
        report.state = StageState::Running;

        let result = run_stage(stage, &mut connection, settings, services);
        report.duration_ms = started.elapsed().as_millis();

        match result {
            Ok(StageResult::Skipped(reason)) => {
                info!(stage = %stage, reason = %reason, "stage skipped");
                report.state = StageState::Skipped;
                report.skip_reason = Some(reason);
            }
            Ok(StageResult::Ran { processed, written }) => {
                info!(
                    stage = %stage,
                    processed,
                    written,
                    duration_ms = report.duration_ms as u64,
                    "stage done"
                );
                report.state = StageState::Done;
                report.rows_processed = processed;
                report.rows_written = written;
            }
            Err(err) => {
                let message = format!("{err:#}");
                report.error = Some(message.clone());
                match report.policy {
                    ErrorPolicy::Fatal => {
                        error!(stage = %stage, error = %message, "stage failed");
                        report.state = StageState::Failed;
                        break;
                    }
                    ErrorPolicy::Warn => {
                        warn!(stage = %stage, error = %message, "stage failed; continuing");
                        report.state = StageState::DoneWithWarnings;
                    }
                }
            }
        }
    }

    let status = if reports.iter().any(|r| r.state == StageState::Failed) {
        "failed"
    } else if reports.iter().any(|r| r.state == StageState::DoneWithWarnings) {
        "completed_with_warnings"
    } else {
        "completed"
    };

    let manifest = PipelineRunManifest {
        manifest_version: PIPELINE_MANIFEST_VERSION,
        run_id: format!("pipeline-{run_stamp}"),
        started_at,
        finished_at: now_utc_string(),
        schema_version,
        status: status.to_string(),
        paths: PipelinePaths {
            db_path: settings.db_path.display().to_string(),
            index_path: settings.index_path.display().to_string(),
            manifest_dir: settings.manifest_dir.display().to_string(),
            dataset_dir: settings.dataset.dataset_dir.display().to_string(),
        },
        stages: reports,
    };

    ensure_directory(&settings.manifest_dir)?;
    let manifest_path = settings
        .manifest_dir
        .join(format!("pipeline_run_{run_stamp}.json"));
    write_json_pretty(&manifest_path, &manifest)?;

    for report in &manifest.stages {
        info!(
            stage = %report.stage,
            state = %report.state,
            rows_written = report.rows_written,
            "stage summary"
        );
    }
    info!(
        path = %manifest_path.display(),
        status,
        "pipeline run finished"
    );

    Ok(PipelineOutcome {
        manifest,
        manifest_path,
    })
}

fn run_stage(
    stage: StageName,
    connection: &mut Connection,
    settings: &PipelineSettings,
    services: &dyn StageServices,
) -> Result<StageResult> {
    match stage {
        StageName::Ingest => {
            let movies = count_movies(connection)?;
            if movies > 0 {
                return Ok(StageResult::Skipped(format!(
                    "movies table already holds {movies} rows"
                )));
            }

            let outcome = ingest_dataset(connection, &settings.dataset)?;
            Ok(StageResult::Ran {
                processed: outcome.movielens_movies + outcome.tmdb_movies_added,
                written: outcome.movies_total as usize,
            })
        }
        StageName::TmdbEnrich | StageName::OmdbEnrich => {
            if let Some(marker) = store::load_marker(connection, stage.as_str())? {
                return Ok(StageResult::Skipped(format!(
                    "completed at {} over {} rows",
                    marker.completed_at, marker.rows_processed
                )));
            }

            let outcome = if stage == StageName::TmdbEnrich {
                let api = services.tmdb()?;
                enrich_tmdb(connection, api.as_ref(), settings.enrich)?
            } else {
                let api = services.omdb()?;
                enrich_omdb(connection, api.as_ref(), settings.enrich)?
            };
            Ok(StageResult::Ran {
                processed: outcome.rows_processed,
                written: outcome.rows_written,
            })
        }
        StageName::Embed => {
            let embedder = services.embedder()?;
            if let Some(reason) =
                index_is_current(connection, &settings.index_path, embedder.as_ref())?
            {
                return Ok(StageResult::Skipped(reason));
            }

            let outcome = build_index(
                connection,
                embedder.as_ref(),
                &settings.index_path,
                settings.embed_batch_size,
            )?;
            Ok(StageResult::Ran {
                processed: outcome.movies_embedded,
                written: outcome.movies_embedded,
            })
        }
    }
}
