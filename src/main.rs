mod cli;
mod commands;
mod index;
mod lookup;
mod model;
mod semantic;
mod store;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    match run() {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!(error = %err, "command failed");
            for cause in err.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => return commands::pipeline::run(args),
        Commands::Ingest(args) => commands::ingest::run(args)?,
        Commands::EnrichTmdb(args) => commands::enrich::run_tmdb(args)?,
        Commands::EnrichOmdb(args) => commands::enrich::run_omdb(args)?,
        Commands::Embed(args) => commands::embed::run(args)?,
        Commands::Search(args) => commands::search::run(args)?,
        Commands::Status(args) => commands::status::run(args)?,
    }

    Ok(0)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
