//! Binary entry point for chronicle-rs.
//!
//! Serves the async query API or validates corpus artifacts.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chronicle_rs::cli::{Cli, Commands};
use chronicle_rs::engine::{PromptSet, QueryEngine};
use chronicle_rs::llm::create_provider;
use chronicle_rs::retrieval::HttpVectorSearch;
use chronicle_rs::server::{AppState, JobStore, serve};
use chronicle_rs::{EngineConfig, IndexStore};

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "chronicle_rs=debug" } else { "chronicle_rs=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve { host, port } => {
            let mut builder = EngineConfig::builder().from_env();
            if let Some(dir) = cli.data_dir {
                builder = builder.data_dir(dir);
            }
            let config = builder.build().context("invalid configuration")?;

            let store = IndexStore::load(&config.data_dir)
                .with_context(|| format!("loading artifacts from {}", config.data_dir.display()))?;
            let provider = create_provider(&config).context("initializing LLM provider")?;
            let vector = Arc::new(HttpVectorSearch::new(config.vector_url.clone()));
            let engine = Arc::new(QueryEngine::new(Arc::new(store), vector, provider, &config));
            let jobs = JobStore::new(config.max_active_jobs);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            println!("chronicle-rs listening on http://{addr}");

            serve(
                listener,
                AppState {
                    jobs,
                    engine,
                    job_deadline: config.job_deadline,
                },
            )
            .await
            .context("server error")?;
        }
        Commands::Check => {
            let data_dir = cli
                .data_dir
                .unwrap_or_else(|| std::path::PathBuf::from("data"));
            let store = IndexStore::load(&data_dir)
                .with_context(|| format!("loading artifacts from {}", data_dir.display()))?;
            println!("artifact version: {}", store.version());
            println!("indexed terms:    {}", store.term_count());
            println!("chunks:           {}", store.chunk_count());
            println!("endnotes:         {}", store.endnote_count());
        }
        Commands::Prompts { dir } => {
            let target = dir
                .or_else(PromptSet::default_dir)
                .context("cannot resolve a prompt directory")?;
            let written = PromptSet::write_defaults(&target)
                .with_context(|| format!("writing prompts to {}", target.display()))?;
            if written.is_empty() {
                println!("all prompt templates already present in {}", target.display());
            } else {
                for path in written {
                    println!("wrote {}", path.display());
                }
            }
        }
    }

    Ok(())
}
