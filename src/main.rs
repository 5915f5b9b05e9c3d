//! # ipvec CLI
//!
//! ## Usage
//!
//! ```bash
//! ipvec --config ./config/ipvec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ipvec init [--recreate]` | Create (or recreate) every configured collection |
//! | `ipvec ingest` | Normalize, embed and upsert the corpus |
//! | `ipvec sources` | List categories, globs and matched file counts |
//! | `ipvec stats` | Dimension, distance and point count per collection |
//! | `ipvec embed "<text>"` | Embed one text and print a preview |
//!
//! ## Examples
//!
//! ```bash
//! # First run against a fresh Qdrant
//! ipvec init
//! ipvec ingest
//!
//! # Re-ingest only patents, machine-readable summary
//! ipvec ingest --category patent --json
//!
//! # Check the corpus without calling the embedding API
//! ipvec ingest --dry-run
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};

use ipvec::collections::CollectionManager;
use ipvec::config::{self, Config};
use ipvec::discover;
use ipvec::embed_cmd;
use ipvec::embedding::{self, EmbedMode};
use ipvec::ingest::{self, Pipeline, PipelineSettings};
use ipvec::logging;
use ipvec::models::Category;
use ipvec::progress::ProgressMode;
use ipvec::sources;
use ipvec::stats;
use ipvec::store;

/// ipvec: legal and patent corpus ingestion into a vector store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "ipvec",
    about = "Ingest legal and patent JSON corpora into a partitioned vector store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ipvec.toml")]
    config: PathBuf,

    /// Progress on stderr: auto (human on a TTY), human, json, or off.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    /// Log filter, e.g. `debug` or `ipvec=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every configured collection.
    ///
    /// Existing collections with the configured dimension and distance are
    /// left untouched; ones with a different schema are replaced.
    Init {
        /// Drop and recreate every collection, deleting all points.
        #[arg(long)]
        recreate: bool,
    },

    /// Ingest the corpus.
    ///
    /// Collections must already exist (see `init`). File and item failures
    /// are reported in the summary; only fatal errors fail the command.
    Ingest {
        /// Only ingest this category (`legal` or `patent`).
        #[arg(long)]
        category: Option<String>,

        /// Maximum number of files per category.
        #[arg(long)]
        limit: Option<usize>,

        /// Normalize and count without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// List configured categories and their source files.
    Sources,

    /// Show collection schemas and point counts.
    Stats,

    /// Embed a single text and print its dimension and leading values.
    Embed {
        text: String,

        /// `passage` (stored content) or `query` (search input).
        #[arg(long, default_value = "query")]
        mode: String,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref())?;

    let progress = ProgressMode::parse(&cli.progress).ok_or_else(|| {
        anyhow!(
            "Unknown progress mode: '{}'. Use auto, human, json, or off.",
            cli.progress
        )
    })?;
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { recreate } => run_init(&cfg, recreate).await?,
        Commands::Ingest {
            category,
            limit,
            dry_run,
            json,
        } => {
            let category = category
                .as_deref()
                .map(|c| {
                    Category::parse(c)
                        .ok_or_else(|| anyhow!("Unknown category: '{}'. Use legal or patent.", c))
                })
                .transpose()?;
            run_ingest(&cfg, category, limit, dry_run, json, progress).await?;
        }
        Commands::Sources => sources::list_sources(&cfg)?,
        Commands::Stats => {
            let store = store::open_store(&cfg.store).await?;
            let manager = CollectionManager::from_config(store, &cfg);
            stats::run_stats(&manager).await?;
        }
        Commands::Embed { text, mode, json } => {
            let mode = match mode.as_str() {
                "passage" => EmbedMode::Passage,
                "query" => EmbedMode::Query,
                other => bail!("Unknown embed mode: '{}'. Use passage or query.", other),
            };
            embed_cmd::run_embed(&cfg, &text, mode, json).await?;
        }
    }

    Ok(())
}

async fn run_init(cfg: &Config, recreate: bool) -> Result<()> {
    let store = store::open_store(&cfg.store).await?;
    let manager = CollectionManager::from_config(store, cfg);
    let outcomes = manager.initialize(recreate).await?;

    println!("init ({} backend)", manager.store().backend());
    for (category, outcome) in outcomes {
        if let Some(spec) = manager.spec(category) {
            println!(
                "  {:<8} {:<22} dims={} distance={}  {:?}",
                category.as_str(),
                spec.name,
                spec.dims,
                spec.distance,
                outcome
            );
        }
    }
    println!("ok");
    Ok(())
}

async fn run_ingest(
    cfg: &Config,
    category: Option<Category>,
    limit: Option<usize>,
    dry_run: bool,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let files = discover::discover(cfg, category)?;
    let files = ingest::limit_per_category(files, limit);

    let report = if dry_run {
        ingest::dry_run(&files, cfg.ingest.max_errors_per_category).await
    } else {
        let store = store::open_store(&cfg.store).await?;
        let specs = cfg
            .categories
            .iter()
            .filter(|(c, _)| category.map_or(true, |only| only == *c))
            .filter_map(|(c, _)| cfg.collection_spec(c).map(|s| (c, s)))
            .collect::<Vec<_>>();
        let manager = Arc::new(CollectionManager::new(store, specs));
        manager.verify().await?;

        let provider = embedding::build_provider(&cfg.embedding).await?;
        let targets: Vec<_> = manager.specs().into_iter().map(|(_, s)| s).collect();
        embedding::verify_dimensions(provider.as_ref(), &targets, cfg.embedding.probe_dims).await?;

        let pipeline = Pipeline::new(provider, manager, PipelineSettings::from_config(cfg))
            .with_progress(Arc::from(progress.reporter()));

        let stop = pipeline.stop_handle();
        tokio::spawn(async move {
            if ingest::watch_interrupts(stop, tokio::signal::ctrl_c).await {
                tracing::error!("second interrupt; exiting without waiting for in-flight files");
                std::process::exit(130);
            }
        });

        pipeline.run(files).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_summary();
    }
    Ok(())
}
