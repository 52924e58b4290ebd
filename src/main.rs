use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use cat_ingest::config::{Config, ConflictPolicy};
use cat_ingest::constants;
use cat_ingest::loader::{CatalogSink, DryRunSink, MysqlSink, SqliteSink};
use cat_ingest::manifest::Manifest;
use cat_ingest::remote::HttpRemote;
use cat_ingest::transform::AdapterRegistry;
use cat_ingest::{logging, metrics, Pipeline, PipelineResult, RunOptions};

#[derive(Parser)]
#[command(name = "cat-ingest")]
#[command(about = "Convert astronomical catalogs and load them into the CAT database")]
#[command(version)]
struct Cli {
    /// Config file (default: $CAT_INGEST_CONFIG or cat_ingest.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Target {
    /// The CAT MySQL database (CAT_DATABASE_URL)
    Mysql,
    /// The local SQLite staging database
    Sqlite,
}

#[derive(Subcommand)]
enum Commands {
    /// List the remote files of a catalog
    List {
        #[arg(long, default_value = constants::GAIA_EDR3_CATALOG)]
        catalog: String,
    },
    /// Download raw catalog files
    Fetch {
        #[arg(long, default_value = constants::GAIA_EDR3_CATALOG)]
        catalog: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Limit download bandwidth
        #[arg(long)]
        throttle: bool,
    },
    /// Read, validate and stage local files
    Convert {
        #[arg(long, default_value = constants::GAIA_EDR3_CATALOG)]
        catalog: String,
        /// Source files; defaults to the catalog's raw directory
        files: Vec<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
        /// Re-convert files that are already staged
        #[arg(long)]
        force: bool,
    },
    /// Load staged files into the target database
    Load {
        #[arg(long, default_value = constants::GAIA_EDR3_CATALOG)]
        catalog: String,
        #[arg(long, value_enum, default_value_t = Target::Mysql)]
        target: Target,
        /// Actually write; without this nothing is changed
        #[arg(long)]
        commit: bool,
        /// Roll back earlier loads of each staged file first (needs --commit)
        #[arg(long)]
        replace: bool,
        #[arg(long, value_enum)]
        on_conflict: Option<ConflictPolicy>,
    },
    /// Fetch, convert and load in one go
    Run {
        #[arg(long, default_value = constants::GAIA_EDR3_CATALOG)]
        catalog: String,
        /// Local source files instead of the remote archive
        files: Vec<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value_t = Target::Mysql)]
        target: Target,
        #[arg(long)]
        commit: bool,
        #[arg(long)]
        replace: bool,
        /// Keep raw downloads and reuse ones already on disk
        #[arg(long)]
        keep_raw: bool,
        #[arg(long)]
        throttle: bool,
        #[arg(long)]
        force: bool,
        #[arg(long, value_enum)]
        on_conflict: Option<ConflictPolicy>,
    },
    /// List loaded batches from the target's ledger
    Batches {
        #[arg(long, value_enum, default_value_t = Target::Mysql)]
        target: Target,
    },
    /// Remove the rows of one batch
    Rollback {
        #[arg(long)]
        batch: Uuid,
        #[arg(long, value_enum, default_value_t = Target::Mysql)]
        target: Target,
        #[arg(long)]
        commit: bool,
    },
    /// List adapters and configured catalogs
    Adapters,
}

/// The sink for `target`. Without `commit` the real sink, when reachable,
/// only answers read-only questions behind a [`DryRunSink`].
async fn build_sink(config: &Config, target: Target, commit: bool) -> anyhow::Result<Arc<dyn CatalogSink>> {
    let db = &config.database;
    let real: Option<Arc<dyn CatalogSink>> = match target {
        Target::Sqlite => {
            if commit || db.sqlite_path.exists() {
                Some(Arc::new(SqliteSink::open(&db.sqlite_path, db.conflict)?))
            } else {
                None
            }
        }
        Target::Mysql => match config.database_url() {
            Some(url) => Some(Arc::new(
                MysqlSink::connect(&url, db.batch_size, db.conflict)
                    .await
                    .context("connecting to the CAT database")?,
            )),
            None if commit => bail!(
                "no database URL: set {} or database.url in the config file",
                constants::DATABASE_URL_ENV
            ),
            None => {
                warn!("No database URL configured; dry run without a database");
                None
            }
        },
    };

    match (commit, real) {
        (true, Some(sink)) => Ok(sink),
        (true, None) => bail!("no writable target"),
        (false, inner) => Ok(Arc::new(DryRunSink::new(inner))),
    }
}

async fn build_pipeline(
    mut config: Config,
    target: Target,
    commit: bool,
    throttle: bool,
    on_conflict: Option<ConflictPolicy>,
) -> anyhow::Result<Pipeline> {
    if let Some(policy) = on_conflict {
        config.database.conflict = policy;
    }
    let registry = AdapterRegistry::from_config(&config)?;
    let remote = Arc::new(HttpRemote::from_config(&config.download, throttle)?);
    let manifest = Manifest::open(config.manifest_path())?;
    let sink = build_sink(&config, target, commit).await?;
    Ok(Pipeline::new(config, remote, registry, sink, manifest))
}

fn print_result(title: &str, result: &PipelineResult) {
    println!("\n📊 {} for {}:", title, result.catalog);
    println!("   Target: {}{}", result.target, if result.dry_run { " (dry run)" } else { "" });
    println!("   Files seen: {}", result.files_seen);
    println!("   Skipped: {}", result.files_skipped);
    if result.files_downloaded > 0 {
        println!(
            "   Downloaded: {} ({} bytes)",
            result.files_downloaded, result.bytes_downloaded
        );
    }
    if result.files_converted > 0 {
        println!("   Converted: {}", result.files_converted);
        println!("{}", result.stats);
    }
    if result.files_loaded > 0 {
        println!("   Loaded: {} batches", result.files_loaded);
        if result.dry_run {
            let offered: u64 = result.batches.iter().map(|b| b.rows_offered).sum();
            println!("   Would insert: {} rows", offered);
        } else {
            println!("   Inserted: {} rows", result.rows_inserted);
        }
        for batch in &result.batches {
            println!("     - {}", batch.batch_id);
        }
    }
    if result.rows_rolled_back > 0 {
        println!("   Rolled back: {} rows", result.rows_rolled_back);
    }
    if !result.errors.is_empty() {
        warn!("{} errors encountered during pipeline run", result.errors.len());
        println!("\n⚠️  Errors encountered:");
        for e in &result.errors {
            println!("   - {}", e);
        }
    }
    if result.dry_run && result.files_loaded > 0 {
        println!("\nℹ️  Dry run: nothing was written. Re-run with --commit to load.");
    }
}

fn finish(result: &PipelineResult) -> anyhow::Result<()> {
    if result.errors.is_empty() {
        Ok(())
    } else {
        bail!("{} file(s) failed", result.errors.len())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (config_path, explicit) = match cli.config {
        Some(path) => (path, true),
        None => match std::env::var(constants::CONFIG_PATH_ENV) {
            Ok(p) if !p.trim().is_empty() => (PathBuf::from(p), true),
            _ => (PathBuf::from(constants::DEFAULT_CONFIG_PATH), false),
        },
    };
    let config = Config::load(&config_path, explicit)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let _guard = logging::init_logging(&config.paths.log_dir.to_string_lossy());
    metrics::init_metrics();
    if config_path.exists() {
        info!("Using config {} ({} catalogs)", config_path.display(), config.catalogs.len());
    } else {
        warn!("Config file '{}' not found, using built-in defaults", config_path.display());
    }

    match cli.command {
        Commands::List { catalog } => {
            let pipeline = build_pipeline(config, Target::Sqlite, false, false, None).await?;
            let urls = pipeline.list(&catalog).await?;
            println!("📡 {} files for {}:", urls.len(), catalog);
            for url in urls {
                println!("   {}", url);
            }
        }
        Commands::Fetch {
            catalog,
            limit,
            throttle,
        } => {
            println!("📥 Fetching {}...", catalog);
            let pipeline = build_pipeline(config, Target::Sqlite, false, throttle, None).await?;
            let opts = RunOptions {
                limit,
                ..Default::default()
            };
            let result = pipeline.fetch(&catalog, &opts).await?;
            print_result("Fetch", &result);
            finish(&result)?;
        }
        Commands::Convert {
            catalog,
            files,
            limit,
            force,
        } => {
            println!("🔧 Converting {}...", catalog);
            let pipeline = build_pipeline(config, Target::Sqlite, false, false, None).await?;
            let opts = RunOptions {
                limit,
                files,
                force,
                ..Default::default()
            };
            let result = pipeline.convert(&catalog, &opts).await?;
            print_result("Conversion", &result);
            finish(&result)?;
        }
        Commands::Load {
            catalog,
            target,
            commit,
            replace,
            on_conflict,
        } => {
            println!("💾 Loading {}...", catalog);
            let pipeline = build_pipeline(config, target, commit, false, on_conflict).await?;
            let opts = RunOptions {
                replace,
                ..Default::default()
            };
            let result = pipeline.load(&catalog, &opts).await?;
            print_result("Load", &result);
            finish(&result)?;
        }
        Commands::Run {
            catalog,
            files,
            limit,
            target,
            commit,
            replace,
            keep_raw,
            throttle,
            force,
            on_conflict,
        } => {
            println!("🚀 Running full pipeline for {}...", catalog);
            let pipeline = build_pipeline(config, target, commit, throttle, on_conflict).await?;
            let opts = RunOptions {
                limit,
                keep_raw,
                files,
                force,
                replace,
            };
            let result = pipeline.run(&catalog, &opts).await?;
            print_result("Pipeline Results", &result);
            finish(&result)?;
        }
        Commands::Batches { target } => {
            let pipeline = build_pipeline(config, target, false, false, None).await?;
            let batches = pipeline.batches().await?;
            if batches.is_empty() {
                println!("No batches recorded at {}", pipeline.sink().describe());
            }
            for b in batches {
                println!(
                    "{}  {:<12} {:<16} {:>10} rows  {:<11} {}  {}",
                    b.batch_id, b.catalog, b.target_table, b.row_count, b.status, b.loaded_at, b.source_file
                );
            }
        }
        Commands::Rollback {
            batch,
            target,
            commit,
        } => {
            let pipeline = build_pipeline(config, target, commit, false, None).await?;
            match pipeline.rollback(batch).await {
                Ok(n) if commit => println!("↩️  Rolled back batch {}: {} rows deleted", batch, n),
                Ok(n) => println!(
                    "ℹ️  Dry run: rolling back batch {} would delete {} rows. Re-run with --commit.",
                    batch, n
                ),
                Err(e) => {
                    error!("Rollback of {} failed: {}", batch, e);
                    return Err(e.into());
                }
            }
        }
        Commands::Adapters => {
            println!("🧩 Adapters:");
            for name in constants::get_builtin_adapters() {
                println!("   {}", name);
            }
            let registry = AdapterRegistry::from_config(&config)?;
            println!("\n📚 Catalogs:");
            for name in registry.list_catalogs() {
                let cat = config.catalog(name)?;
                println!(
                    "   {} (adapter {}, table {}, V <= {}, dec > {})",
                    cat.name, cat.adapter, cat.table, cat.cuts.max_vmag, cat.cuts.min_dec
                );
            }
        }
    }
    Ok(())
}
