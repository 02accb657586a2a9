#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferry::config::{FerryConfig, CONFIG_FILE_NAME, DEFAULT_CONFIG};
use ferry::{Migration, RunReport, SettingsOutcome, StagingStore, UploadStatus};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Staged record migration between search indexes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file (defaults to ./ferry.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every record from the source index to the destination index
    Copy {
        /// Stop extracting once more than this many records were staged
        #[arg(short, long)]
        limit: Option<usize>,
        /// Also replicate index settings
        #[arg(long)]
        copy_settings: bool,
    },

    /// Replicate index settings only
    Settings,

    /// Show what a failed run left in the staging directory
    Staging {
        /// Remove staged chunks
        #[arg(long)]
        purge: bool,
    },

    /// Show effective configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create default ferry.toml in the current directory
    Init,
    /// Show path to the config file
    Path,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Copy {
            limit,
            copy_settings,
        } => handle_copy(config_path, limit, copy_settings),
        Commands::Settings => handle_settings(config_path),
        Commands::Staging { purge } => handle_staging(config_path, purge),
        Commands::Config { action } => handle_config(config_path, action),
    }
}

/// Text logs by default, JSON with FERRY_LOG_JSON=1.
fn init_tracing(log_level: &str) {
    let json_logging = std::env::var("FERRY_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("ferry={log_level}").into());

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn cli_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FerryConfig> {
    let mut config = FerryConfig::load(path)?;
    config.apply_env_overrides();
    Ok(config)
}

// === CLI handlers ===

fn handle_copy(
    config_path: Option<&Path>,
    limit: Option<usize>,
    copy_settings: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if limit.is_some() {
        config.run.limit = limit;
    }
    config.run.copy_settings |= copy_settings;

    let migration = Migration::new(&config)?;
    let report = cli_runtime()?.block_on(migration.copy())?;
    print_report(&report);

    if let UploadStatus::Stalled { chunk, error } = &report.upload.status {
        anyhow::bail!(
            "Upload stalled at chunk {}: {} (staging kept at {})",
            chunk,
            error,
            migration.staging().root().display()
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Operation:   {}", report.operation.as_str());
    println!(
        "Extracted:   {} records in {} chunks{}",
        report.extraction.records,
        report.extraction.chunks,
        if report.extraction.stopped_early { " (limit reached)" } else { "" }
    );
    println!(
        "Transformed: {} records in {} chunks",
        report.transform.records, report.transform.chunks_written
    );
    println!(
        "Pushed:      {} records in {} batches",
        report.upload.records_pushed, report.upload.chunks_pushed
    );
    let settings = match report.settings {
        SettingsOutcome::Skipped => "not copied",
        SettingsOutcome::Copied => "copied",
        SettingsOutcome::Failed => "FAILED",
    };
    println!("Settings:    {}", settings);
}

fn handle_settings(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let migration = Migration::new(&config)?;
    cli_runtime()?.block_on(migration.copy_settings())?;
    println!(
        "Settings copied from {} to {}",
        config.source.index, config.destination.index
    );
    Ok(())
}

fn handle_staging(config_path: Option<&Path>, purge: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let staging = StagingStore::new(&config.staging.dir);
    let rt = cli_runtime()?;

    let summary = rt.block_on(staging.inspect())?;
    println!("Staging:     {}", staging.root().display());
    if summary.is_empty() {
        println!("(empty)");
    } else {
        println!(
            "raw:         {} chunks, {} bytes",
            summary.raw_chunks, summary.raw_bytes
        );
        println!(
            "transformed: {} chunks, {} bytes",
            summary.transformed_chunks, summary.transformed_bytes
        );
    }

    if purge {
        rt.block_on(staging.purge_all())?;
        println!("Purged");
    }
    Ok(())
}

fn handle_config(config_path: Option<&Path>, action: Option<ConfigAction>) -> anyhow::Result<()> {
    let resolved = config_path.map(Path::to_path_buf).or_else(|| {
        FerryConfig::default_paths()
            .into_iter()
            .find(|candidate| candidate.exists())
    });

    match action {
        Some(ConfigAction::Path) => match resolved {
            Some(path) => println!("{}", path.display()),
            None => println!("(none, using defaults)"),
        },
        Some(ConfigAction::Init) => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            if path.exists() {
                eprintln!("Config already exists: {}", path.display());
                return Ok(());
            }
            std::fs::write(&path, DEFAULT_CONFIG)?;
            println!("Created: {}", path.display());
        }
        None => {
            let mut config = load_config(config_path)?;
            // Never echo credentials
            for side in [&mut config.source, &mut config.destination] {
                if !side.api_key.is_empty() {
                    side.api_key = "***".into();
                }
            }
            let origin = resolved
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".into());
            println!("# Effective config ({})\n", origin);
            println!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
