//! Dietdata CLI - serve and inspect a diet recipes dataset
//!
//! # Main Commands
//!
//! ```bash
//! dietdata serve                              # Start HTTP server (port 3000)
//! dietdata serve --csv data/All_Diets.csv     # Serve a specific file
//! ```
//!
//! # Offline Commands
//!
//! ```bash
//! dietdata clean data/All_Diets.csv           # Cleaned records as JSON
//! dietdata stats data/All_Diets.csv           # Statistics snapshot as JSON
//! dietdata query data/All_Diets.csv -p diet_type=keto -p sort_by=protein
//! dietdata fingerprint data/All_Diets.csv     # Content fingerprint
//! ```

use clap::{Parser, Subcommand};
use dietdata::{
    clean_with_report, compute_statistics, CleanRecordView, CsvSource, Dataset, DatasetPage,
    Engine, EngineConfig, LoadedSource, QueryRequest,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dietdata")]
#[command(about = "Fingerprinted cache and query engine for a diet recipes CSV", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to listen on (default: $PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Source CSV (default: $DIET_CSV_PATH or data/All_Diets.csv)
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Seconds between source checks
        #[arg(long)]
        poll_secs: Option<u64>,

        /// Statistics time-to-live in seconds
        #[arg(long)]
        stats_ttl_secs: Option<u64>,

        /// Mirror cached snapshots to this directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Poll only, ignore file-system events
        #[arg(long)]
        no_watch_events: bool,
    },

    /// Clean a CSV and output the records as JSON
    Clean {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compute statistics for a CSV
    Stats {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run one query against a CSV
    Query {
        /// Input CSV file
        input: PathBuf,

        /// Query parameter, e.g. `-p diet_type=keto -p per_page=5`
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the content fingerprint of a CSV
    Fingerprint {
        /// Input CSV file
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            port,
            csv,
            poll_secs,
            stats_ttl_secs,
            cache_dir,
            no_watch_events,
        } => {
            let mut config = EngineConfig::from_env();
            if let Some(port) = port {
                config = config.with_port(port);
            }
            if let Some(csv) = csv {
                config = config.with_source(csv);
            }
            if let Some(secs) = poll_secs {
                config = config.with_poll_interval(Duration::from_secs(secs));
            }
            if let Some(secs) = stats_ttl_secs {
                config = config.with_stats_ttl(Duration::from_secs(secs));
            }
            if cache_dir.is_some() {
                config = config.with_cache_dir(cache_dir);
            }
            if no_watch_events {
                config = config.with_watch_events(false);
            }
            cmd_serve(config).await
        }

        Commands::Clean { input, output } => cmd_clean(&input, output.as_deref()),

        Commands::Stats { input, output } => cmd_stats(&input, output.as_deref()),

        Commands::Query {
            input,
            params,
            output,
        } => cmd_query(&input, params, output.as_deref()),

        Commands::Fingerprint { input } => cmd_fingerprint(&input),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    Ok((key.trim().to_string(), value.to_string()))
}

async fn cmd_serve(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;
    let engine = Arc::new(Engine::new(config));
    Ok(dietdata::server::start_server(engine, port).await?)
}

/// Load and clean `input`, logging what the Cleaner dropped.
fn load_dataset(input: &Path) -> Result<Dataset, Box<dyn std::error::Error>> {
    let LoadedSource {
        records,
        fingerprint,
        info,
    } = CsvSource::new(input).load()?;
    tracing::info!(
        encoding = %info.encoding,
        delimiter = %format_delimiter(info.delimiter),
        rows = info.row_count,
        "parsed {}",
        input.display()
    );

    let (records, report) = clean_with_report(&records);
    tracing::info!(
        kept = report.kept,
        duplicates = report.duplicates,
        outliers = report.outliers,
        incomplete = report.missing_fields,
        "cleaned"
    );
    for note in &report.outlier_notes {
        tracing::warn!("outlier dropped: {}", note);
    }
    Ok(Dataset::new(records, fingerprint))
}

fn cmd_clean(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = load_dataset(input)?;
    let views: Vec<CleanRecordView> = dataset.records.iter().map(CleanRecordView::from).collect();
    write_output(&serde_json::to_string_pretty(&views)?, output)
}

fn cmd_stats(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = load_dataset(input)?;
    let stats = compute_statistics(&dataset);
    write_output(&serde_json::to_string_pretty(&stats)?, output)
}

fn cmd_query(
    input: &Path,
    params: Vec<(String, String)>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = load_dataset(input)?;
    let params: HashMap<String, String> = params.into_iter().collect();
    let page = DatasetPage::build(&dataset, &QueryRequest::from_params(&params));
    write_output(&serde_json::to_string_pretty(&page)?, output)
}

fn cmd_fingerprint(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let fingerprint = CsvSource::new(input).fingerprint()?;
    println!("{}", fingerprint);
    Ok(())
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            tracing::info!("output written to {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
