mod db;
mod discovery;
mod enrich;
mod parser;
mod render;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use discovery::DriverOptions;
use enrich::fetch::HttpFetcher;
use parser::Ruleset;
use render::SessionFactory;
use settings::{PartitionConfig, Settings};

#[derive(Parser)]
#[command(name = "directory_crawler", about = "Business directory link discovery and enrichment")]
struct Cli {
    /// TOML config file (default: ./crawler.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and register configured partitions
    Init,
    /// Walk search results and store new detail-page links as pending
    Discover {
        /// Only these partitions (default: all configured)
        #[arg(short, long)]
        partition: Vec<String>,
        /// Page ceiling per partition
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Fetch and parse pending records across all partitions
    Enrich {
        /// Max records to enrich (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Concurrent fetches
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Discover, then enrich
    Run {
        #[arg(short, long)]
        partition: Vec<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Show per-partition record counts
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply the extraction ruleset to a saved HTML file
    Extract { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let conn = open_db(&settings)?;
            let n = db::register_partitions(&conn, &settings.partitions)?;
            println!(
                "Database ready at {} ({} partitions registered)",
                settings.db_path.display(),
                n
            );
            Ok(())
        }
        Commands::Discover {
            partition,
            max_pages,
        } => {
            if let Some(n) = max_pages {
                settings.max_pages = n;
            }
            let conn = open_db(&settings)?;
            run_discovery(&conn, &settings, &partition).await
        }
        Commands::Enrich { limit, workers } => {
            if let Some(n) = workers {
                settings.workers = n;
            }
            let conn = open_db(&settings)?;
            run_enrichment(&conn, &settings, limit).await
        }
        Commands::Run {
            partition,
            limit,
            workers,
        } => {
            if let Some(n) = workers {
                settings.workers = n;
            }
            let conn = open_db(&settings)?;

            let t_discover = Instant::now();
            run_discovery(&conn, &settings, &partition).await?;
            println!("Discovery took {}", format_duration(t_discover.elapsed()));

            let t_enrich = Instant::now();
            run_enrichment(&conn, &settings, limit).await?;
            println!("Enrichment took {}", format_duration(t_enrich.elapsed()));
            Ok(())
        }
        Commands::Stats { json } => {
            let conn = open_db(&settings)?;
            let stats = db::get_stats(&conn)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!(
                "{:<16} | {:>7} | {:>7} | {:>9} | {:>8}",
                "Partition", "Total", "Pending", "Processed", "Retrying"
            );
            println!("{}", "-".repeat(60));
            for s in &stats {
                println!(
                    "{:<16} | {:>7} | {:>7} | {:>9} | {:>8}",
                    s.partition, s.total, s.pending, s.processed, s.retrying
                );
            }
            let total: usize = stats.iter().map(|s| s.total).sum();
            let pending: usize = stats.iter().map(|s| s.pending).sum();
            println!("\n{} records, {} pending", total, pending);
            Ok(())
        }
        Commands::Extract { file } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let ruleset = load_ruleset(&settings)?;
            let fields = parser::extract(&html, &ruleset);
            println!("{}", serde_json::to_string_pretty(&fields)?);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_db(settings: &Settings) -> Result<rusqlite::Connection> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn load_ruleset(settings: &Settings) -> Result<Ruleset> {
    match settings.ruleset {
        Some(ref path) => Ruleset::load(path)
            .with_context(|| format!("Failed to load ruleset {}", path.display())),
        None => Ok(Ruleset::default()),
    }
}

fn select_partitions(settings: &Settings, names: &[String]) -> Result<Vec<PartitionConfig>> {
    if names.is_empty() {
        return Ok(settings.partitions.clone());
    }
    names
        .iter()
        .map(|name| {
            settings
                .partition(name)
                .cloned()
                .with_context(|| format!("Unknown partition '{}'", name))
        })
        .collect()
}

#[cfg(feature = "browser")]
fn session_factory(settings: &Settings) -> Result<Box<dyn SessionFactory>> {
    Ok(Box::new(render::ChromeFactory {
        headless: settings.headless,
        executable: settings.chrome_executable.clone(),
        request_timeout: settings.wait_timeout(),
    }))
}

#[cfg(not(feature = "browser"))]
fn session_factory(_settings: &Settings) -> Result<Box<dyn SessionFactory>> {
    Err(anyhow::anyhow!(
        "Browser support not compiled. Rebuild with: cargo build --features browser"
    ))
}

async fn run_discovery(
    conn: &rusqlite::Connection,
    settings: &Settings,
    names: &[String],
) -> Result<()> {
    let partitions = select_partitions(settings, names)?;
    let factory = session_factory(settings)?;
    let opts = DriverOptions::from_settings(settings);
    let started_at = Utc::now();

    println!("Discovering links in {} partitions...", partitions.len());
    let summary = discovery::discover_all(conn, factory.as_ref(), &partitions, &opts).await?;

    for r in &summary.reports {
        println!(
            "{:<16} {:>5} new over {:>3} pages in {:.2} min ({})",
            r.partition,
            r.inserted,
            r.pages,
            r.elapsed.as_secs_f64() / 60.0,
            r.reason
        );
        for (filter, outcome) in r.toggles.iter().filter(|(_, o)| !o.is_active()) {
            println!("{:<16} filter '{}' not applied ({:?})", "", filter, outcome);
        }
    }
    for (name, err) in &summary.failed {
        println!("{:<16} FAILED: {}", name, err);
    }
    let degraded = summary.degraded();
    println!(
        "Discovered {} new links ({} partitions ok, {} unreachable, {} failed).",
        summary.inserted(),
        summary.reports.len() - degraded,
        degraded,
        summary.failed.len()
    );

    db::save_run(
        conn,
        &db::RunRow {
            run_id: new_run_id(started_at),
            stage: "discover",
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            inserted: summary.inserted(),
            processed: 0,
            skipped: 0,
            failed: summary.failed.len() + degraded,
        },
    )?;
    Ok(())
}

async fn run_enrichment(
    conn: &rusqlite::Connection,
    settings: &Settings,
    limit: Option<usize>,
) -> Result<()> {
    let pending = db::fetch_pending(conn, limit, settings.max_attempts)?;
    if pending.is_empty() {
        println!("No pending records found in any partition.");
        return Ok(());
    }

    let partitions = db::list_partitions(conn)?;
    info!("Pending snapshot taken across {} partitions", partitions.len());

    let ruleset = Arc::new(load_ruleset(settings)?);
    let fetcher = Arc::new(HttpFetcher::new(settings.fetch_timeout())?);
    let started_at = Utc::now();

    println!(
        "Processing {} records with {} workers...",
        pending.len(),
        settings.workers
    );
    let tally =
        enrich::enrich_pending(conn, fetcher, ruleset, pending, settings.workers).await?;
    println!(
        "Done: {} processed, {} skipped (still pending), {} failed to save.",
        tally.processed, tally.skipped, tally.failed
    );

    db::save_run(
        conn,
        &db::RunRow {
            run_id: new_run_id(started_at),
            stage: "enrich",
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            inserted: 0,
            processed: tally.processed,
            skipped: tally.skipped,
            failed: tally.failed,
        },
    )?;
    info!("Run recorded");
    Ok(())
}

fn new_run_id(started_at: chrono::DateTime<Utc>) -> String {
    format!("run-{}", started_at.format("%Y%m%dT%H%M%S"))
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
