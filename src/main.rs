use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use dupescan_lib::config::MatcherConfig;
use dupescan_lib::db::{connect, ensure_schema, load_env};
use dupescan_lib::error::ScanError;
use dupescan_lib::scan::progress::{dupescan_channel, format_eta};
use dupescan_lib::scan::{spawn_scan, ScanMode};
use dupescan_lib::store;
use dupescan_lib::utils::get_memory_usage;

#[derive(Parser)]
#[command(name = "dupescan", about = "Duplicate person detection scanner")]
struct Cli {
    /// Matcher configuration as a JSON file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a duplicate scan as a background job.
    Scan {
        /// Rescore only pairs touching records changed since the last run.
        #[arg(long)]
        updated: bool,
    },
    /// Print the current review list, best match first.
    Report {
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
    /// Create the dupe_persons table if it does not exist.
    InitSchema,
    /// Exclude a pair from future review.
    Exclude {
        person_a: i64,
        person_b: i64,
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read matcher config {}", path.display()))?;
            serde_json::from_str(&text).context("Failed to parse matcher config")?
        }
        None => MatcherConfig::default(),
    };

    let pool = connect().await.context("Failed to connect to database")?;

    match cli.command {
        Command::Scan { updated } => {
            let mode = if updated {
                ScanMode::Incremental
            } else {
                ScanMode::Full
            };
            let display = spawn_progress_display();
            let handle = spawn_scan(pool, config, mode);
            match handle.await.context("Dupe scan task panicked")? {
                Ok(stats) => {
                    display.finish_and_clear();
                    info!("Memory after scan: {} MB", get_memory_usage().await);
                    println!("{}", stats);
                }
                Err(err) => {
                    display.finish_and_clear();
                    if let Some(ScanError::LockBusy(_)) = err.downcast_ref::<ScanError>() {
                        eprintln!("{}", err);
                        std::process::exit(1);
                    }
                    return Err(err);
                }
            }
        }
        Command::Report { top } => {
            let pairs = store::load_review_list(&pool).await?;
            println!("top {}:", top.min(pairs.len()));
            for pair in pairs.iter().take(top) {
                println!(
                    "{:8} vs {:<8}: {:>5} ({}:{})",
                    pair.low_id,
                    pair.high_id,
                    pair.confidence_pc(),
                    pair.status.as_str(),
                    pair.exclude_reason.as_deref().unwrap_or(""),
                );
            }
        }
        Command::InitSchema => {
            ensure_schema(&pool).await?;
        }
        Command::Exclude {
            person_a,
            person_b,
            reason,
        } => {
            store::exclude(&pool, person_a, person_b, &reason).await?;
        }
    }
    Ok(())
}

/// Renders scan progress from the process-wide channel while a scan runs.
fn spawn_progress_display() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    let pb_clone = pb.clone();
    let mut rx = dupescan_channel().subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = *rx.borrow();
            if let Some(phase) = snapshot.phase {
                pb_clone.set_position(snapshot.percent as u64);
                pb_clone.set_message(format!(
                    "{} phase, about {} left",
                    phase.as_str(),
                    format_eta(snapshot.eta_seconds)
                ));
            }
        }
    });
    pb
}
