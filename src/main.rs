mod config;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::loader::{discover_csv_files, load_csv};
use crate::pipeline::Pipeline;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "books-etl", about = "Book list scraping ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the configured list and upsert records (single unit of work)
    Run,

    /// Bulk-load book dump CSV files from a directory
    LoadCsv {
        /// Path to directory containing CSV files (default: data/)
        #[arg(short, long, default_value = "data")]
        dir: PathBuf,
    },

    /// Show database statistics
    Stats,

    /// List stored titles ordered by list score
    Titles,

    /// Dump stored records to stdout
    Export {
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,

        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },

    /// Apply schema migrations without loading data
    Migrate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "books_etl=info,warn",
        1 => "books_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let _t = utils::Timer::start("List scrape");
            let stats = Pipeline::new(config).run().await?;
            if stats.used_fallback {
                warn!("Live extraction produced nothing; loaded batch is synthetic fallback data");
            }
            info!(
                "Done: {} records ({} inserted, {} updated) from {} pages, {} rejected",
                stats.records_loaded,
                stats.inserted,
                stats.updated,
                stats.pages_fetched,
                stats.records_rejected
            );
        }

        Command::LoadCsv { dir } => {
            let _t = utils::Timer::start("CSV bulk load");
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;

            let files = discover_csv_files(&dir)?;
            info!("Found {} CSV files in {:?}", files.len(), dir);

            let mut total_records = 0usize;
            let mut errors = 0usize;

            for path in &files {
                match load_csv(path) {
                    Ok(books) => {
                        repo.upsert_books(&books)?;
                        total_records += books.len();
                    }
                    Err(e) => {
                        warn!("Error loading {:?}: {:#}", path, e);
                        errors += 1;
                    }
                }
            }

            info!("Done: {} records loaded, {} file errors", total_records, errors);
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let books = repo.book_count()?;
            let avg = repo.avg_rating()?;
            let last = repo.last_run()?;
            println!("─────────────────────────────────");
            println!("  books-etl — Database Stats");
            println!("─────────────────────────────────");
            println!("  Books      : {}", utils::fmt_number(books));
            println!(
                "  Avg rating : {}",
                avg.map(|a| format!("{:.2}", a)).unwrap_or("—".into())
            );
            match last {
                Some(run) => {
                    println!("  Last run   : {} ({})", run.started_at, run.status);
                    println!(
                        "  Fallback   : {}",
                        if run.used_fallback { "yes" } else { "no" }
                    );
                }
                None => println!("  Last run   : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Titles => {
            let repo = Repository::open(&config.storage.db_path)?;
            let titles = repo.list_titles()?;
            if titles.is_empty() {
                println!("No books stored — run `books-etl run` first.");
            } else {
                println!("{} titles:", titles.len());
                for t in &titles {
                    println!("  {}", t);
                }
            }
        }

        Command::Export { format, limit } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let books = repo.top_books(limit)?;
            match format {
                ExportFormat::Json => {
                    for b in &books {
                        println!("{}", serde_json::to_string(b)?);
                    }
                }
                ExportFormat::Csv => {
                    let mut w = csv::Writer::from_writer(std::io::stdout());
                    for b in &books {
                        w.serialize(b)?;
                    }
                    w.flush()?;
                }
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
