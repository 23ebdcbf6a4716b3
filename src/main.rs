use anyhow::{bail, Context, Result};
use auto_translate::config::Config;
use auto_translate::processor::PageProcessor;
use auto_translate::provider::TranslationProvider;
use auto_translate::queue::QueueManager;
use auto_translate::retry::RetryScheduler;
use auto_translate::status::StatusReporter;
use auto_translate::watch::{SaveTracker, WatchOrchestrator};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "auto-translate",
    about = "Automatic translation pipeline for YAML page content",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate a single page by slug
    Page {
        slug: String,
        /// Re-translate everything even if unchanged
        #[arg(long)]
        force: bool,
    },
    /// Translate every page in the content directory
    All {
        /// Re-translate everything even if unchanged
        #[arg(long)]
        force: bool,
    },
    /// Watch the content directory and translate on change
    Watch,
    /// Run all due retries now
    Retries,
    /// Re-enqueue permanently failed pages as forced full translations
    FixFailed,
    /// Print queue, retry and failed state
    Status,
    /// Print remote translation quota usage
    Usage,
}

struct App {
    config: Config,
    provider: TranslationProvider,
    queue: Arc<QueueManager>,
    retry: Arc<RetryScheduler>,
    saves: Arc<SaveTracker>,
}

fn build(config: Config) -> App {
    let provider = TranslationProvider::new(
        &config.translate_api_url,
        &config.translate_api_key,
        Duration::from_millis(config.request_delay_ms),
    );
    let status = Arc::new(StatusReporter::new(
        config.status_file(),
        config.status_throttle_ms,
    ));
    let saves = Arc::new(SaveTracker::new(config.save_suppress_ms));
    let retry = Arc::new(RetryScheduler::new(
        config.retry_file(),
        config.failed_file(),
        config.max_retry_attempts,
        config.retry_delay_secs,
    ));
    let processor = Arc::new(PageProcessor::new(
        config.clone(),
        provider.clone(),
        status.clone(),
        saves.clone(),
    ));
    let queue = Arc::new(QueueManager::new(&config, processor, retry.clone(), status));
    App {
        config,
        provider,
        queue,
        retry,
        saves,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let app = build(Config::from_env()?);

    match cli.command {
        Command::Page { slug, force } => {
            let file = app.config.page_file(&slug);
            if !file.exists() {
                bail!("No page file at {}", file.display());
            }
            app.queue.enqueue(&file, force);
            app.queue.run().await;
        }
        Command::All { force } => {
            let mut files: Vec<_> = std::fs::read_dir(&app.config.content_dir)
                .with_context(|| {
                    format!("Cannot read {}", app.config.content_dir.display())
                })?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("yml"))
                .collect();
            files.sort();
            info!("Queueing {} page file(s)", files.len());
            for file in &files {
                app.queue.enqueue(file, force);
            }
            app.queue.run().await;
        }
        Command::Watch => {
            let watcher = WatchOrchestrator::new(
                app.config.clone(),
                app.queue.clone(),
                app.retry.clone(),
                app.saves.clone(),
            );
            watcher.run().await?;
        }
        Command::Retries => {
            let due = app.retry.due();
            if due.is_empty() {
                info!("No retries due");
            } else {
                info!("Running {} due retr{}", due.len(), if due.len() == 1 { "y" } else { "ies" });
                for record in due {
                    app.queue.enqueue(&record.file, false);
                }
                app.queue.run().await;
            }
        }
        Command::FixFailed => {
            let failed = app.retry.failed_records();
            if failed.is_empty() {
                info!("No permanently failed pages");
            } else {
                info!("Re-running {} failed page(s)", failed.len());
                for record in failed {
                    app.retry.clear_failed(&record.slug);
                    app.queue.enqueue(&record.file, true);
                }
                app.queue.run().await;
            }
        }
        Command::Status => print_status(&app),
        Command::Usage => match app.provider.usage().await {
            Some(usage) => {
                let pct = if usage.character_limit > 0 {
                    usage.character_count as f64 / usage.character_limit as f64 * 100.0
                } else {
                    0.0
                };
                println!(
                    "Quota: {} / {} characters ({:.1}%)",
                    usage.character_count, usage.character_limit, pct
                );
            }
            None => bail!("Could not fetch provider usage"),
        },
    }

    Ok(())
}

fn print_status(app: &App) {
    let items = app.queue.items();
    println!("Queue: {} item(s)", items.len());
    for item in &items {
        match &item.error {
            Some(error) => println!("  {:?} {} - {}", item.state, item.slug, error),
            None => println!("  {:?} {}", item.state, item.slug),
        }
    }

    let retries = app.retry.retry_records();
    println!("Retries: {} scheduled", retries.len());
    for record in &retries {
        println!(
            "  {} (attempt {}, next at {}): {}",
            record.slug, record.attempts, record.next_retry_at, record.last_error
        );
    }

    let failed = app.retry.failed_records();
    println!("Failed: {} page(s)", failed.len());
    for record in &failed {
        println!(
            "  {} ({} attempts, {} scenario): {}",
            record.slug, record.attempts, record.scenario, record.last_error
        );
    }
}
