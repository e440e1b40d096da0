use clap::{Parser, Subcommand};
use crawl_coordinator::bus::InProcessBus;
use crawl_coordinator::config::ConfigLoader;
use crawl_coordinator::crawler::{CrawlerEngine, EngineSettings};
use crawl_coordinator::downloader::HttpDownloader;
use crawl_coordinator::frontier::Frontier;
use crawl_coordinator::metrics::snapshot::MetricsSnapshot;
use crawl_coordinator::registry::RequestRegistry;
use crawl_coordinator::statistics::{
    CrawlStatistics, CsvExporter, SqliteStatisticsStore, StatisticsClient, StatisticsService,
    StatisticsStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "crawl-coordinator")]
#[command(version = "0.1.0")]
#[command(about = "Distributed crawl coordination: request tracking, scheduling and statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a crawl from a config file
    Run {
        /// Path to the configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Show progress bars (stderr)
        #[arg(short, long, default_value_t = true)]
        progress: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show crawl statistics stored in a SQLite database
    Stats {
        /// Path to the statistics database
        #[arg(short, long)]
        db: PathBuf,

        /// Only show this crawl
        #[arg(short, long)]
        owner: Option<String>,

        /// Write the statistics to a CSV file instead of stdout
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let multi = Arc::new(indicatif::MultiProgress::new());

    match cli.command {
        Commands::Run { config, progress } => {
            if progress {
                indicatif_log_bridge::LogWrapper::new((*multi).clone(), logger).try_init()?;
            } else {
                log::set_boxed_logger(Box::new(logger))?;
                log::set_max_level(log::LevelFilter::Info);
            }

            log::info!("Loading config from {:?}", config);
            let config_data = ConfigLoader::load(&config)?;
            log::info!("Loaded crawl: {}", config_data.name);

            let bus = Arc::new(InProcessBus::new(config_data.bus.max_redeliveries));
            let store = ConfigLoader::create_store(&config_data).await?;
            let service = StatisticsService::start(bus.as_ref(), store.clone()).await?;
            let statistics = StatisticsClient::new(bus.clone());

            let registry = Arc::new(RequestRegistry::new(config_data.registry.options()));
            let frontier = Arc::new(Frontier::new(
                config_data.frontier.options(),
                registry,
                statistics.clone(),
            ));
            let downloader = Arc::new(HttpDownloader::new(
                &config_data.user_agent,
                Duration::from_millis(config_data.request_timeout_ms),
            )?);

            let settings = EngineSettings::from_config(&config_data);
            let seeds = ConfigLoader::seed_requests(&config_data, &settings.owner)?;
            log::info!("Crawl owner: {} | agent: {}", settings.owner, settings.agent_id);
            let owner = settings.owner.clone();
            let engine = CrawlerEngine::new(settings, frontier, downloader, statistics, None);

            let mut progress_bar: Option<ProgressBar> = None;
            let mut _progress_task = None;
            if progress {
                let pb = multi.add(ProgressBar::new(0));
                pb.set_style(ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
                    .progress_chars("#>-"));

                let mut metrics_rx = engine.watch_metrics();
                let pb_clone = pb.clone();
                progress_bar = Some(pb);
                _progress_task = Some(tokio::spawn(async move {
                    while metrics_rx.changed().await.is_ok() {
                        let snapshot: MetricsSnapshot = metrics_rx.borrow().clone();
                        pb_clone.set_length(snapshot.requests_queued);
                        pb_clone.set_position(snapshot.requests_finished);
                        pb_clone.set_message(format!(
                            "Retries: {} | Success: {:.1}% | RPS: {:.2}",
                            snapshot.requests_retried,
                            snapshot.success_rate,
                            snapshot.requests_per_second
                        ));
                    }
                }));
            }

            log::info!("Starting crawl...");
            let final_metrics = engine.run(seeds).await?;

            if progress {
                if let Some(task) = _progress_task {
                    task.abort();
                }
                if let Some(pb) = progress_bar {
                    pb.set_style(ProgressStyle::default_bar()
                        .template("✅ [{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} {msg}")?
                        .progress_chars("#>-"));
                    pb.finish_with_message(format!(
                        "Retries: {} | Success: {:.1}% | RPS: {:.2} - Completed",
                        final_metrics.requests_retried,
                        final_metrics.success_rate,
                        final_metrics.requests_per_second
                    ));
                }
            }

            service.stop().await;
            let stats = store.crawl(&owner).await?;

            println!("\n✅ Crawl Completed:");
            println!("   Requests Finished: {}", final_metrics.requests_finished);
            println!("   Retries: {}", final_metrics.requests_retried);
            println!("   Abandoned: {}", final_metrics.requests_abandoned);
            println!("   Success Rate: {:.1}%", final_metrics.success_rate);
            println!("   Average Duration: {}ms", final_metrics.avg_response_time_ms);
            println!("   Total Time: {:.1}s", final_metrics.elapsed_seconds);
            if let Some(stats) = stats {
                print_statistics(&stats);
            }
        }
        Commands::Check { config } => {
            match ConfigLoader::load(&config) {
                Ok(cfg) => {
                    println!("✅ Config is valid:");
                    println!("   Name: {}", cfg.name);
                    println!("   Start URLs: {:?}", cfg.start_urls);
                    println!("   Concurrency: {}", cfg.concurrency);
                    println!("   Request timeout: {}ms", cfg.request_timeout_ms);
                    println!("   Statistics: {:?}", cfg.statistics);
                }
                Err(e) => {
                    eprintln!("❌ Config error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Stats { db, owner, csv } => {
            log::set_boxed_logger(Box::new(logger))?;
            log::set_max_level(log::LevelFilter::Warn);

            let store = SqliteStatisticsStore::connect(&db).await?;
            let crawls = match owner {
                Some(owner) => store.crawl(&owner).await?.into_iter().collect(),
                None => store.crawls(0, usize::MAX).await?,
            };
            store.close().await;

            match csv {
                Some(path) => {
                    let mut exporter = CsvExporter::create(&path)?;
                    for stats in &crawls {
                        exporter.write(stats)?;
                    }
                    exporter.finish()?;
                    println!("Wrote {} crawls to {:?}", crawls.len(), path);
                }
                None if crawls.is_empty() => println!("No crawls recorded."),
                None => crawls.iter().for_each(print_statistics),
            }
        }
    }

    Ok(())
}

fn print_statistics(stats: &CrawlStatistics) {
    println!("\n📊 {} ({:?})", stats.owner, stats.status());
    if let Some(name) = &stats.name {
        println!("   Name: {}", name);
    }
    println!("   Total: {}", stats.total);
    println!("   Success: {}", stats.success);
    println!("   Failure: {}", stats.failure);
    println!("   Left: {}", stats.left());
    if let Some(started_at) = stats.started_at {
        println!("   Started: {}", started_at.to_rfc3339());
    }
    if let Some(exited_at) = stats.exited_at {
        println!("   Exited: {}", exited_at.to_rfc3339());
    }
}
