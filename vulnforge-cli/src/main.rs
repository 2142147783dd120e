//! VulnForge×Robin CLI
//!
//! Dark web leak ingestion, enrichment, and triage pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vulnforge_api::{run_server, AppState};
use vulnforge_core::{Envelope, Metrics, DEFAULT_SOURCE};
use vulnforge_enrich::{EnrichmentWorker, LookupConfig, LookupSet};
use vulnforge_ingest::{DirectoryWatcher, IngestCoordinator};
use vulnforge_store::{EnrichQueue, LeakStore};

#[derive(Parser)]
#[command(name = "vulnforge-robin")]
#[command(author, version, about = "VulnForge×Robin: dark web leak ingestion and triage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the review API, the enrichment worker pool, and (optionally) the
    /// directory watcher
    Serve {
        /// Bind address for the review API
        #[arg(long, default_value = "127.0.0.1:8787", env = "VULNFORGE_BIND")]
        bind: String,

        /// SQLite database path (records and enrichment queue)
        #[arg(long, default_value = "vulnforge.sqlite", env = "VULNFORGE_DB")]
        db: PathBuf,

        /// Base64-encoded AES key, 16/24/32 raw bytes
        #[arg(long, env = "VULNFORGE_ENCRYPTION_KEY")]
        encryption_key: String,

        /// Reviewer password gating snippet decryption
        #[arg(long, env = "VULNFORGE_REVIEWER_PASSWORD")]
        reviewer_password: String,

        /// Number of enrichment workers
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Drop-folder directory to watch for payload files
        #[arg(long, env = "VULNFORGE_WATCH_DIR")]
        watch_dir: Option<PathBuf>,

        /// Watcher poll interval in seconds
        #[arg(long, default_value = "5", env = "VULNFORGE_POLL_INTERVAL")]
        poll_interval: u64,

        /// Source label for watcher-ingested files
        #[arg(long, default_value = "watcher")]
        watch_source: String,

        /// HaveIBeenPwned API key (enables the breach lookup)
        #[arg(long, env = "HIBP_API_KEY")]
        hibp_key: Option<String>,

        /// Shodan API key (enables the host lookup)
        #[arg(long, env = "SHODAN_API_KEY")]
        shodan_key: Option<String>,

        /// urlscan.io API key (enables the sighting lookup)
        #[arg(long, env = "URLSCAN_API_KEY")]
        urlscan_key: Option<String>,

        /// Enable the crt.sh certificate transparency lookup
        #[arg(long)]
        crtsh: bool,
    },

    /// Ingest one payload file (or stdin) and exit
    Ingest {
        /// Payload file; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Source label for the payload
        #[arg(short, long, default_value = DEFAULT_SOURCE)]
        source: String,

        #[arg(long, default_value = "vulnforge.sqlite", env = "VULNFORGE_DB")]
        db: PathBuf,

        #[arg(long, env = "VULNFORGE_ENCRYPTION_KEY")]
        encryption_key: String,
    },

    /// Check storage and queue reachability
    Status {
        #[arg(long, default_value = "vulnforge.sqlite", env = "VULNFORGE_DB")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            db,
            encryption_key,
            reviewer_password,
            workers,
            watch_dir,
            poll_interval,
            watch_source,
            hibp_key,
            shodan_key,
            urlscan_key,
            crtsh,
        } => {
            serve(ServeConfig {
                bind,
                db,
                encryption_key,
                reviewer_password,
                workers,
                watch_dir,
                poll_interval,
                watch_source,
                hibp_key,
                shodan_key,
                urlscan_key,
                crtsh,
            })
            .await
        }
        Commands::Ingest {
            file,
            source,
            db,
            encryption_key,
        } => ingest_once(file, &source, &db, &encryption_key).await,
        Commands::Status { db } => status(&db).await,
    }
}

struct ServeConfig {
    bind: String,
    db: PathBuf,
    encryption_key: String,
    reviewer_password: String,
    workers: usize,
    watch_dir: Option<PathBuf>,
    poll_interval: u64,
    watch_source: String,
    hibp_key: Option<String>,
    shodan_key: Option<String>,
    urlscan_key: Option<String>,
    crtsh: bool,
}

async fn serve(config: ServeConfig) -> Result<()> {
    // Fail fast on bad key material before touching anything else
    let envelope = Arc::new(
        Envelope::from_base64(&config.encryption_key)
            .context("VULNFORGE_ENCRYPTION_KEY is unusable")?,
    );

    let store = LeakStore::connect(&config.db)
        .await
        .with_context(|| format!("opening database at {}", config.db.display()))?;
    let queue = EnrichQueue::new(store.pool().clone());
    let metrics = Arc::new(Metrics::new());
    metrics.set_backlog(queue.depth().await?);

    let coordinator = Arc::new(IngestCoordinator::new(
        store.clone(),
        queue.clone(),
        envelope.clone(),
        metrics.clone(),
    ));

    let lookups = LookupSet::new(LookupConfig {
        hibp_api_key: config.hibp_key,
        shodan_api_key: config.shodan_key,
        urlscan_api_key: config.urlscan_key,
        enable_crtsh: config.crtsh,
        ..LookupConfig::default()
    })
    .context("building lookup clients")?;

    let worker = EnrichmentWorker::new(
        store.clone(),
        queue.clone(),
        Arc::new(lookups),
        metrics.clone(),
    );
    let handles = worker.spawn_pool(config.workers);
    info!("started {} enrichment workers", handles.len());

    if let Some(dir) = config.watch_dir {
        let watcher = DirectoryWatcher::new(
            dir,
            Duration::from_secs(config.poll_interval.max(1)),
            config.watch_source,
            coordinator.clone(),
        );
        tokio::spawn(async move { watcher.run().await });
    }

    let state = AppState {
        store,
        queue,
        coordinator,
        envelope,
        metrics,
        reviewer_password: config.reviewer_password,
    };

    run_server(state, &config.bind)
        .await
        .context("review API server failed")?;
    Ok(())
}

async fn ingest_once(
    file: Option<PathBuf>,
    source: &str,
    db: &PathBuf,
    encryption_key: &str,
) -> Result<()> {
    let envelope = Arc::new(
        Envelope::from_base64(encryption_key).context("VULNFORGE_ENCRYPTION_KEY is unusable")?,
    );

    let (label, text) = match file {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            (path.display().to_string(), text)
        }
        None => {
            let text = std::io::read_to_string(std::io::stdin()).context("reading stdin")?;
            ("stdin".to_string(), text)
        }
    };

    let payload = match serde_json::from_str::<Value>(&text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(text),
    };

    let store = LeakStore::connect(db)
        .await
        .with_context(|| format!("opening database at {}", db.display()))?;
    let queue = EnrichQueue::new(store.pool().clone());
    let metrics = Arc::new(Metrics::new());
    let coordinator = IngestCoordinator::new(store, queue, envelope, metrics);

    let ids = coordinator.ingest(&payload, source).await?;

    println!("✅ Ingested {} record(s) from {}", ids.len(), label);
    for id in &ids {
        println!("   {}", id);
    }
    println!("   Records are queued; enrichment runs under `serve`.");
    Ok(())
}

async fn status(db: &PathBuf) -> Result<()> {
    match LeakStore::connect(db).await {
        Ok(store) => {
            store.ping().await?;
            println!("✅ storage reachable: {}", db.display());

            let queue = EnrichQueue::new(store.pool().clone());
            match queue.depth().await {
                Ok(depth) => println!("📬 enrichment backlog: {}", depth),
                Err(e) => println!("❌ queue unreachable: {}", e),
            }
        }
        Err(e) => {
            println!("❌ storage unreachable: {}", e);
            println!("   Expected database at: {}", db.display());
        }
    }

    Ok(())
}
