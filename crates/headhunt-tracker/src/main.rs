//! `headhunt-tracker` binary: refresh timer plus read API, or a one-off scrape.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use headhunt_tracker::api::{self, AppState};
use headhunt_tracker::config::{default_db_path, StoreConfig};
use headhunt_tracker::{
    store, ChromiumRenderer, Config, HarvestSettings, Harvester, MarkerExtractor, Scheduler,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "headhunt-tracker",
    version,
    about = "Harvest headhunt statistics and serve the latest snapshot"
)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chromium executable to launch.
    #[arg(long, global = true)]
    chromium: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long, global = true)]
    headed: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the refresh timer and serve the read API (default).
    Serve(ServeArgs),
    /// Run one extraction and print the snapshot as JSON.
    Scrape,
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Persist snapshots to this SQLite file.
    #[arg(long, conflicts_with_all = ["durable", "memory"])]
    db: Option<PathBuf>,

    /// Persist snapshots to ~/.headhunt/stats.db.
    #[arg(long, conflicts_with = "memory")]
    durable: bool,

    /// Keep snapshots in memory only.
    #[arg(long)]
    memory: bool,

    /// Seconds between scheduled refreshes.
    #[arg(long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = cli.chromium {
        config.browser.executable = Some(path);
    }
    if cli.headed {
        config.browser.headless = false;
    }

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(config, args).await,
        Command::Scrape => scrape_once(config).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("headhunt_tracker=info,tower_http=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_harvester(config: &Config) -> Result<Harvester> {
    config.validate().context("invalid configuration")?;
    let extractor = MarkerExtractor::from_config(config)?;
    Ok(Harvester::new(
        Arc::new(ChromiumRenderer::new(config.browser.clone())),
        Arc::new(extractor),
        HarvestSettings::from_config(config),
    ))
}

async fn scrape_once(config: Config) -> Result<()> {
    let harvester = build_harvester(&config)?;
    let snapshot = harvester.harvest().await.context("scrape failed")?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(secs) = args.interval {
        config.refresh_interval_secs = secs;
    }
    if let Some(path) = args.db {
        config.store = StoreConfig::Sqlite { path };
    } else if args.durable {
        config.store = StoreConfig::Sqlite {
            path: default_db_path(),
        };
    } else if args.memory {
        config.store = StoreConfig::Memory;
    }

    let harvester = build_harvester(&config)?;
    let store = store::open(&config.store).context("failed to open snapshot store")?;
    let scheduler = Scheduler::new(harvester, Arc::clone(&store));

    info!(
        "starting headhunt-tracker v{} ({} banners, store: {:?})",
        env!("CARGO_PKG_VERSION"),
        config.banners.len(),
        config.store
    );
    let timer = scheduler.start(config.refresh_interval());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("listening on http://{}", config.bind);

    let app = api::router(AppState { store, scheduler });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    timer.stop().await;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received shutdown signal");
}
