use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use dumpreplay::server::{ServerState, build_router};
use dumpreplay::{
    ChainPayload, ChainScheduler, DataApiDriver, DatabaseDriver, Dispatcher, FsSegmentStore,
    HttpDispatcher, KickoffPayload, MemoryDriver, RecordingDispatcher, ReplayConfig, Replayer,
    SegmentStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dumpreplay")]
#[command(about = "Replays transactional SQL dumps one transaction at a time")]
struct Cli {
    /// Replay against an in-process database instead of the Data API.
    #[arg(long, global = true)]
    dry_run: bool,
    /// Chunk record directory, overriding SEGMENT_STORE_DIR.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split the scripts of a dump directory into chunk records.
    Split {
        dir: PathBuf,
        /// Discard the chunk records of an earlier run first.
        #[arg(long)]
        reset: bool,
    },
    /// Run one step of the chain.
    Invoke {
        #[arg(long, default_value_t = 1)]
        transaction: u64,
        #[arg(long)]
        total: u64,
    },
    /// Start a chain of `total` segments through DISPATCH_URL.
    Kickoff {
        #[arg(long)]
        total: u64,
    },
    /// Discard any earlier run, split the dump, drop the tables and replay
    /// every segment here.
    Restore { dir: PathBuf },
    /// Drop the tables and replay the dump script by script in bulk mode.
    Bulk { dir: PathBuf },
    /// Drop every configured table in one transaction.
    DropTables,
    /// List the chunk records still waiting to be replayed.
    Status,
    /// Delete the chunk records left by a stalled or failed chain.
    Purge,
    /// Serve the invocation endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = ReplayConfig::from_env().context("failed to load configuration")?;
    if let Some(dir) = cli.store {
        config = config.store_dir(dir);
    }

    let driver = build_driver(&config, cli.dry_run)?;
    let store: Arc<dyn SegmentStore> = Arc::new(
        FsSegmentStore::open(&config.store_dir)
            .with_context(|| format!("failed to open {}", config.store_dir.display()))?,
    );
    let replayer = Replayer::new(driver, store.clone())
        .options(config.runner_options())
        .drop_tables(config.drop_tables.clone());

    match cli.command {
        Command::Split { dir, reset } => {
            if reset {
                let purged = replayer.purge().await?;
                println!("{} chunk records discarded", purged);
            }
            let outcome = replayer
                .split(&dir)
                .await
                .with_context(|| format!("failed to split {}", dir.display()))?;
            println!(
                "{} segments from {} scripts ({} lines outside transactions)",
                outcome.total, outcome.scripts, outcome.skipped_lines
            );
            println!("{}", serde_json::to_string(&KickoffPayload { total: outcome.total })?);
        }
        Command::Invoke { transaction, total } => {
            let recorder = RecordingDispatcher::new();
            let dispatcher: Arc<dyn Dispatcher> = match http_dispatcher(&config)? {
                Some(http) => http,
                None => Arc::new(recorder.clone()),
            };
            let scheduler = ChainScheduler::new(store, replayer.runner(), dispatcher);
            let outcome = scheduler
                .invoke(ChainPayload { transaction, total })
                .await
                .context("chain step failed")?;
            println!("{}", outcome.state);
            for next in recorder.sent() {
                println!("next: {}", serde_json::to_string(&next)?);
            }
        }
        Command::Kickoff { total } => {
            let dispatcher = http_dispatcher(&config)?
                .ok_or_else(|| anyhow!("DISPATCH_URL is required to start a chain"))?;
            let scheduler = ChainScheduler::new(store, replayer.runner(), dispatcher);
            match scheduler.kickoff(KickoffPayload { total }).await? {
                Some(first) => println!("started: {}", serde_json::to_string(&first)?),
                None => println!("nothing to replay"),
            }
        }
        Command::Restore { dir } => {
            let summary = replayer
                .restore(&dir)
                .await
                .with_context(|| format!("restore of {} failed", dir.display()))?;
            println!(
                "{} segments replayed, {} statements",
                summary.chain.segments, summary.chain.statements
            );
        }
        Command::Bulk { dir } => {
            let summary = replayer
                .restore_bulk(&dir)
                .await
                .with_context(|| format!("bulk restore of {} failed", dir.display()))?;
            println!(
                "{} scripts, {} transactions, {} statements ({} rejected)",
                summary.scripts,
                summary.transactions,
                summary.statements,
                summary.rejected_statements
            );
            if summary.rejected_statements > 0 {
                warn!(rejected = summary.rejected_statements, "some statements were not applied");
            }
        }
        Command::DropTables => {
            let status = replayer.drop_all_tables().await?;
            println!("{}", status);
        }
        Command::Status => {
            let status = replayer.status().await?;
            match status.resume_from() {
                Some(first) => println!(
                    "{} chunk records left, chain stopped at {}",
                    status.remaining.len(),
                    first
                ),
                None => println!("no chunk records left"),
            }
        }
        Command::Purge => {
            let purged = replayer.purge().await?;
            println!("{} chunk records discarded", purged);
        }
        Command::Serve => serve(&config, store, replayer).await?,
    }

    Ok(())
}

fn build_driver(config: &ReplayConfig, dry_run: bool) -> Result<Arc<dyn DatabaseDriver>> {
    if dry_run {
        info!("dry run: replaying against the in-process database");
        return Ok(Arc::new(MemoryDriver::new()));
    }
    let settings = config
        .data_api_settings()
        .context("Data API settings are incomplete (use --dry-run to replay in process)")?;
    Ok(Arc::new(DataApiDriver::new(settings)?))
}

fn http_dispatcher(config: &ReplayConfig) -> Result<Option<Arc<dyn Dispatcher>>> {
    match &config.dispatch_url {
        Some(url) => {
            let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(url)?);
            Ok(Some(dispatcher))
        }
        None => Ok(None),
    }
}

async fn serve(
    config: &ReplayConfig,
    store: Arc<dyn SegmentStore>,
    replayer: Replayer,
) -> Result<()> {
    // Without an explicit target the chain continues through this server.
    let dispatch_url = config.dispatch_url.clone().unwrap_or_else(|| {
        let host = if config.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            config.host.as_str()
        };
        format!("http://{}:{}", host, config.port)
    });
    let dispatcher = Arc::new(HttpDispatcher::new(&dispatch_url)?);
    let scheduler = ChainScheduler::new(store, replayer.runner(), dispatcher);
    let app = build_router(ServerState::new(scheduler));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(address = %addr, dispatch = %dispatch_url, "invocation server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dumpreplay=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
