use clap::{Parser, ValueEnum};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use pacer::config::PacerConfig;
use pacer::driver::run_burst;
use pacer::ratelimit::{StoreKind, TimestampPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Fire a burst of concurrent calls through a multi-constraint rate limiter.
#[derive(Debug, Parser)]
#[command(name = "pacer", version, about)]
struct Cli {
    /// Configuration file (YAML, JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of calls to fire
    #[arg(long)]
    calls: Option<usize>,

    /// Timestamp store backend (queue or expiring)
    #[arg(long)]
    store: Option<StoreKind>,

    /// Record the pre-wait instant instead of re-reading the clock
    #[arg(long)]
    pre_wait: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Starting Pacer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = PacerConfig::load(cli.config.as_deref())?;
    if let Some(calls) = cli.calls {
        config.driver.calls = calls;
    }
    if let Some(store) = cli.store {
        config.limiter.store = store;
    }
    if cli.pre_wait {
        config.limiter.timestamp_policy = TimestampPolicy::PreWait;
    }
    info!(
        constraints = config.limiter.constraints.len(),
        store = ?config.limiter.store,
        policy = ?config.limiter.timestamp_policy,
        "Configuration loaded"
    );

    let limiter = Arc::new(config.limiter.build_limiter(|call: usize| async move {
        debug!(call, "Action executed");
        Ok::<_, Infallible>(call)
    })?);
    info!("Rate limiter initialized");

    // Dispose on Ctrl+C so every waiting call fails fast.
    let shutdown = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            limiter.dispose().await
        })
    };

    let report = run_burst(limiter.clone(), &config.driver).await;
    shutdown.abort();
    limiter.dispose().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!("Pacer stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, disposing limiter");
        }
        _ = terminate => {
            info!("Received SIGTERM, disposing limiter");
        }
    }
}
