use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ed_notifier::config::{BackendConfig, Config};
use ed_notifier::notifier::{self, Notifier};
use ed_notifier::web;

#[derive(Parser)]
#[command(name = "ed-notifier")]
#[command(about = "Sends notifications for new Ed posts to Slack channel(s)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a notifier pass
    Poll {
        /// Path to config json containing Ed + Slack config
        config: PathBuf,
        /// Path to token json containing x-tokens for accessing Ed
        tokens: PathBuf,
        /// Path to cache json for Ed posts
        cache: PathBuf,
        /// Keep polling every POLL_INTERVAL_SECS instead of exiting after one pass
        #[arg(long)]
        watch: bool,
    },
    /// Accept Ed x-tokens and complete the Slack OAuth flow over HTTP
    Serve {
        /// Port on which to run the backend
        port: u16,
        /// Path to json file in which to store Ed x-tokens
        tokens: PathBuf,
        /// Path to json file containing the Slack client id and secret
        #[arg(long)]
        slack_auth: Option<PathBuf>,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_tracing()?;

    match cli.command {
        Command::Poll {
            config,
            tokens,
            cache,
            watch,
        } => poll(&config, &tokens, &cache, watch).await,
        Command::Serve {
            port,
            tokens,
            slack_auth,
            host,
        } => serve(&host, port, &tokens, slack_auth.as_deref()).await,
    }
}

async fn poll(
    config_path: &std::path::Path,
    tokens: &std::path::Path,
    cache: &std::path::Path,
    watch: bool,
) -> Result<()> {
    let config =
        Config::load(config_path, tokens, cache).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(course_id = %config.course_id, destinations = config.destinations().len(), "Configuration loaded");

    let interval = config.poll_interval;
    let notifier = Notifier::from_config(config).context("Failed to initialize clients")?;

    if watch {
        tokio::select! {
            () = notifier::poll_loop(&notifier, interval) => {},
            () = shutdown_signal() => info!("Shutting down..."),
        }
        return Ok(());
    }

    notifier.run_pass().await.context("Pass aborted")?;
    Ok(())
}

async fn serve(
    host: &str,
    port: u16,
    tokens: &std::path::Path,
    slack_auth: Option<&std::path::Path>,
) -> Result<()> {
    let config = BackendConfig::load(host, port, tokens, slack_auth)
        .context("Failed to load backend configuration")?;

    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(config).await {
            error!("Token backend error: {e:#}");
        }
    });

    shutdown_signal().await;

    info!("Shutting down...");
    web_handle.abort();

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ed_notifier=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
