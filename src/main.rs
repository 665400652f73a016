use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use postguard::auth::TokenIssuer;
use postguard::config::{LogFormat, LoggingConfig, PostguardConfig};
use postguard::http::{AppState, HttpServer};

#[derive(Debug, Parser)]
#[command(name = "postguard", version, about = "Rate-limited messaging API")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Print a signed access token for a subject
    Token {
        /// Subject to embed in the token
        #[arg(short, long)]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PostguardConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Token { subject } => {
            let token = TokenIssuer::new(&config.auth).issue(&subject)?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(config: PostguardConfig) -> anyhow::Result<()> {
    init_tracing(&config.logging);

    info!("Starting Postguard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        limit = config.rate_limiting.limit,
        window_secs = config.rate_limiting.window_secs,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config).await?;
    let server = HttpServer::bind(config.server.http_addr, state).await?;

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Postguard stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
