use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use huddle_server::config::ServerConfig;
use huddle_server::engine::chat_engine::ChatEngine;
use huddle_server::log_sink::{LogSink, spawn_file_writer};
use huddle_server::web::app_state::AppState;
use huddle_server::web::router::build_router;

/// How long to wait for queued chat log lines on shutdown.
const LOG_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "huddle-server", about = "Broadcast chat server with history replay")]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "huddle.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error starting the server: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = ServerConfig::load(&args.config)?;

    // Durable chat log (optional)
    let (sink, log_writer) = if config.log.path.as_os_str().is_empty() {
        info!("chat log disabled");
        (LogSink::disabled(), None)
    } else {
        let (sink, handle) = spawn_file_writer(config.log.path.clone());
        (sink, Some(handle))
    };

    let engine = Arc::new(ChatEngine::with_options(sink, config.engine_options()));
    info!(session_id = %engine.session_id(), "chat session started");

    let cancel = CancellationToken::new();
    let app_state = Arc::new(AppState {
        engine,
        static_dir: config.server.static_dir.clone(),
        shutdown: cancel.clone(),
    });
    let app = build_router(app_state);

    let web_addr = &config.server.web_address;
    let listener = tokio::net::TcpListener::bind(web_addr)
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;

    info!("Huddle server listening on http://{}", web_addr);

    tokio::spawn(shutdown_on_ctrl_c(cancel.clone()));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
    .context("server error")?;

    // Open sockets saw the same token and disconnect on their own; the writer
    // finishes once the last of them drops its engine reference.
    if let Some(handle) = log_writer
        && tokio::time::timeout(LOG_FLUSH_TIMEOUT, handle).await.is_err()
    {
        warn!("timed out flushing chat log");
    }

    info!("Huddle server stopped");
    Ok(())
}

async fn shutdown_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
    }
    cancel.cancel();
}
