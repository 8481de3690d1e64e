use anyhow::Context;
use clap::Parser;
use mcp_session_server::config::{Cli, LoggingConfig, ServerConfig};
use mcp_session_server::handlers;
use mcp_session_server::server::{
    router, AppState, DispatchTable, Reaper, SessionStore, ShutdownCoordinator, ShutdownReason,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("invalid log level '{}'", logging.level))?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("unable to set global tracing subscriber: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_cli(Cli::parse())?;
    init_tracing(&config.logging)?;

    let pid = std::process::id();
    info!(pid, name = %config.name, version = %config.version, "Server process starting");

    // SIGTERM is the standard "graceful shutdown" signal; SIGINT is Ctrl+C.
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let dispatch = handlers::register_all(
        DispatchTable::new(&config.name)
            .with_version(&config.version)
            .with_protocol_version(&config.protocol_version)
            .with_instructions(&config.description),
    );
    info!(tools = ?dispatch.tool_names(), "Dispatch table ready");

    let store = Arc::new(SessionStore::new(config.session.max_sessions));
    let reaper = Arc::new(Reaper::new(
        Arc::clone(&store),
        config.session.cleanup_interval,
        config.session.session_timeout,
    ));
    let coordinator =
        ShutdownCoordinator::new(Arc::clone(&store), Arc::clone(&reaper), config.shutdown_grace);

    let state = AppState::new(
        Arc::clone(&store),
        Arc::new(dispatch),
        &config.name,
        &config.version,
    );
    let app = router(state, config.logging.request_logging);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!(
        address = %listener.local_addr()?,
        max_sessions = config.session.max_sessions,
        "MCP server listening (POST/GET/DELETE /mcp, GET /health)"
    );

    reaper.start();

    let accept = coordinator.accept_token();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(accept.cancelled_owned())
            .await
    });

    let fatal = tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            None
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
            None
        }
        result = &mut server => Some(match result {
            Ok(Ok(())) => "server loop exited unexpectedly".to_string(),
            Ok(Err(e)) => format!("server loop failed: {}", e),
            Err(e) => format!("server task failed: {}", e),
        }),
    };

    let (reason, server) = match fatal {
        None => (ShutdownReason::Signal, Some(server)),
        Some(cause) => {
            error!(%cause, "Unrecoverable server error");
            (ShutdownReason::Fatal(cause), None)
        }
    };

    let outcome = coordinator.shutdown(reason, server).await;
    std::process::exit(outcome.exit_code());
}
