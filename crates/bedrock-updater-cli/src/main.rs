mod cli;
mod logging;
mod server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bedrock_updater::installer::DEFAULT_STOP_TIMEOUT;
use bedrock_updater::process::STOP_COMMAND;
use bedrock_updater::{Orchestrator, ServerProcess, UpdateConfig, VersionSource};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command};
use server::ChildServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_level.as_deref(), cli.log_file.as_deref())?;

    match cli.command() {
        Command::Check => check().await,
        Command::Run => run(&cli).await,
    }
}

async fn check() -> Result<()> {
    let source = VersionSource::new();
    let release = source
        .latest_release(&CancellationToken::new())
        .await
        .context("failed to look up the latest server release")?;
    println!("{} ({}): {}", release.version, source.platform().name(), release.url);
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let config_path = cli.config_path();
    let config = UpdateConfig::load_or_create(&config_path)
        .with_context(|| format!("failed to load updater config {:?}", config_path))?;
    tracing::info!(
        config = ?config_path,
        mode = %config.installation_mode,
        interval = ?config.check_interval(),
        "Loaded updater configuration"
    );

    let server = Arc::new(ChildServer::new(cli.server_binary(), &cli.server_dir));
    let orchestrator = Arc::new(Orchestrator::new(&config, &cli.server_dir, server.clone()));
    let cancel = CancellationToken::new();

    // Subscribe before starting so the version line is not missed.
    let events = server.subscribe();
    let updater = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.run(events, cancel).await })
    };

    server
        .start()
        .await
        .with_context(|| format!("failed to start server {:?}", cli.server_binary()))?;
    forward_operator_input(server.clone(), cancel.clone());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            tracing::info!("Received Ctrl-C, shutting down");
        }
        _ = cancel.cancelled() => tracing::info!("Shutdown requested from the console"),
    }
    cancel.cancel();

    // An install that already started finishes before we stop the server.
    if let Err(e) = updater.await {
        tracing::error!(error = %e, "Update task failed");
    }
    shutdown_server(&server, DEFAULT_STOP_TIMEOUT).await;
    Ok(())
}

/// Forward lines typed on our stdin to the server console. `stop` shuts the
/// whole host down instead of only the server.
fn forward_operator_input(server: Arc<ChildServer>, cancel: CancellationToken) {
    let (tx, mut rx) = mpsc::channel::<String>(16);

    // A plain thread: a blocking stdin read must not hold up runtime shutdown.
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = rx.recv() => line,
            };
            let Some(line) = line else { break };
            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            if command == STOP_COMMAND {
                cancel.cancel();
                break;
            }
            if let Err(e) = server.send_command(command).await {
                tracing::warn!(error = %e, command, "Failed to forward console command");
            }
        }
    });
}

async fn shutdown_server(server: &ChildServer, stop_timeout: Duration) {
    if !server.is_running().await {
        server.release().await;
        return;
    }
    let stop = async {
        if let Err(e) = server.request_stop().await {
            tracing::warn!(error = %e, "Failed to send stop command");
        }
        server.wait_for_exit().await
    };
    // The stop request shares the timeout, and the future is dropped before
    // `kill` so a stuck console write releases its lock.
    let outcome = tokio::time::timeout(stop_timeout, stop).await;
    match outcome {
        Ok(Ok(())) => server.release().await,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed waiting for the server to exit");
            server.kill().await;
        }
        Err(_) => {
            tracing::error!(timeout = ?stop_timeout, "Server did not stop in time, killing it");
            server.kill().await;
        }
    }
    tracing::info!("Server stopped");
}
