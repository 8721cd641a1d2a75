// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Port Forward Contributors

// Port Forward - Daemon
// Runs the forwarding listener and takes toggle commands on stdin

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use port_forward_daemon::{
    ChannelListener, ConsoleSurface, DaemonConfig, EventBus, EventListener, ForwardController,
    Presenter, TcpForwardEngine, WeakListener,
};

#[derive(Parser)]
#[command(name = "port-forwardd")]
#[command(about = "Port Forward daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to daemon.toml (default: ~/.config/port-forward/daemon.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the desired-state file (overrides daemon.toml)
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Listener port to store before resuming
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "port_forward_daemon=debug,port_forward_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Port Forward Daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut daemon_config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(state) = cli.state {
        daemon_config.state_path = Some(state);
    }
    let store = daemon_config.state_store()?;
    info!("Desired state file: {}", store.path().display());
    info!("Relaying to: {}", daemon_config.upstream);

    let engine = Arc::new(TcpForwardEngine::new(daemon_config.relay_settings()));
    let bus = EventBus::new();
    let controller = ForwardController::new(engine.clone(), bus.clone());

    // Subscribe to controller events for logging
    let (log_listener, mut event_rx) = ChannelListener::new();
    bus.register(log_listener);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!("Forward event: {:?}", event);
        }
    });

    let presenter = Arc::new(Presenter::new(
        store,
        controller.clone(),
        Arc::new(ConsoleSurface),
    ));
    let presenter_listener: Arc<dyn EventListener> = WeakListener::new(&presenter);
    bus.register(presenter_listener.clone());

    // Restart-on-relaunch: pick up where the stored desired state left off
    match cli.port {
        Some(port) => drop(presenter.set_port(port)),
        None => drop(presenter.resume()),
    }

    print_help();
    presenter.show_state();

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_command(&presenter, line.trim()) {
                            info!("Quit requested");
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed; running until signalled");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read command: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    if let Err(e) = presenter.checkpoint() {
        error!("Failed to save desired state: {}", e);
    }
    bus.unregister(&presenter_listener);
    engine.stop_all().await;
    info!("Daemon shut down");

    Ok(())
}

/// Apply one console command. Returns false when the daemon should exit.
fn handle_command(presenter: &Presenter, command: &str) -> bool {
    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("toggle" | "t"), None) => drop(presenter.toggle()),
        (Some("port" | "p"), Some(port)) => match port.parse::<u16>() {
            Ok(port) if port != 0 => drop(presenter.set_port(port)),
            _ => println!("{} {}", "invalid port:".red(), port),
        },
        (Some("status" | "s"), None) => presenter.show_state(),
        (Some("help" | "h" | "?"), None) => print_help(),
        (Some("quit" | "q" | "exit"), None) => return false,
        _ => println!("{} {} (try 'help')", "unknown command:".red(), command),
    }
    true
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  toggle | t        start or stop forwarding");
    println!("  port <n> | p <n>  change the listener port");
    println!("  status | s        show desired and actual state");
    println!("  quit | q          save state, stop listening and exit");
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}
