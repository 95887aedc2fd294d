//! p2p-relay - Main entry point
//!
//! Starts the relay listener and logs its lifecycle events until Ctrl+C.

use anyhow::{Context, Result};
use p2p_relay::{CliArgs, Config, Listener, ListenerEvent, PeerRegistry};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        if let Some(location) = panic_info.location() {
            error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        } else {
            error!("PANIC occurred at unknown location");
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("p2p-relay starting");
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args);
    if args.port != i64::from(config.port) {
        warn!("Port {} out of range, using {}", args.port, config.port);
    }
    config.validate().context("Invalid configuration")?;
    info!("Node name: {}", config.name);

    let registry = Arc::new(PeerRegistry::new());
    let fallback = Arc::new(config.static_files());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let listener = Listener::bind(
        config.listen_addr(),
        registry.clone(),
        fallback,
        events_tx,
        config.listener_options(),
    )
    .await
    .with_context(|| format!("Failed to listen on {}", config.listen_addr()))?;

    let accept_loop = tokio::spawn(listener.run(shutdown_rx));

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(ListenerEvent::Stopped) | None => break,
                Some(event) => info!("Message from listener channel: {}", event),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                let _ = shutdown_tx.send(());
            }
        }
    }

    if let Err(e) = accept_loop.await {
        error!("Accept loop task failed: {}", e);
    }

    info!("p2p-relay finished ({} peers still registered)", registry.len().await);
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized successfully");
}
