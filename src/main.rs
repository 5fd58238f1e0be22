//! peerlink-relay - Main entry point
//!
//! Signaling relay server for peer-to-peer data links.

use anyhow::{Context, Result};
use peerlink::{CliArgs, Config, RelayServer};
use tracing::{debug, error, info};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        let location = panic_info.location().unwrap();

        error!(
            "PANIC occurred at {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
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

fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level: {:?}", level);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic handler
    setup_panic_handler();

    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Initialize logging
    init_logging(&args);
    info!("peerlink-relay starting");
    debug!("CLI arguments: {:?}", args);

    // Create and validate configuration
    let config = Config::from_args(&args);
    config.validate().context("Invalid configuration")?;

    info!(
        "Relay policy: notify_disconnect={}, allow_absent_target={}",
        config.policy.notify_disconnect, config.policy.allow_absent_target
    );

    // Run the relay
    let server = RelayServer::new(config.listen_addr(), config.policy, config.max_payload);
    server.run().await.context("Relay server failed")?;

    Ok(())
}
