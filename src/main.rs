use std::sync::Arc;

use clap::Parser;

use marquee_bus::Manager;
use marquee_server::ServerConfig;

/// Real-time push server for a digital-signage fleet.
#[derive(Parser, Debug)]
#[command(name = "marquee", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8750)]
    port: u16,

    /// Bound on each connection's pending-event queue.
    #[arg(long, default_value_t = 256)]
    queue_capacity: usize,

    /// Seconds of silence before a keep-alive ping.
    #[arg(long, default_value_t = 30)]
    idle_timeout_secs: u64,

    /// Token required for admin subscriptions and the broadcast trigger.
    #[arg(long, env = "MARQUEE_ADMIN_TOKEN")]
    admin_token: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting marquee push server");
    if args.admin_token.is_none() {
        tracing::warn!("no admin token configured, admin routes are open");
    }

    let config = ServerConfig {
        port: args.port,
        queue_capacity: args.queue_capacity,
        idle_timeout_secs: args.idle_timeout_secs,
        admin_token: args.admin_token,
    };
    let manager = Arc::new(Manager::new(config.queue_capacity));

    let handle = marquee_server::start(config, manager)
        .await
        .expect("failed to start server");
    tracing::info!(port = handle.port, "marquee ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}
