use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use udp_fanout_relay::cli::Args;
use udp_fanout_relay::{Relay, RelayConfig, RunContext};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over the verbosity flag
    let log_level = if args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = RelayConfig::try_from(&args)?;

    info!("Starting UDP fan-out relay");
    info!("Listen address: {}", config.listen_addr);
    info!(
        "Relaying to {} destinations: {:?}",
        config.group_size(),
        config.destinations.iter().collect::<Vec<_>>()
    );
    info!("Ring capacity: {} datagrams", config.capacity());

    let relay = Arc::new(Relay::new(config));
    let ctx = RunContext::new();

    // Statistics reporting
    let stats_handle = relay.config().stats_interval.map(|period| {
        let stats = relay.stats().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            let mut last = stats.snapshot();
            let mut last_time = Instant::now();

            loop {
                interval.tick().await;
                let now = Instant::now();
                last = stats.report(&last, now.duration_since(last_time).as_secs_f64());
                last_time = now;
            }
        })
    });

    // Setup graceful shutdown
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C, shutting down...");
            ctx.cancel();
        });
    }

    let start_time = Instant::now();
    let result = {
        let relay = relay.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || relay.run(&ctx)).await?
    };

    if let Some(handle) = stats_handle {
        handle.abort();
    }
    relay.stats().log_summary(start_time.elapsed().as_secs_f64());

    result?;
    info!("UDP fan-out relay shutdown complete");
    Ok(())
}
