use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info};

mod config;
mod simulation;

use config::Cli;
use simulation::network::Simulation;

fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    // Logging setup: receptions always, sends only when verbose
    Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter(Some("range_broadcast_sim"), if config.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .parse_env("RUST_LOG")
        .init();

    info!("Starting up");

    let report = Simulation::from_config(&config)?.run()?;

    info!(
        "Finished at {}s after {} events: {} packets sent, {} delivered, {} out of range",
        report.end_time, report.events_fired, report.counters.transmitted, report.counters.delivered, report.counters.out_of_range
    );
    match report.mean_latency() {
        Some(latency) => info!("Mean latency over {} deliveries: {}s", report.deliveries.len(), latency),
        None => info!("No packets were delivered"),
    }
    for summary in report.node_summaries(config.n_wifi) {
        match summary.mean_latency {
            Some(latency) => info!(
                "Node {}: sent {}, received {}, mean latency {}s",
                summary.node_id, summary.sent, summary.received, latency
            ),
            None => info!("Node {}: sent {}, received {}", summary.node_id, summary.sent, summary.received),
        }
    }
    if report.pending_at_stop > 0 {
        info!("{} events were still pending at the stop time", report.pending_at_stop);
    }

    Ok(())
}
