use replay_engine::{Replay, ReplayConfig};

use super::error::CliError;

pub async fn run(config: &ReplayConfig) -> Result<(), CliError> {
    tracing::info!(
        types = config.types.len(),
        sources = config.sources.len(),
        subscribers = config.subscribers.len(),
        "bootstrapping replay"
    );
    let replay = Replay::bootstrap(config)?;

    let stop = replay.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested");
            stop.stop();
        }
    });

    let outcome = replay.run().await?;
    let report = &outcome.report;

    println!(
        "records: {}  deliveries: {}  dropped: {}  rejected while loading: {}{}",
        report.records,
        report.deliveries,
        report.dropped,
        outcome.rejected,
        if report.stopped { "  (stopped)" } else { "" }
    );
    for source in &report.sources {
        println!("source {:<20} emitted {:>8}  {:?}", source.name, source.emitted, source.state);
    }
    for sub in &report.subscribers {
        println!(
            "subscriber {:<16} deliveries {:>8}  failures {}",
            sub.name, sub.deliveries, sub.failures
        );
    }
    for (name, counts) in &outcome.counts {
        for (type_key, count) in counts.snapshot() {
            println!("count {name}/{type_key}: {count}");
        }
    }
    for fault in &report.faults {
        println!("fault: {fault}");
    }
    if report.faults_omitted > 0 {
        println!("faults omitted: {}", report.faults_omitted);
    }
    Ok(())
}
