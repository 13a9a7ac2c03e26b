use std::time::Duration;

use chrono::{DateTime, Utc};
use netclock::{AssociationEvent, ClockConfig, NetworkClock};
use tokio::time::sleep;

#[tokio::main]
async fn main() -> netclock::Result<()> {
    tracing_subscriber::fmt::init();

    // Servers may be given on the command line; otherwise use the defaults
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = if args.is_empty() {
        ClockConfig::default()
    } else {
        ClockConfig::with_servers(&args)?
    };

    println!("Querying {} server(s):", config.servers.len());
    for server in &config.servers {
        println!("- {}", server);
    }

    let mut clock = NetworkClock::new(config);
    let mut events = clock.events();
    clock.start().await?;

    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let AssociationEvent::Sampled { report, sample } = event {
                println!(
                    "{:>40}  offset {:+.6}s  delay {:.6}s  trusted={}",
                    report.addr, sample.offset, sample.delay, report.trusted
                );
            }
        }
    });

    println!("\nRunning for 30 seconds...");
    for _ in 0..6 {
        sleep(Duration::from_secs(5)).await;

        let network: DateTime<Utc> = clock.network_time().into();
        let published = *clock.subscribe().borrow();
        println!(
            "\nnetwork time {}  offset {:+.6}s ± {:.6}s from {} source(s)  trusted={}\n",
            network.format("%Y-%m-%d %H:%M:%S%.6f"),
            published.offset,
            published.dispersion,
            published.sources,
            clock.is_trusted()
        );
    }

    clock.stop().await?;
    reporter.abort();

    println!("Final associations:");
    for report in clock.reports() {
        println!(
            "- {} ({}) samples={} poll={} offset {:+.6}s",
            report.addr, report.server, report.samples, report.poll, report.offset
        );
    }
    Ok(())
}
