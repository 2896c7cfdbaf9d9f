//! rdbms-bench - query latency comparison across relational engines.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rdbms_bench::{Args, Catalog, Suite};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rdbms_bench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting rdbms-bench");

    let args = Args::parse();
    let format = args.format;
    let dump_catalog = args.dump_catalog;

    // Load the catalog
    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin(),
    };
    let catalog = if args.cases.is_empty() {
        catalog
    } else {
        catalog.select(&args.cases)?
    };

    if dump_catalog {
        println!("{}", catalog.to_json()?);
        return Ok(());
    }

    let config = args.into_config();
    config.validate()?;

    tracing::info!(
        engines = ?config.engines,
        cases = catalog.len(),
        warmup = config.warmup_executions,
        provision = config.provision,
        "configuration loaded"
    );

    // Cancel the run on ctrl+c
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received interrupt, cancelling");
        trigger.cancel();
    });

    let suite = Suite::new(&catalog, &config, cancel);
    match suite.run().await {
        Ok(report) => {
            println!("{}", report.render(format)?);
            if !report.failures().is_empty() {
                tracing::warn!(failures = report.failures().len(), "some cases failed");
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "benchmark failed");
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
