//! Operator running distributed Locust load tests
#![deny(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use clap::Parser;
use locust_common::telemetry;
use locust_operator::locust;
use opentelemetry::global::shutdown_tracer_provider;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Endpoint of an OTLP collector receiving traces.
    #[arg(long, env = "LOCUST_OPERATOR_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Address serving prometheus metrics.
    #[arg(long, env = "LOCUST_OPERATOR_METRICS_ADDR", default_value = "0.0.0.0:9464")]
    metrics_addr: SocketAddr,

    /// Seconds between two stats polls of a load test.
    #[arg(long, env = "LOCUST_OPERATOR_STATS_INTERVAL_SECS", default_value_t = 5)]
    stats_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    telemetry::init_tracing(args.otlp_endpoint.clone()).await?;
    let (metrics_provider, registry) = telemetry::init_metrics()?;

    info!(?args, "starting operator");
    let metrics = tokio::spawn(telemetry::serve_metrics(args.metrics_addr, registry));
    tokio::select! {
        res = locust::controller::run(Duration::from_secs(args.stats_interval_secs)) => res?,
        res = metrics => res??,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    // Flush traces and metrics before shutdown
    shutdown_tracer_provider();
    metrics_provider.shutdown()?;
    Ok(())
}
