//! Provides helper functions for initializing telemetry collection and publication.
use std::{convert::Infallible, net::SocketAddr};

use anyhow::Result;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::MeterProvider as SdkMeterProvider, runtime, trace, Resource};
use prometheus::{Encoder, TextEncoder};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter, Registry};

const SERVICE_NAME: &str = "locust-operator";

fn resource() -> Resource {
    Resource::new(vec![
        KeyValue::new(
            "hostname",
            gethostname::gethostname()
                .into_string()
                .unwrap_or_else(|_| "unknown".to_owned()),
        ),
        KeyValue::new("service.name", SERVICE_NAME),
    ])
}

/// Initialize tracing.
///
/// Logs are always written to stdout. When an OTLP endpoint is provided spans are also
/// exported over gRPC to that endpoint.
pub async fn init_tracing(otlp_endpoint: Option<String>) -> Result<()> {
    // Default to INFO if no env is specified
    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    let logger = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .compact()
        .with_filter(log_filter);

    let telemetry = match otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(trace::config().with_resource(resource()))
                .install_batch(runtime::Tokio)?;
            let otlp_filter = EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?;
            Some(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer)
                    .with_filter(otlp_filter),
            )
        }
        None => None,
    };

    let collector = Registry::default().with(telemetry).with(logger);

    #[cfg(feature = "tokio-console")]
    let collector = {
        let console_filter = EnvFilter::builder().parse("tokio=trace,runtime=trace")?;
        let console_layer = console_subscriber::spawn().with_filter(console_filter);
        collector.with(console_layer)
    };

    // Initialize tracing
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}

/// Initialize metrics.
///
/// Installs a global meter provider whose instruments are collected into the returned
/// prometheus registry.
pub fn init_metrics() -> Result<(SdkMeterProvider, prometheus::Registry)> {
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let provider = SdkMeterProvider::builder()
        .with_reader(exporter)
        .with_resource(resource())
        .build();
    global::set_meter_provider(provider.clone());
    Ok((provider, registry))
}

/// Serve the contents of the registry in the prometheus text format on every path.
pub async fn serve_metrics(addr: SocketAddr, registry: prometheus::Registry) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let mut buffer = Vec::new();
                    if let Err(err) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
                        warn!(%err, "failed to encode metrics");
                    }
                    Ok::<_, Infallible>(Response::new(Body::from(buffer)))
                }
            }))
        }
    });
    info!(%addr, "serving metrics");
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
