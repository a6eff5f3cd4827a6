//! Observability client example
//!
//! Demonstrates OpenTelemetry integration: traces for every call and the
//! `tether.client.*` metrics, exported over OTLP.
//!
//! Run with: cargo run --example observability_client

use serde_json::json;
use tether::ClientBuilder;
use tether_core::ObservabilityConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let otel_config = ObservabilityConfig::new("tether-observability-client")
        .with_endpoint("http://localhost:4317")
        .with_log_level("debug");

    // The first call opens the connection
    let client = ClientBuilder::new("ws://127.0.0.1:9010/live")
        .with_observability(otel_config)
        .service_name("observability-client")
        .build()?;

    for i in 1..=5 {
        tracing::info!(iteration = i, "Starting iteration");
        let sum = client.run("add", json!({"a": i * 10, "b": i * 5})).await?;
        println!("Iteration {}: {} + {} = {}", i, i * 10, i * 5, sum);
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
    }

    println!("View traces for service observability-client in your OTLP backend");

    client.close();
    // Give time for telemetry to flush
    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
    tether_core::shutdown_observability();
    Ok(())
}
