//! Basic client example
//!
//! Connects to a tether server, logs every connection state change and
//! server event, and runs a few remote functions.
//!
//! Run with: cargo run --example client_demo -- ws://127.0.0.1:9010/live

use serde::{Deserialize, Serialize};
use serde_json::json;
use tether::{ClientBuilder, ConnectPolicy};
use tether_client::{Event, EventName};

#[derive(Serialize)]
struct AddParams {
    a: i32,
    b: i32,
}

#[derive(Deserialize)]
struct AddResult {
    sum: i32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tether_client=debug".into()),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9010/live".to_string());

    let client = ClientBuilder::new(url)
        .connect_policy(ConnectPolicy::Immediate)
        .session_request(json!({"user": "demo"}))
        .on(EventName::ConnectionStatus, |event| {
            if let Event::ConnectionStatus(state) = event {
                println!("connection: {}", state);
            }
        })
        .on(EventName::Any, |event| {
            if let Event::User { name, data } = event {
                println!("server event {}: {}", name, data);
            }
        })
        .build()?;

    for i in 1..=3 {
        let result: AddResult = client.call("add", AddParams { a: i, b: i * 10 }).await?;
        tracing::info!(iteration = i, sum = result.sum, "add completed");
    }

    let echoed = client.run("echo", json!({"hello": "tether"})).await?;
    println!("echo: {}", echoed);

    client.close();
    Ok(())
}
