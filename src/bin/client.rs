//! # Client Binary Entry Point
//!
//! Submits one or more payloads through a [`Client`] session and prints the
//! responses.
//!
//! ## Usage
//!
//! With a TOML configuration file:
//! ```bash
//! cargo run --bin client -- --config config/client.toml --payload hello
//! ```
//!
//! With operator credentials from the environment (or a `.env` file):
//! ```bash
//! OPERATOR_ID=0.0.2 OPERATOR_KEY=302e... NETWORK_NAME=localhost \
//!   cargo run --bin client -- --payload hello --count 10 \
//!   --metrics-output ./metrics/client.json
//! ```
//!
//! The client will:
//! 1. Load configuration from the file, or from `OPERATOR_*` / `NODE_*` /
//!    `NETWORK_NAME` variables
//! 2. Build the session and set the operator
//! 3. Execute `--count` requests, optionally against a single `--node`
//! 4. Close the session and export metrics (if `--metrics-output` is given)

use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use ledger_client::client::{Client, ClientMetrics, Request};
use ledger_client::common::config::{ClientConfig, EnvConfig};
use ledger_client::common::logging::init_logger;
use ledger_client::AccountId;

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client configuration file (TOML format).
    /// Without it, settings come from the environment.
    #[arg(short, long)]
    config: Option<String>,

    /// Environment file loaded before reading settings from the environment
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Payload to submit
    #[arg(short, long, default_value = "ping")]
    payload: String,

    /// Number of requests to submit
    #[arg(long, default_value_t = 1)]
    count: u64,

    /// Submit only to this node account (e.g. 0.0.3)
    #[arg(long)]
    node: Option<AccountId>,

    /// Path to write metrics JSON output (optional)
    #[arg(long)]
    metrics_output: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load client config from {path}"))?,
        None => {
            if dotenvy::from_filename(&args.env_file).is_ok() {
                info!("Loaded environment from {}", args.env_file);
            }
            EnvConfig::from_lookup(|key| std::env::var(key).ok())?.to_client_config()
        }
    };

    let mut client = Client::from_config(&config)?;

    let metrics = if args.metrics_output.is_some() {
        let m = Arc::new(Mutex::new(ClientMetrics::new("client".to_string())));
        client = client.with_metrics(m.clone());
        Some(m)
    } else {
        None
    };

    let mut request = Request::new(args.payload.clone().into_bytes());
    if let Some(node) = args.node {
        request = request.with_node_account_id(node);
    }

    let mut failures = 0;
    for n in 1..=args.count {
        match client.execute(&request).await {
            Ok(response) => println!(
                "#{} {} served by {} ({}): {}",
                n,
                response.transaction_id,
                response.node_account_id,
                response.endpoint,
                String::from_utf8_lossy(&response.payload)
            ),
            Err(e) => {
                failures += 1;
                error!("Request #{} failed: {}", n, e);
            }
        }
    }

    client.close().await;
    info!(
        "Finished {} request(s), {} failed",
        args.count, failures
    );

    if let (Some(metrics), Some(output_path)) = (metrics, args.metrics_output) {
        let metrics = metrics
            .lock()
            .map_err(|_| anyhow::anyhow!("metrics lock poisoned"))?;
        metrics.export_to_json(&output_path)?;
        println!("Metrics exported to: {}", output_path);
    }

    Ok(())
}
