//! # Local Node Binary Entry Point
//!
//! Runs a single development node that answers client sessions.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin node
//! cargo run --bin node -- --address 127.0.0.1:50212 --account 0.0.4 --busy
//! ```

use clap::Parser;

use ledger_client::common::logging::init_logger;
use ledger_client::network::registry::{LOCAL_CONSENSUS_PORT, LOCAL_NODE_ACCOUNT};
use ledger_client::node::{LocalNode, NodeBehavior};
use ledger_client::AccountId;

/// Command-line arguments for the node binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on (defaults to 127.0.0.1:50211)
    #[arg(short, long)]
    address: Option<String>,

    /// Node account id (defaults to 0.0.3)
    #[arg(long)]
    account: Option<AccountId>,

    /// Answer every request with BUSY
    #[arg(long)]
    busy: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let address = args
        .address
        .unwrap_or_else(|| format!("127.0.0.1:{LOCAL_CONSENSUS_PORT}"));
    let account = args.account.unwrap_or(LOCAL_NODE_ACCOUNT);
    let behavior = if args.busy {
        NodeBehavior::Busy
    } else {
        NodeBehavior::Accept
    };

    let node = LocalNode::bind(&address, account, behavior).await?;
    node.run().await;

    Ok(())
}
