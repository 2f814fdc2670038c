//! # Configuration Utilities
//!
//! Configuration structures for building a client session. Nothing here reads
//! process-wide state on its own: TOML files are loaded from an explicit path
//! and environment values come through a caller-supplied lookup function.
//!
//! # Example TOML
//!
//! ```toml
//! network = "testnet"
//! mirror_network = ["testnet.mirrornode.hedera.com:443"]
//!
//! [operator]
//! account_id = "0.0.1001"
//! private_key = "302e020100300506032b657004220420..."
//!
//! [execution]
//! max_attempts = 5
//! request_timeout_ms = 30000
//! ```
//!
//! An explicit node list replaces the network name:
//!
//! ```toml
//! [[network]]
//! address = "127.0.0.1:50211"
//! account = "0.0.3"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::ids::AccountId;
use crate::error::{ClientError, Result};
use crate::keys::PrivateKey;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let config: ClientConfig = load_config("config/client.toml")?;
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Network name or explicit node list
    pub network: NetworkConfig,
    /// Mirror endpoints; when absent a named network keeps its built-in list
    #[serde(default)]
    pub mirror_network: Option<Vec<String>>,
    /// Default payer and signer
    #[serde(default)]
    pub operator: Option<OperatorConfig>,
    /// Retry, backoff and timeout tuning
    #[serde(default)]
    pub execution: ExecutionOptions,
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config(path)
    }
}

/// Either a well-known network name or an ordered list of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworkConfig {
    Name(String),
    Nodes(Vec<NodeEntry>),
}

/// One consensus node in an explicit node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// `host:port` of the node
    pub address: String,
    /// Node account id, e.g. `0.0.3`
    pub account: AccountId,
}

/// Operator credentials as they appear in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub account_id: AccountId,
    /// Hex private key, raw or DER-prefixed
    pub private_key: String,
}

impl OperatorConfig {
    pub fn private_key(&self) -> Result<PrivateKey> {
        self.private_key.parse()
    }
}

/// Retry, backoff and timeout settings for request execution.
///
/// Durations are stored in milliseconds so they read naturally in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Upper bound on attempts for one `execute` call
    pub max_attempts: u32,
    /// First wait after a node reports itself busy
    pub min_backoff_ms: u64,
    /// Cap on the busy wait
    pub max_backoff_ms: u64,
    /// Initial exclusion window for a failing node
    pub min_node_backoff_ms: u64,
    /// Cap on a node's exclusion window
    pub max_node_backoff_ms: u64,
    /// Overall budget for one `execute` call
    pub request_timeout_ms: u64,
    /// Budget for a single send/receive exchange
    pub attempt_timeout_ms: u64,
    /// Budget for establishing a channel
    pub connect_timeout_ms: u64,
    /// How long `close` waits for in-flight requests
    pub close_timeout_ms: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_backoff_ms: 250,
            max_backoff_ms: 8_000,
            min_node_backoff_ms: 8_000,
            max_node_backoff_ms: 60 * 60 * 1000,
            request_timeout_ms: 120_000,
            attempt_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            close_timeout_ms: 30_000,
        }
    }
}

impl ExecutionOptions {
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn min_node_backoff(&self) -> Duration {
        Duration::from_millis(self.min_node_backoff_ms)
    }

    pub fn max_node_backoff(&self) -> Duration {
        Duration::from_millis(self.max_node_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Reject settings that would make execution impossible.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ClientError::Config("max_attempts must be greater than zero".into()));
        }
        if self.min_backoff_ms > self.max_backoff_ms {
            return Err(ClientError::Config("min_backoff_ms exceeds max_backoff_ms".into()));
        }
        if self.min_node_backoff_ms > self.max_node_backoff_ms {
            return Err(ClientError::Config(
                "min_node_backoff_ms exceeds max_node_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Environment keys recognised by [`EnvConfig`].
pub const OPERATOR_ID: &str = "OPERATOR_ID";
pub const OPERATOR_KEY: &str = "OPERATOR_KEY";
pub const NODE_ID: &str = "NODE_ID";
pub const NODE_ADDRESS: &str = "NODE_ADDRESS";
pub const NETWORK_NAME: &str = "NETWORK_NAME";

const DEFAULT_NETWORK_NAME: &str = "testnet";

/// Settings read from environment-style key/value pairs.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub operator_id: AccountId,
    pub operator_key: PrivateKey,
    /// Single explicit node, when both `NODE_ID` and `NODE_ADDRESS` are set
    pub node: Option<NodeEntry>,
    pub network_name: String,
}

impl EnvConfig {
    /// Read settings through `lookup`, e.g. `|key| std::env::var(key).ok()`.
    ///
    /// `OPERATOR_ID` and `OPERATOR_KEY` are required. `NODE_ID` and
    /// `NODE_ADDRESS` are optional but must be given together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| ClientError::Config(format!("{key} is not set")))
        };

        let operator_id: AccountId = require(OPERATOR_ID)?.parse()?;
        let operator_key: PrivateKey = require(OPERATOR_KEY)?.parse()?;

        let node = match (get(NODE_ID), get(NODE_ADDRESS)) {
            (Some(id), Some(address)) => Some(NodeEntry {
                address: address.trim().to_string(),
                account: id.parse()?,
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ClientError::Config(format!("{NODE_ID} is set without {NODE_ADDRESS}")))
            }
            (None, Some(_)) => {
                return Err(ClientError::Config(format!("{NODE_ADDRESS} is set without {NODE_ID}")))
            }
        };

        let network_name = get(NETWORK_NAME).unwrap_or_else(|| DEFAULT_NETWORK_NAME.to_string());

        Ok(Self {
            operator_id,
            operator_key,
            node,
            network_name,
        })
    }

    /// Equivalent [`ClientConfig`]: the explicit node wins over the network name.
    pub fn to_client_config(&self) -> ClientConfig {
        let network = match &self.node {
            Some(node) => NetworkConfig::Nodes(vec![node.clone()]),
            None => NetworkConfig::Name(self.network_name.clone()),
        };

        ClientConfig {
            network,
            mirror_network: None,
            operator: Some(OperatorConfig {
                account_id: self.operator_id,
                private_key: self.operator_key.to_string_der(),
            }),
            execution: ExecutionOptions::default(),
        }
    }
}
