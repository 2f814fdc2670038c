//! # Node Registry
//!
//! Maps consensus node endpoints to node account ids. A registry comes from
//! one of three places:
//! - a well-known network name ([`NetworkRegistry::for_name`])
//! - an explicit endpoint map ([`NetworkRegistry::from_map`])
//! - the single local development node ([`NetworkRegistry::local`])
//!
//! Entries keep insertion order; the dispatcher walks them in that order.
//! Endpoint strings are unique within a registry, account ids are not: the
//! built-in tables list several addresses for the same node.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::common::ids::AccountId;
use crate::error::{ClientError, Result};

/// Consensus port of the local development node.
pub const LOCAL_CONSENSUS_PORT: u16 = 50211;
/// Mirror port of the local development node.
pub const LOCAL_MIRROR_PORT: u16 = 5600;
/// Account id reserved for the first consensus node.
pub const LOCAL_NODE_ACCOUNT: AccountId = AccountId::from_num(3);

const MAINNET_NODES: &[(&str, u64)] = &[
    ("35.237.200.180:50211", 3),
    ("34.239.82.6:50211", 3),
    ("13.124.142.126:50211", 3),
    ("15.164.44.66:50211", 3),
    ("15.165.118.251:50211", 3),
    ("35.186.191.247:50211", 4),
    ("3.130.52.236:50211", 4),
    ("35.192.2.25:50211", 5),
    ("3.18.18.254:50211", 5),
    ("74.50.117.35:50211", 5),
    ("23.111.186.250:50211", 5),
    ("107.155.64.98:50211", 5),
    ("35.199.161.108:50211", 6),
    ("13.52.108.243:50211", 6),
    ("13.71.90.154:50211", 6),
    ("104.211.205.124:50211", 6),
    ("13.235.15.32:50211", 6),
    ("35.203.82.240:50211", 7),
    ("3.114.54.4:50211", 7),
    ("35.236.5.219:50211", 8),
    ("35.183.66.150:50211", 8),
    ("35.197.192.225:50211", 9),
    ("35.181.158.250:50211", 9),
    ("35.242.233.154:50211", 10),
    ("3.248.27.48:50211", 10),
    ("179.190.33.184:50211", 10),
    ("35.240.118.96:50211", 11),
    ("13.53.119.185:50211", 11),
    ("69.87.222.61:50211", 11),
    ("96.126.72.172:50211", 11),
    ("69.87.221.231:50211", 11),
    ("35.204.86.32:50211", 12),
    ("35.177.162.180:50211", 12),
];

const TESTNET_NODES: &[(&str, u64)] = &[
    ("34.94.106.61:50211", 3),
    ("50.18.132.211:50211", 3),
    ("138.91.142.219:50211", 3),
    ("35.237.119.55:50211", 4),
    ("3.212.6.13:50211", 4),
    ("52.168.76.241:50211", 4),
    ("35.245.27.193:50211", 5),
    ("52.20.18.86:50211", 5),
    ("40.79.83.124:50211", 5),
    ("34.83.112.116:50211", 6),
    ("54.70.192.33:50211", 6),
    ("52.183.45.65:50211", 6),
    ("34.94.160.4:50211", 7),
    ("54.176.199.109:50211", 7),
    ("13.64.181.136:50211", 7),
    ("34.106.102.218:50211", 8),
    ("35.155.49.147:50211", 8),
    ("13.78.238.32:50211", 8),
    ("34.133.197.230:50211", 9),
    ("52.14.252.207:50211", 9),
    ("52.165.17.231:50211", 9),
];

const PREVIEWNET_NODES: &[(&str, u64)] = &[
    ("35.231.208.148:50211", 3),
    ("3.211.248.172:50211", 3),
    ("40.121.64.48:50211", 3),
    ("35.199.15.177:50211", 4),
    ("3.133.213.146:50211", 4),
    ("40.70.11.202:50211", 4),
    ("35.225.201.195:50211", 5),
    ("52.15.105.130:50211", 5),
    ("104.43.248.63:50211", 5),
    ("35.247.109.135:50211", 6),
    ("54.241.38.1:50211", 6),
    ("13.88.22.47:50211", 6),
    ("35.235.65.51:50211", 7),
    ("54.177.51.127:50211", 7),
    ("13.64.170.40:50211", 7),
    ("34.106.247.65:50211", 8),
    ("35.83.89.171:50211", 8),
    ("13.78.232.192:50211", 8),
    ("34.125.23.49:50211", 9),
    ("50.18.17.93:50211", 9),
    ("20.150.136.89:50211", 9),
];

/// Well-known networks with built-in node tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkName {
    Mainnet,
    Testnet,
    Previewnet,
    Localhost,
}

impl NetworkName {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkName::Mainnet => "mainnet",
            NetworkName::Testnet => "testnet",
            NetworkName::Previewnet => "previewnet",
            NetworkName::Localhost => "localhost",
        }
    }

    fn mirror_endpoint(self) -> String {
        match self {
            NetworkName::Mainnet => "mainnet-public.mirrornode.hedera.com:443".to_string(),
            NetworkName::Testnet => "testnet.mirrornode.hedera.com:443".to_string(),
            NetworkName::Previewnet => "previewnet.mirrornode.hedera.com:443".to_string(),
            NetworkName::Localhost => format!("127.0.0.1:{LOCAL_MIRROR_PORT}"),
        }
    }
}

impl fmt::Display for NetworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkName {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(NetworkName::Mainnet),
            "testnet" => Ok(NetworkName::Testnet),
            "previewnet" => Ok(NetworkName::Previewnet),
            "localhost" | "local-node" => Ok(NetworkName::Localhost),
            _ => Err(ClientError::UnknownNetwork(s.to_string())),
        }
    }
}

/// One consensus node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeEndpoint {
    /// `host:port`
    pub address: String,
    /// Account id of the node behind this address
    pub account_id: AccountId,
}

impl NodeEndpoint {
    pub fn new(address: impl Into<String>, account_id: AccountId) -> Self {
        Self {
            address: address.into(),
            account_id,
        }
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.account_id, self.address)
    }
}

/// Check that `endpoint` is `host:port`.
///
/// IPv6 hosts must be bracketed (`[::1]:50211`). The port must be 1..=65535.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let invalid = |why: &str| ClientError::InvalidEndpoint(format!("{endpoint:?}: {why}"));

    if endpoint.is_empty() {
        return Err(invalid("empty"));
    }
    if endpoint.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let Some((host, after)) = rest.split_once(']') else {
            return Err(invalid("unterminated '['"));
        };
        let Some(port) = after.strip_prefix(':') else {
            return Err(invalid("missing port"));
        };
        (host, port)
    } else {
        let Some((host, port)) = endpoint.rsplit_once(':') else {
            return Err(invalid("missing port"));
        };
        if host.contains(':') {
            return Err(invalid("IPv6 hosts must be bracketed"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid("port must be a number between 1 and 65535")),
        Ok(_) => Ok(()),
    }
}

/// Ordered set of consensus nodes plus the mirror node list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRegistry {
    nodes: Vec<NodeEndpoint>,
    mirror: Vec<String>,
    name: Option<NetworkName>,
}

impl NetworkRegistry {
    /// Resolve a network name (`mainnet`, `testnet`, `previewnet`, `localhost`).
    pub fn for_name(name: &str) -> Result<Self> {
        Ok(Self::for_network_name(name.parse()?))
    }

    pub fn for_network_name(name: NetworkName) -> Self {
        let table = match name {
            NetworkName::Mainnet => MAINNET_NODES,
            NetworkName::Testnet => TESTNET_NODES,
            NetworkName::Previewnet => PREVIEWNET_NODES,
            NetworkName::Localhost => return Self::local(),
        };

        Self {
            nodes: table
                .iter()
                .map(|(address, num)| NodeEndpoint::new(*address, AccountId::from_num(*num)))
                .collect(),
            mirror: vec![name.mirror_endpoint()],
            name: Some(name),
        }
    }

    /// Build from explicit `(endpoint, node account)` pairs, keeping their order.
    ///
    /// Fails with [`ClientError::InvalidEndpoint`] for an empty input, a
    /// malformed endpoint, or an endpoint listed twice. The mirror list starts
    /// empty.
    pub fn from_map<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, AccountId)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();

        for (address, account_id) in entries {
            let address = address.into();
            validate_endpoint(&address)?;
            if !seen.insert(address.clone()) {
                return Err(ClientError::InvalidEndpoint(format!(
                    "{address:?}: listed more than once"
                )));
            }
            nodes.push(NodeEndpoint::new(address, account_id));
        }

        if nodes.is_empty() {
            return Err(ClientError::InvalidEndpoint(
                "network map must contain at least one node".to_string(),
            ));
        }

        Ok(Self {
            nodes,
            mirror: Vec::new(),
            name: None,
        })
    }

    /// The single loopback development node and its mirror.
    pub fn local() -> Self {
        Self {
            nodes: vec![NodeEndpoint::new(
                format!("127.0.0.1:{LOCAL_CONSENSUS_PORT}"),
                LOCAL_NODE_ACCOUNT,
            )],
            mirror: vec![NetworkName::Localhost.mirror_endpoint()],
            name: Some(NetworkName::Localhost),
        }
    }

    /// Replace the mirror endpoint list; consensus nodes are untouched.
    pub fn with_mirror_endpoints<I, S>(mut self, endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mirror = endpoints
            .into_iter()
            .map(Into::into)
            .map(|endpoint: String| validate_endpoint(&endpoint).map(|_| endpoint))
            .collect::<Result<Vec<_>>>()?;
        self.mirror = mirror;
        Ok(self)
    }

    pub fn nodes(&self) -> &[NodeEndpoint] {
        &self.nodes
    }

    pub fn mirror_endpoints(&self) -> &[String] {
        &self.mirror
    }

    pub fn network_name(&self) -> Option<NetworkName> {
        self.name
    }

    /// Distinct node accounts, in order of first appearance.
    pub fn node_accounts(&self) -> Vec<AccountId> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .map(|node| node.account_id)
            .filter(|account_id| seen.insert(*account_id))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}
