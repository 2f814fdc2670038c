//! # Error Types
//!
//! Every public operation of the session returns either a value or exactly one
//! [`ClientError`] kind. Callers match on the kind; diagnostics for retried
//! requests travel inside [`ClientError::RequestExhausted`].

use std::fmt;
use std::result;

use thiserror::Error;

use crate::common::ids::AccountId;
use crate::common::messages::Status;

/// Result type for session operations
pub type Result<T> = result::Result<T, ClientError>;

/// Why a single attempt against a single node did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Account id of the node that was tried
    pub account_id: AccountId,
    /// Endpoint the attempt went to
    pub endpoint: String,
    /// Human readable reason (transport error, busy status, backoff, ...)
    pub reason: String,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} at {}: {}", self.account_id, self.endpoint, self.reason)
    }
}

/// Error type for session operations
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The named network is not one of the built-in networks
    #[error("Unknown network: {0} (expected mainnet, testnet, previewnet or localhost)")]
    UnknownNetwork(String),

    /// Malformed endpoint string, duplicate endpoint or empty endpoint map
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The request needs a signing identity and none is configured
    #[error("No operator configured and the request carries no payer override")]
    NoOperatorConfigured,

    /// A single node could not be reached or could not serve the request
    #[error("Node {account_id} at {endpoint} unreachable: {reason}")]
    NodeUnreachable {
        account_id: AccountId,
        endpoint: String,
        reason: String,
    },

    /// Every permitted attempt failed with a transient error
    #[error("Request failed after {} attempt(s): [{}]", .failures.len(), join_failures(.failures))]
    RequestExhausted { failures: Vec<AttemptFailure> },

    /// The session was closed
    #[error("Session closed")]
    SessionClosed,

    /// A node answered with a non-transient status; retrying cannot help
    #[error("Request rejected by node {account_id}: {status:?}")]
    Rejected { account_id: AccountId, status: Status },

    /// Account id string could not be parsed
    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    /// Private or public key material could not be decoded
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Configuration is missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Per-attempt failures attached to a [`ClientError::RequestExhausted`].
    pub fn failures(&self) -> &[AttemptFailure] {
        match self {
            ClientError::RequestExhausted { failures } => failures,
            _ => &[],
        }
    }

    /// Short stable label, used as the failure key in client metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::UnknownNetwork(_) => "unknown_network",
            ClientError::InvalidEndpoint(_) => "invalid_endpoint",
            ClientError::NoOperatorConfigured => "no_operator",
            ClientError::NodeUnreachable { .. } => "node_unreachable",
            ClientError::RequestExhausted { .. } => "request_exhausted",
            ClientError::SessionClosed => "session_closed",
            ClientError::Rejected { .. } => "rejected",
            ClientError::InvalidAccountId(_) => "invalid_account_id",
            ClientError::InvalidKey(_) => "invalid_key",
            ClientError::Config(_) => "config",
        }
    }
}

fn join_failures(failures: &[AttemptFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}
