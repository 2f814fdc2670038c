//! # Message Protocol
//!
//! Defines the messages exchanged between a client session and a consensus node:
//! - `Submit`: a signed request envelope addressed to one node
//! - `Reply`: the node's verdict and response payload
//!
//! Messages are serialized to JSON and sent over TCP with a 4-byte length prefix.
//! Payloads are opaque to this layer; only the envelope fields are interpreted.

use serde::{Deserialize, Serialize};

use crate::common::ids::{AccountId, TransactionId};

// ============================================================================
// MESSAGE TYPES
// ============================================================================

/// Core message enum for all client/node communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// **Submit**
    ///
    /// Sent by a client to the node named in `envelope.node_account_id`.
    Submit { envelope: SignedEnvelope },

    /// **Reply**
    ///
    /// The node's answer to a `Submit`, echoing the transaction id.
    Reply { reply: NodeReply },
}

/// The part of an envelope covered by the operator's signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeBody {
    pub transaction_id: TransactionId,
    pub node_account_id: AccountId,
    pub payload: Vec<u8>,
}

impl EnvelopeBody {
    /// Canonical bytes the signature is computed over:
    /// `<transaction id>|<node account id>|<payload>`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = format!("{}|{}|", self.transaction_id, self.node_account_id).into_bytes();
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// A request addressed to one node and signed by the paying operator.
///
/// # Fields
/// - `body`: transaction id, target node and opaque payload
/// - `signer_public_key`: hex public key of the signer
/// - `signature`: hex Ed25519 signature over [`EnvelopeBody::signing_bytes`]
///
/// Signatures are checked by the node, never by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub body: EnvelopeBody,
    pub signer_public_key: String,
    pub signature: String,
}

/// Per-request status reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Busy,
    PlatformNotActive,
    PlatformTransactionNotCreated,
    InvalidSignature,
    InvalidNodeAccount,
    InvalidTransactionBody,
    InsufficientPayerBalance,
    TransactionExpired,
    DuplicateTransaction,
}

/// How the dispatcher should react to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Request accepted; return the response
    Success,
    /// The node could not take the request right now; try another node
    Retry,
    /// The request itself is at fault; retrying cannot change the outcome
    RequestError,
}

impl Status {
    pub fn execution_state(self) -> ExecutionState {
        match self {
            Status::Ok => ExecutionState::Success,
            Status::Busy | Status::PlatformNotActive | Status::PlatformTransactionNotCreated => {
                ExecutionState::Retry
            }
            _ => ExecutionState::RequestError,
        }
    }
}

/// A node's answer to a submitted envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReply {
    pub transaction_id: TransactionId,
    pub node_account_id: AccountId,
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Message {
    /// Serialize a message to JSON bytes for transmission over the network.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a message from JSON bytes received from the network.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
