use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::common::connection::Connection;
use crate::common::ids::AccountId;
use crate::common::messages::{Message, NodeReply, SignedEnvelope, Status};
use crate::keys::PublicKey;

/// How a [`LocalNode`] answers submitted envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeBehavior {
    /// Check the envelope and answer `Ok` (payload echoed) or a precheck status
    #[default]
    Accept,
    /// Answer `Busy` to everything
    Busy,
    /// Answer this status to everything
    Reject(Status),
    /// Read envelopes but never answer
    Hang,
    /// Drop the connection on the first envelope
    Disconnect,
}

/// Shared view of a running node: address, counters and behavior switch.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    account_id: AccountId,
    address: SocketAddr,
    behavior: Arc<RwLock<NodeBehavior>>,
    received: Arc<AtomicUsize>,
}

impl NodeHandle {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// `host:port` the node is listening on.
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    pub async fn set_behavior(&self, behavior: NodeBehavior) {
        *self.behavior.write().await = behavior;
        info!("Node {} behavior set to {:?}", self.account_id, behavior);
    }

    pub async fn behavior(&self) -> NodeBehavior {
        *self.behavior.read().await
    }

    /// Envelopes received since start, answered or not.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

/// A single consensus node speaking the client wire protocol.
pub struct LocalNode {
    listener: TcpListener,
    handle: NodeHandle,
}

impl LocalNode {
    /// Bind to `address`. Port `0` picks a free port; see [`NodeHandle::address`].
    pub async fn bind(address: &str, account_id: AccountId, behavior: NodeBehavior) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind node {account_id} to {address}"))?;
        let address = listener.local_addr()?;

        Ok(Self {
            listener,
            handle: NodeHandle {
                account_id,
                address,
                behavior: Arc::new(RwLock::new(behavior)),
                received: Arc::new(AtomicUsize::new(0)),
            },
        })
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> (NodeHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self) {
        info!(
            "Node {} listening on {}",
            self.handle.account_id, self.handle.address
        );

        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("Node {} accepted connection from {}", self.handle.account_id, peer);
                    let node = self.handle.clone();
                    tokio::spawn(async move {
                        handle_connection(socket, node).await;
                    });
                }
                Err(e) => error!("Accept error on node {}: {}", self.handle.account_id, e),
            }
        }
    }
}

/// Read envelopes from one client and answer each in order.
async fn handle_connection(socket: TcpStream, node: NodeHandle) {
    let mut conn = Connection::new(socket);

    loop {
        let envelope = match conn.read_message().await {
            Ok(Some(Message::Submit { envelope })) => envelope,
            Ok(Some(other)) => {
                warn!("Node {} got unexpected message: {:?}", node.account_id, other);
                break;
            }
            Ok(None) => {
                debug!("Client disconnected from node {}", node.account_id);
                break;
            }
            Err(e) => {
                error!("Node {} failed to read message: {}", node.account_id, e);
                break;
            }
        };
        node.received.fetch_add(1, Ordering::SeqCst);

        let status = match node.behavior().await {
            NodeBehavior::Accept => precheck(node.account_id, &envelope),
            NodeBehavior::Busy => Status::Busy,
            NodeBehavior::Reject(status) => status,
            NodeBehavior::Hang => {
                debug!(
                    "Node {} holding {} without reply",
                    node.account_id, envelope.body.transaction_id
                );
                continue;
            }
            NodeBehavior::Disconnect => {
                debug!("Node {} dropping connection", node.account_id);
                break;
            }
        };

        debug!(
            "Node {} answers {} with {:?}",
            node.account_id, envelope.body.transaction_id, status
        );

        let payload = if status == Status::Ok {
            envelope.body.payload
        } else {
            Vec::new()
        };
        let reply = Message::Reply {
            reply: NodeReply {
                transaction_id: envelope.body.transaction_id,
                node_account_id: node.account_id,
                status,
                payload,
            },
        };

        if let Err(e) = conn.write_message(&reply).await {
            warn!("Node {} failed to reply: {}", node.account_id, e);
            break;
        }
    }
}

/// Checks a node performs before accepting an envelope.
fn precheck(account_id: AccountId, envelope: &SignedEnvelope) -> Status {
    if envelope.body.node_account_id != account_id {
        return Status::InvalidNodeAccount;
    }
    if envelope.body.payload.is_empty() {
        return Status::InvalidTransactionBody;
    }

    let Ok(public_key) = envelope.signer_public_key.parse::<PublicKey>() else {
        return Status::InvalidSignature;
    };
    let Ok(signature) = hex::decode(&envelope.signature) else {
        return Status::InvalidSignature;
    };
    if !public_key.verify(&envelope.body.signing_bytes(), &signature) {
        return Status::InvalidSignature;
    }

    Status::Ok
}
