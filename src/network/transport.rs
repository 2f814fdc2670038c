//! # Node Transport
//!
//! The seam between the connection pool and the wire. A [`Connector`] opens a
//! channel to one node; a [`Transport`] carries one envelope at a time over
//! that channel and returns the node's reply.
//!
//! [`TcpConnector`] is the production implementation: a TCP stream framed by
//! [`Connection`]. Tests substitute in-memory implementations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::common::connection::Connection;
use crate::common::messages::{Message, NodeReply, SignedEnvelope};
use crate::network::registry::NodeEndpoint;

/// Failure of a channel, as opposed to a verdict from the node.
///
/// Every variant is transient from the dispatcher's point of view.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// An established channel to one node.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one envelope and wait for the matching reply.
    async fn send(&self, envelope: SignedEnvelope) -> Result<NodeReply, TransportError>;

    /// Release the channel. Later `send` calls fail with [`TransportError::Closed`].
    async fn close(&self);
}

/// Opens channels to nodes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Plain TCP connector speaking the length-prefixed JSON protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<Arc<dyn Transport>, TransportError> {
        let stream = TcpStream::connect(&endpoint.address).await?;
        debug!("Connected to node {}", endpoint);

        Ok(Arc::new(TcpTransport {
            endpoint: endpoint.clone(),
            conn: Mutex::new(Some(Connection::new(stream))),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One TCP stream to one node.
///
/// The stream is taken out of the slot for the duration of an exchange and
/// only put back when the exchange completes, so an exchange that was
/// cancelled halfway leaves the transport closed rather than desynchronised.
pub struct TcpTransport {
    endpoint: NodeEndpoint,
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, envelope: SignedEnvelope) -> Result<NodeReply, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut slot = self.conn.lock().await;
        let mut conn = slot.take().ok_or(TransportError::Closed)?;
        let transaction_id = envelope.body.transaction_id;

        conn.write_message(&Message::Submit { envelope })
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let reply = match conn.read_message().await {
            Ok(Some(Message::Reply { reply })) => reply,
            Ok(Some(other)) => {
                return Err(TransportError::Protocol(format!(
                    "unexpected message from {}: {:?}",
                    self.endpoint, other
                )))
            }
            Ok(None) => return Err(TransportError::Closed),
            Err(e) => return Err(TransportError::Io(e.to_string())),
        };

        if reply.transaction_id != transaction_id {
            return Err(TransportError::Protocol(format!(
                "reply for {} while waiting for {}",
                reply.transaction_id, transaction_id
            )));
        }

        if !self.closed.load(Ordering::Acquire) {
            *slot = Some(conn);
        }
        Ok(reply)
    }

    /// Does not wait for an exchange in progress; its stream is dropped when it ends.
    async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let conn = match self.conn.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(mut conn) = conn {
            let _ = conn.shutdown().await;
            debug!("Closed channel to node {}", self.endpoint);
        }
    }
}
