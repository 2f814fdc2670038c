//! # Network Components
//!
//! Everything the session knows about consensus nodes:
//!
//! ## Registry ([`registry`])
//! Which nodes exist: built-in named networks, explicit endpoint maps, the
//! single local node, and the mirror endpoint list.
//!
//! ## Transport ([`transport`])
//! How a channel to one node is opened and how one request travels over it.
//!
//! ## Connection Pool ([`pool`])
//! One lazily established channel per node plus health and backoff tracking.

pub mod pool;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use pool::{ConnectionPool, NodeState};
pub use registry::{NetworkName, NetworkRegistry, NodeEndpoint};
pub use transport::{Connector, TcpConnector, Transport, TransportError};
