pub mod client;
pub mod common;
pub mod error;
pub mod keys;
pub mod network;
pub mod node;

pub use client::{Client, Request, Response};
pub use common::ids::{AccountId, TransactionId};
pub use error::{ClientError, Result};
pub use keys::{PrivateKey, PublicKey};
pub use network::registry::{NetworkName, NetworkRegistry, NodeEndpoint};
