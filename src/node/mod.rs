//! # Local Node
//!
//! A minimal consensus node for development and integration tests. It speaks
//! the same length-prefixed JSON protocol as the client and can be switched
//! between accepting, busy, rejecting, hanging and disconnecting at runtime.
//!
//! Accepted envelopes are checked for the target node account, a non-empty
//! payload and a valid operator signature; the payload is echoed back.

pub mod server;

pub use server::{LocalNode, NodeBehavior, NodeHandle};
