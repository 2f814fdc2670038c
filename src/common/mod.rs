//! # Common Components
//!
//! Shared utilities and data structures used by both the client session and the
//! local node simulator.
//!
//! ## Modules
//!
//! - [`ids`]: Account and transaction identifiers
//! - [`messages`]: Wire message definitions exchanged with consensus nodes
//! - [`connection`]: TCP connection abstraction with message framing
//! - [`config`]: Configuration parsing utilities
//! - [`logging`]: Logger setup for the binaries

pub mod ids;
pub mod messages;
pub mod connection;
pub mod config;
pub mod logging;
