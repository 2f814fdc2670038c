//! # Client Components
//!
//! The session is split into focused components:
//!
//! ## Session ([`session`])
//! The public [`Client`]: construction for a named or explicit network,
//! operator and mirror configuration, request execution and shutdown.
//!
//! ## Operator ([`operator`])
//! The default paying account and signing key, replaceable at any time.
//!
//! ## Dispatcher ([`dispatcher`])
//! Node selection, retry and failover for one request:
//! - First healthy node in network order, each node tried at most once
//! - Busy nodes are retried elsewhere after an exponential wait
//! - Broken channels back their node off
//! - Per-attempt and overall timeouts
//!
//! ## Metrics ([`metrics`])
//! Optional per-request latency and outcome recording, exportable as JSON.

pub mod dispatcher;
pub mod metrics;
pub mod operator;
pub mod request;
pub mod session;

// Re-export for convenience
pub use dispatcher::RequestDispatcher;
pub use metrics::ClientMetrics;
pub use operator::{Operator, OperatorContext};
pub use request::{Request, Response};
pub use session::Client;
