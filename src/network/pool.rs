//! # Connection Pool
//!
//! One lazily established channel per node, plus the health bookkeeping the
//! dispatcher uses to pick nodes.
//!
//! ## Node lifecycle
//! ```text
//! Unconnected --acquire ok--> Connected
//! Unconnected --acquire fails--> Unhealthy
//! Connected --mark_unhealthy--> Unhealthy
//! Unhealthy --backoff elapsed, acquire ok--> Connected
//! any --close_all--> Unconnected (pool closed)
//! ```
//!
//! ## Backoff
//! Every failure readmits the node after its current backoff and doubles the
//! backoff up to the maximum. Every success halves it down to the minimum.
//!
//! ## Concurrency
//! Callers racing to connect the same node share one connection attempt: the
//! first takes the node's establishing lock, the others wait on it and then
//! observe the outcome (the new channel, or the node's backoff).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::common::config::ExecutionOptions;
use crate::common::ids::AccountId;
use crate::error::{ClientError, Result};
use crate::network::registry::NodeEndpoint;
use crate::network::transport::{Connector, Transport};

/// Connection state of one node as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No channel yet; the next `acquire` connects
    Unconnected,
    /// A channel is open and reusable
    Connected,
    /// Excluded from selection until `until`
    Unhealthy { until: Instant },
}

/// Bounds for the per-node exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeBackoff {
    pub min: Duration,
    pub max: Duration,
}

impl From<&ExecutionOptions> for NodeBackoff {
    fn from(options: &ExecutionOptions) -> Self {
        Self {
            min: options.min_node_backoff(),
            max: options.max_node_backoff(),
        }
    }
}

struct NodeHealth {
    state: NodeState,
    channel: Option<Arc<dyn Transport>>,
    current_backoff: Duration,
    bad_count: u64,
}

impl NodeHealth {
    fn new(backoff: NodeBackoff) -> Self {
        Self {
            state: NodeState::Unconnected,
            channel: None,
            current_backoff: backoff.min,
            bad_count: 0,
        }
    }

    fn is_healthy(&self, now: Instant) -> bool {
        match self.state {
            NodeState::Unhealthy { until } => now >= until,
            _ => true,
        }
    }

    fn remaining_backoff(&self, now: Instant) -> Duration {
        match self.state {
            NodeState::Unhealthy { until } => until.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    /// Returns the channel that was dropped, if any.
    fn record_failure(&mut self, now: Instant, backoff: NodeBackoff) -> Option<Arc<dyn Transport>> {
        self.bad_count += 1;
        self.state = NodeState::Unhealthy {
            until: now + self.current_backoff,
        };
        self.current_backoff = (self.current_backoff * 2).min(backoff.max);
        self.channel.take()
    }

    fn record_success(&mut self, now: Instant, backoff: NodeBackoff) {
        self.current_backoff = (self.current_backoff / 2).max(backoff.min);
        // An unhealthy node never holds a channel.
        if let NodeState::Unhealthy { until } = self.state {
            if now >= until {
                self.state = NodeState::Unconnected;
            }
        }
    }

    fn live_channel(&self) -> Option<Arc<dyn Transport>> {
        match self.state {
            NodeState::Connected => self.channel.clone(),
            _ => None,
        }
    }
}

struct NodeSlot {
    endpoint: NodeEndpoint,
    health: Mutex<NodeHealth>,
    establishing: tokio::sync::Mutex<()>,
}

impl NodeSlot {
    fn health(&self) -> MutexGuard<'_, NodeHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unreachable(&self, reason: impl Into<String>) -> ClientError {
        ClientError::NodeUnreachable {
            account_id: self.endpoint.account_id,
            endpoint: self.endpoint.address.clone(),
            reason: reason.into(),
        }
    }
}

/// Channels and health state for every node of one session.
pub struct ConnectionPool {
    slots: Vec<NodeSlot>,
    index: HashMap<String, usize>,
    connector: Arc<dyn Connector>,
    backoff: NodeBackoff,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create a pool over `nodes`, keeping their order. No connection is
    /// opened until the first [`acquire`](Self::acquire).
    pub fn new(
        nodes: &[NodeEndpoint],
        connector: Arc<dyn Connector>,
        backoff: NodeBackoff,
        connect_timeout: Duration,
    ) -> Self {
        let slots: Vec<NodeSlot> = nodes
            .iter()
            .map(|endpoint| NodeSlot {
                endpoint: endpoint.clone(),
                health: Mutex::new(NodeHealth::new(backoff)),
                establishing: tokio::sync::Mutex::new(()),
            })
            .collect();
        let index = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.endpoint.address.clone(), i))
            .collect();

        Self {
            slots,
            index,
            connector,
            backoff,
            connect_timeout,
            closed: AtomicBool::new(false),
        }
    }

    fn slot(&self, address: &str) -> Result<&NodeSlot> {
        self.index
            .get(address)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| ClientError::InvalidEndpoint(format!("{address:?}: not in the network")))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ClientError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Return the live channel to `address`, connecting first if needed.
    ///
    /// # Errors
    /// - [`ClientError::SessionClosed`] after [`close_all`](Self::close_all)
    /// - [`ClientError::InvalidEndpoint`] if `address` is not in the pool
    /// - [`ClientError::NodeUnreachable`] if the node is backing off or the
    ///   connection attempt fails (the node is then marked unhealthy)
    pub async fn acquire(&self, address: &str) -> Result<Arc<dyn Transport>> {
        self.ensure_open()?;
        let slot = self.slot(address)?;

        if let Some(channel) = slot.health().live_channel() {
            return Ok(channel);
        }

        let _establishing = slot.establishing.lock().await;
        self.ensure_open()?;

        {
            let health = slot.health();
            if let Some(channel) = health.live_channel() {
                return Ok(channel);
            }
            let remaining = health.remaining_backoff(Instant::now());
            if !remaining.is_zero() {
                return Err(slot.unreachable(format!("backing off for another {remaining:?}")));
            }
        }

        debug!("Connecting to node {}", slot.endpoint);
        let reason = match tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(&slot.endpoint),
        )
        .await
        {
            Ok(Ok(channel)) => {
                {
                    let mut health = slot.health();
                    if !self.closed.load(Ordering::Acquire) {
                        health.channel = Some(channel.clone());
                        health.state = NodeState::Connected;
                        drop(health);
                        info!("Connected to node {}", slot.endpoint);
                        return Ok(channel);
                    }
                }
                channel.close().await;
                return Err(ClientError::SessionClosed);
            }
            Ok(Err(e)) => format!("connect failed: {e}"),
            Err(_) => format!("connect timed out after {:?}", self.connect_timeout),
        };

        let backoff = {
            let mut health = slot.health();
            health.record_failure(Instant::now(), self.backoff);
            health.remaining_backoff(Instant::now())
        };
        warn!(
            "Node {} unreachable ({}); backing off for {:?}",
            slot.endpoint, reason, backoff
        );
        Err(slot.unreachable(reason))
    }

    /// Record a transport failure: drop the node's channel and back it off.
    pub fn mark_unhealthy(&self, address: &str, reason: &str) {
        let Ok(slot) = self.slot(address) else {
            return;
        };
        let (backoff, bad_count) = {
            let mut health = slot.health();
            let now = Instant::now();
            // Dropping the last handle closes the stream.
            let _ = health.record_failure(now, self.backoff);
            (health.remaining_backoff(now), health.bad_count)
        };
        warn!(
            "Node {} marked unhealthy ({}), failure #{}, backing off for {:?}",
            slot.endpoint, reason, bad_count, backoff
        );
    }

    /// Record that the node answered.
    pub fn mark_healthy(&self, address: &str) {
        if let Ok(slot) = self.slot(address) {
            slot.health().record_success(Instant::now(), self.backoff);
        }
    }

    pub fn state(&self, address: &str) -> Option<NodeState> {
        self.slot(address).ok().map(|slot| slot.health().state)
    }

    /// `false` only while the node is inside its backoff window.
    pub fn is_healthy(&self, address: &str) -> bool {
        self.slot(address)
            .map(|slot| slot.health().is_healthy(Instant::now()))
            .unwrap_or(false)
    }

    pub fn remaining_backoff(&self, address: &str) -> Duration {
        self.slot(address)
            .map(|slot| slot.health().remaining_backoff(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Number of failures recorded against the node since the pool was built.
    pub fn bad_count(&self, address: &str) -> u64 {
        self.slot(address)
            .map(|slot| slot.health().bad_count)
            .unwrap_or(0)
    }

    /// Nodes eligible for selection right now, in network order.
    pub fn healthy_nodes(&self) -> Vec<NodeEndpoint> {
        let now = Instant::now();
        self.slots
            .iter()
            .filter(|slot| slot.health().is_healthy(now))
            .map(|slot| slot.endpoint.clone())
            .collect()
    }

    pub fn nodes(&self) -> Vec<NodeEndpoint> {
        self.slots.iter().map(|slot| slot.endpoint.clone()).collect()
    }

    /// Every endpoint of one node account, in network order.
    pub fn endpoints_for(&self, account_id: AccountId) -> Vec<NodeEndpoint> {
        self.slots
            .iter()
            .filter(|slot| slot.endpoint.account_id == account_id)
            .map(|slot| slot.endpoint.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every channel. Later `acquire` calls fail with
    /// [`ClientError::SessionClosed`]; a second call does nothing.
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut released = 0;
        for slot in &self.slots {
            let channel = {
                let mut health = slot.health();
                health.state = NodeState::Unconnected;
                health.channel.take()
            };
            if let Some(channel) = channel {
                channel.close().await;
                released += 1;
            }
        }
        info!("Connection pool closed, released {} channel(s)", released);
    }
}
