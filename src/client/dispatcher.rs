//! # Request Dispatcher
//!
//! Turns one [`Request`] into a [`Response`] or exactly one error, retrying
//! across nodes as needed.
//!
//! ## Workflow
//!
//! 1. **Resolve the payer**: the request's operator override, else the
//!    session operator, else [`ClientError::NoOperatorConfigured`]
//! 2. **Stamp** one transaction id shared by every attempt
//! 3. **Select** the next node: the request's target node only, or the first
//!    healthy node (network order) not yet tried in the current round; once
//!    every healthy node had a turn a new round starts
//! 4. **Attempt**: acquire the channel, sign for that node, send, classify
//! 5. **React**:
//!    - `Success`: mark the node healthy, return the response
//!    - `Retry` status: wait out the busy backoff, try the next node
//!    - transport failure: mark the node unhealthy, try the next node
//!    - `RequestError` status: return [`ClientError::Rejected`] at once
//!
//! ## Limits
//!
//! - At most `max_attempts` attempts, cycling over the healthy nodes
//! - Each attempt is bounded by `min(attempt_timeout, time left)`
//! - The whole call is bounded by `request_timeout`
//!
//! When nothing succeeds the caller gets [`ClientError::RequestExhausted`]
//! listing what happened on every node.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::client::operator::{Operator, OperatorContext};
use crate::client::request::{Request, Response};
use crate::common::config::ExecutionOptions;
use crate::common::ids::{AccountId, TransactionId};
use crate::common::messages::{EnvelopeBody, ExecutionState};
use crate::error::{AttemptFailure, ClientError, Result};
use crate::network::pool::ConnectionPool;
use crate::network::registry::NodeEndpoint;
use crate::network::transport::TransportError;

/// Outcome of one attempt against one node.
enum Attempt {
    Success(Response),
    /// Worth trying elsewhere; `busy` when the node itself asked us to back off
    Transient { reason: String, busy: bool },
    Fatal(ClientError),
}

pub struct RequestDispatcher {
    pool: Arc<ConnectionPool>,
    operator: Arc<OperatorContext>,
    options: ExecutionOptions,
}

impl RequestDispatcher {
    pub fn new(
        pool: Arc<ConnectionPool>,
        operator: Arc<OperatorContext>,
        options: ExecutionOptions,
    ) -> Self {
        Self {
            pool,
            operator,
            options,
        }
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Execute `request`, returning the first successful response.
    ///
    /// # Errors
    /// - [`ClientError::NoOperatorConfigured`]: no payer available
    /// - [`ClientError::NodeUnreachable`]: the targeted node could not serve
    /// - [`ClientError::Rejected`]: a node refused the request itself
    /// - [`ClientError::RequestExhausted`]: every permitted attempt failed
    /// - [`ClientError::SessionClosed`]: the pool was closed underneath us
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        let operator = match request.operator() {
            Some(operator) => Arc::new(operator.clone()),
            None => self
                .operator
                .get()
                .ok_or(ClientError::NoOperatorConfigured)?,
        };

        let transaction_id = TransactionId::generate(operator.account_id());
        let deadline = Instant::now() + self.options.request_timeout();

        match request.node_account_id() {
            Some(target) => {
                self.execute_on(target, request, &operator, transaction_id, deadline)
                    .await
            }
            None => {
                self.execute_any(request, &operator, transaction_id, deadline)
                    .await
            }
        }
    }

    async fn execute_any(
        &self,
        request: &Request,
        operator: &Operator,
        transaction_id: TransactionId,
        deadline: Instant,
    ) -> Result<Response> {
        let max_attempts = request
            .max_attempts()
            .unwrap_or(self.options.max_attempts)
            .max(1);
        let mut tried = HashSet::new();
        let mut failures = Vec::new();
        let mut busy_replies = 0;

        for attempt in 1..=max_attempts {
            if Instant::now() >= deadline {
                warn!(
                    "Request {} hit its {:?} timeout after {} attempt(s)",
                    transaction_id,
                    self.options.request_timeout(),
                    attempt - 1
                );
                break;
            }

            let healthy = self.pool.healthy_nodes();
            if healthy.is_empty() {
                debug!("No healthy node left for request {}", transaction_id);
                break;
            }
            // Every healthy node had a turn: start another round.
            if healthy.iter().all(|node| tried.contains(&node.address)) {
                tried.clear();
            }
            let Some(node) = healthy
                .into_iter()
                .find(|node| !tried.contains(&node.address))
            else {
                break;
            };
            tried.insert(node.address.clone());

            debug!(
                "Request {} attempt {}/{} on node {}",
                transaction_id, attempt, max_attempts, node
            );

            match self
                .attempt(&node, request, operator, transaction_id, deadline)
                .await
            {
                Attempt::Success(response) => return Ok(response),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Transient { reason, busy } => {
                    warn!(
                        "Request {} failed on node {} (attempt {}/{}): {}",
                        transaction_id, node, attempt, max_attempts, reason
                    );
                    failures.push(AttemptFailure {
                        account_id: node.account_id,
                        endpoint: node.address.clone(),
                        reason,
                    });

                    if busy && attempt < max_attempts {
                        busy_replies += 1;
                        let delay = self
                            .busy_delay(busy_replies)
                            .min(deadline.saturating_duration_since(Instant::now()));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        if failures.is_empty() {
            failures = self.skipped_nodes(&tried);
        }

        warn!(
            "Request {} exhausted after {} failure(s)",
            transaction_id,
            failures.len()
        );
        Err(ClientError::RequestExhausted { failures })
    }

    async fn execute_on(
        &self,
        target: AccountId,
        request: &Request,
        operator: &Operator,
        transaction_id: TransactionId,
        deadline: Instant,
    ) -> Result<Response> {
        let endpoints = self.pool.endpoints_for(target);
        let mut last_failure = None;

        for node in endpoints {
            if !self.pool.is_healthy(&node.address) {
                let remaining = self.pool.remaining_backoff(&node.address);
                last_failure = Some((node, format!("backing off for another {remaining:?}")));
                continue;
            }
            if Instant::now() >= deadline {
                last_failure = Some((node, "request timeout elapsed".to_string()));
                break;
            }

            match self
                .attempt(&node, request, operator, transaction_id, deadline)
                .await
            {
                Attempt::Success(response) => return Ok(response),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Transient { reason, .. } => last_failure = Some((node, reason)),
            }
        }

        let err = match last_failure {
            Some((node, reason)) => ClientError::NodeUnreachable {
                account_id: target,
                endpoint: node.address,
                reason,
            },
            None => ClientError::NodeUnreachable {
                account_id: target,
                endpoint: String::new(),
                reason: "node is not part of the network".to_string(),
            },
        };
        warn!("Request {} could not be served: {}", transaction_id, err);
        Err(err)
    }

    async fn attempt(
        &self,
        node: &NodeEndpoint,
        request: &Request,
        operator: &Operator,
        transaction_id: TransactionId,
        deadline: Instant,
    ) -> Attempt {
        let remaining = deadline.saturating_duration_since(Instant::now());

        let channel = match tokio::time::timeout(remaining, self.pool.acquire(&node.address)).await
        {
            Ok(Ok(channel)) => channel,
            Ok(Err(ClientError::NodeUnreachable { reason, .. })) => {
                return Attempt::Transient {
                    reason,
                    busy: false,
                }
            }
            Ok(Err(err)) => return Attempt::Fatal(err),
            Err(_) => {
                return Attempt::Transient {
                    reason: "request timeout elapsed while connecting".to_string(),
                    busy: false,
                }
            }
        };

        let envelope = operator.sign(EnvelopeBody {
            transaction_id,
            node_account_id: node.account_id,
            payload: request.payload().to_vec(),
        });

        let budget = self
            .options
            .attempt_timeout()
            .min(deadline.saturating_duration_since(Instant::now()));

        let reply = match tokio::time::timeout(budget, channel.send(envelope)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => return self.transport_failure(node, err),
            Err(_) => return self.transport_failure(node, TransportError::Timeout(budget)),
        };

        self.pool.mark_healthy(&node.address);

        match reply.status.execution_state() {
            ExecutionState::Success => {
                info!("Request {} served by node {}", transaction_id, node);
                Attempt::Success(Response {
                    node_account_id: node.account_id,
                    endpoint: node.address.clone(),
                    transaction_id,
                    payload: reply.payload,
                })
            }
            ExecutionState::Retry => Attempt::Transient {
                reason: format!("node answered {:?}", reply.status),
                busy: true,
            },
            ExecutionState::RequestError => {
                warn!(
                    "Request {} rejected by node {}: {:?}",
                    transaction_id, node, reply.status
                );
                Attempt::Fatal(ClientError::Rejected {
                    account_id: node.account_id,
                    status: reply.status,
                })
            }
        }
    }

    fn transport_failure(&self, node: &NodeEndpoint, err: TransportError) -> Attempt {
        let reason = err.to_string();
        self.pool.mark_unhealthy(&node.address, &reason);
        Attempt::Transient {
            reason,
            busy: false,
        }
    }

    /// `min_backoff * 2^(n-1)`, capped at `max_backoff`.
    fn busy_delay(&self, busy_replies: u32) -> Duration {
        let factor = 1u32 << busy_replies.saturating_sub(1).min(16);
        self.options
            .min_backoff()
            .saturating_mul(factor)
            .min(self.options.max_backoff())
    }

    /// Failure entries for nodes never attempted, used when no attempt ran.
    fn skipped_nodes(&self, tried: &HashSet<String>) -> Vec<AttemptFailure> {
        self.pool
            .nodes()
            .into_iter()
            .filter(|node| !tried.contains(&node.address))
            .map(|node| {
                let remaining = self.pool.remaining_backoff(&node.address);
                let reason = if remaining.is_zero() {
                    "not attempted before the request timed out".to_string()
                } else {
                    format!("backing off for another {remaining:?}")
                };
                AttemptFailure {
                    account_id: node.account_id,
                    endpoint: node.address,
                    reason,
                }
            })
            .collect()
    }
}
