//! # Client Session
//!
//! [`Client`] is the public entry point: it owns the network registry, the
//! operator, the connection pool and the dispatcher, and can be cloned and
//! shared between tasks.
//!
//! ## Lifecycle
//! ```text
//! Open --close()--> Closed
//! ```
//! `close` waits up to `close_timeout` for requests in flight. Requests still
//! running after that are cancelled and return [`ClientError::SessionClosed`];
//! only then is every channel released. Calling it again does nothing. Every
//! operation started after `close` fails with [`ClientError::SessionClosed`].
//!
//! ## Usage
//! ```rust,ignore
//! let client = Client::for_testnet();
//! client.set_operator("0.0.1001".parse()?, key)?;
//! let response = client.execute(&Request::new(b"ping".to_vec())).await?;
//! client.close().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::client::dispatcher::RequestDispatcher;
use crate::client::metrics::ClientMetrics;
use crate::client::operator::{Operator, OperatorContext};
use crate::client::request::{Request, Response};
use crate::common::config::{ClientConfig, ExecutionOptions, NetworkConfig};
use crate::common::ids::AccountId;
use crate::error::{ClientError, Result};
use crate::keys::PrivateKey;
use crate::network::pool::{ConnectionPool, NodeBackoff};
use crate::network::registry::{NetworkName, NetworkRegistry, NodeEndpoint};
use crate::network::transport::{Connector, TcpConnector};

/// A session against one ledger network.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    registry: RwLock<NetworkRegistry>,
    operator: Arc<OperatorContext>,
    pool: Arc<ConnectionPool>,
    dispatcher: RequestDispatcher,
    // Requests hold a read guard; close takes the write side to drain them.
    in_flight: tokio::sync::RwLock<()>,
    closed: AtomicBool,
    // Flipped once close gives up waiting; cancels requests still running.
    shutdown: watch::Sender<bool>,
    metrics: RwLock<Option<Arc<Mutex<ClientMetrics>>>>,
    request_seq: AtomicU64,
}

impl Client {
    /// Session for a named network (`mainnet`, `testnet`, `previewnet`,
    /// `localhost`/`local-node`).
    pub fn for_name(name: &str) -> Result<Self> {
        Ok(Self::for_registry(NetworkRegistry::for_name(name)?))
    }

    pub fn for_mainnet() -> Self {
        Self::for_registry(NetworkRegistry::for_network_name(NetworkName::Mainnet))
    }

    pub fn for_testnet() -> Self {
        Self::for_registry(NetworkRegistry::for_network_name(NetworkName::Testnet))
    }

    pub fn for_previewnet() -> Self {
        Self::for_registry(NetworkRegistry::for_network_name(NetworkName::Previewnet))
    }

    /// Session for the single node at `127.0.0.1:50211` (account `0.0.3`).
    pub fn for_local_node() -> Self {
        Self::for_registry(NetworkRegistry::local())
    }

    /// Session for an explicit `endpoint -> node account` list, kept in order.
    ///
    /// Fails with [`ClientError::InvalidEndpoint`] when the list is empty or an
    /// endpoint is malformed or repeated.
    pub fn for_network<I, S>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, AccountId)>,
        S: Into<String>,
    {
        Ok(Self::for_registry(NetworkRegistry::from_map(nodes)?))
    }

    /// Build a session from a loaded [`ClientConfig`], operator included.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut registry = match &config.network {
            NetworkConfig::Name(name) => NetworkRegistry::for_name(name)?,
            NetworkConfig::Nodes(nodes) => NetworkRegistry::from_map(
                nodes.iter().map(|node| (node.address.clone(), node.account)),
            )?,
        };
        if let Some(mirror) = &config.mirror_network {
            registry = registry.with_mirror_endpoints(mirror.iter().cloned())?;
        }

        let client = Self::with_options(registry, config.execution.clone())?;
        if let Some(operator) = &config.operator {
            client.set_operator(operator.account_id, operator.private_key()?)?;
        }
        Ok(client)
    }

    /// Session over `registry` with custom execution settings.
    pub fn with_options(registry: NetworkRegistry, options: ExecutionOptions) -> Result<Self> {
        Self::with_connector(registry, options, Arc::new(TcpConnector))
    }

    /// Session that opens node channels through `connector`.
    pub fn with_connector(
        registry: NetworkRegistry,
        options: ExecutionOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(registry, options, connector))
    }

    fn for_registry(registry: NetworkRegistry) -> Self {
        Self::build(registry, ExecutionOptions::default(), Arc::new(TcpConnector))
    }

    fn build(
        registry: NetworkRegistry,
        options: ExecutionOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            registry.nodes(),
            connector,
            NodeBackoff::from(&options),
            options.connect_timeout(),
        ));
        let operator = Arc::new(OperatorContext::new());
        let dispatcher = RequestDispatcher::new(pool.clone(), operator.clone(), options);

        info!(
            "Client created for {} with {} node(s)",
            registry
                .network_name()
                .map(|name| name.to_string())
                .unwrap_or_else(|| "custom network".to_string()),
            registry.len()
        );

        Self {
            inner: Arc::new(ClientInner {
                registry: RwLock::new(registry),
                operator,
                pool,
                dispatcher,
                in_flight: tokio::sync::RwLock::new(()),
                closed: AtomicBool::new(false),
                shutdown: watch::channel(false).0,
                metrics: RwLock::new(None),
                request_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Record every `execute` outcome into `metrics`.
    pub fn with_metrics(self, metrics: Arc<Mutex<ClientMetrics>>) -> Self {
        *self
            .inner
            .metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(metrics);
        self
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(ClientError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn registry(&self) -> std::sync::RwLockReadGuard<'_, NetworkRegistry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the default payer and signer; the public key is derived from the
    /// private key. Requests already in flight keep their operator.
    pub fn set_operator(&self, account_id: AccountId, private_key: PrivateKey) -> Result<()> {
        self.ensure_open()?;
        self.inner.operator.set(account_id, private_key);
        Ok(())
    }

    pub fn operator(&self) -> Option<Arc<Operator>> {
        self.inner.operator.get()
    }

    pub fn operator_account_id(&self) -> Option<AccountId> {
        self.operator().map(|operator| operator.account_id())
    }

    /// Replace the mirror endpoint list. Consensus nodes are unaffected.
    pub fn set_mirror_network<I, S>(&self, endpoints: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        let mut registry = self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *registry = registry.clone().with_mirror_endpoints(endpoints)?;
        debug!("Mirror network set to {:?}", registry.mirror_endpoints());
        Ok(())
    }

    pub fn mirror_network(&self) -> Vec<String> {
        self.registry().mirror_endpoints().to_vec()
    }

    /// Consensus nodes in selection order.
    pub fn network(&self) -> Vec<NodeEndpoint> {
        self.registry().nodes().to_vec()
    }

    /// `None` for sessions built from an explicit node list.
    pub fn network_name(&self) -> Option<NetworkName> {
        self.registry().network_name()
    }

    pub fn options(&self) -> &ExecutionOptions {
        self.inner.dispatcher.options()
    }

    /// Node health as tracked by this session.
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Execute `request` with retries and failover; see
    /// [`RequestDispatcher::execute`] for the error kinds.
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        let _in_flight = self.inner.in_flight.read().await;
        // Subscribe before the open check so a concurrent close is never missed.
        let mut shutdown = self.inner.shutdown.subscribe();
        self.ensure_open()?;

        let request_id = self.inner.request_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        let result = tokio::select! {
            result = self.inner.dispatcher.execute(request) => result,
            _ = shutdown.changed() => {
                debug!("Request {} cancelled by close", request_id);
                Err(ClientError::SessionClosed)
            }
        };
        self.record(request_id, started, &result);
        result
    }

    /// Check that the node with `account_id` answers. Any verdict from the node
    /// counts as an answer, a rejection included.
    ///
    /// # Errors
    /// - [`ClientError::NodeUnreachable`]: no answer, or not in the network
    /// - [`ClientError::NoOperatorConfigured`]: nothing to sign the ping with
    /// - [`ClientError::SessionClosed`]
    pub async fn ping(&self, account_id: AccountId) -> Result<()> {
        let request = Request::new(Vec::new())
            .with_node_account_id(account_id)
            .with_max_attempts(1);

        match self.execute(&request).await {
            Ok(_) | Err(ClientError::Rejected { .. }) => {
                debug!("Node {} answered ping", account_id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Ping every node of the network in order. Unreachable nodes are marked
    /// unhealthy along the way; the first error is returned once all nodes
    /// have been pinged.
    pub async fn ping_all(&self) -> Result<()> {
        let accounts = self.registry().node_accounts();
        let mut first_error = None;

        for account_id in accounts {
            if let Err(err) = self.ping(account_id).await {
                warn!("Ping to node {} failed: {}", account_id, err);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&self, request_id: u64, started: Instant, result: &Result<Response>) {
        let metrics = self
            .inner
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(metrics) = metrics else {
            return;
        };
        let mut metrics = metrics.lock().unwrap_or_else(PoisonError::into_inner);

        match result {
            Ok(response) => metrics.record_request(
                request_id,
                started.elapsed(),
                true,
                None,
                Some(response.node_account_id.to_string()),
            ),
            Err(err) => metrics.record_request(
                request_id,
                started.elapsed(),
                false,
                Some(err.kind().to_string()),
                None,
            ),
        }
    }

    /// Close the session. Waits up to `close_timeout` for requests in flight,
    /// then closes every channel. Safe to call more than once.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!("Client already closed");
            return;
        }

        let close_timeout = self.options().close_timeout();
        info!("Closing client, waiting up to {:?} for requests in flight", close_timeout);

        if tokio::time::timeout(close_timeout, self.inner.in_flight.write())
            .await
            .is_err()
        {
            warn!(
                "Requests still in flight after {:?}; cancelling them",
                close_timeout
            );
            self.inner.shutdown.send_replace(true);
            let _drained = self.inner.in_flight.write().await;
        }

        self.inner.pool.close_all().await;
        info!("Client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
