//! In-memory [`Connector`] for unit tests. Each endpoint can be told to refuse
//! connections or to answer sends from a script.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::messages::{NodeReply, SignedEnvelope, Status};
use crate::network::registry::NodeEndpoint;
use crate::network::transport::{Connector, Transport, TransportError};

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Reply(Status),
    Fail(TransportError),
    Hang,
}

#[derive(Default)]
struct Shared {
    connects: Mutex<HashMap<String, usize>>,
    refused: Mutex<HashSet<String>>,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sent: Mutex<Vec<(String, SignedEnvelope)>>,
    closes: AtomicUsize,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    shared: Arc<Shared>,
    connect_delay: Duration,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub(crate) fn refuse(&self, address: &str) {
        self.shared.refused.lock().unwrap().insert(address.to_string());
    }

    pub(crate) fn allow(&self, address: &str) {
        self.shared.refused.lock().unwrap().remove(address);
    }

    /// Queue replies for `address`; once drained every send answers `Ok`.
    pub(crate) fn script(&self, address: &str, steps: Vec<Scripted>) {
        self.shared
            .scripts
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .extend(steps);
    }

    pub(crate) fn connects(&self, address: &str) -> usize {
        self.shared
            .connects
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Endpoints that received an envelope, in send order.
    pub(crate) fn sent_to(&self) -> Vec<String> {
        self.shared
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(address, _)| address.clone())
            .collect()
    }

    pub(crate) fn sent(&self) -> Vec<SignedEnvelope> {
        self.shared
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    pub(crate) fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<Arc<dyn Transport>, TransportError> {
        *self
            .shared
            .connects
            .lock()
            .unwrap()
            .entry(endpoint.address.clone())
            .or_default() += 1;

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        if self.shared.refused.lock().unwrap().contains(&endpoint.address) {
            return Err(TransportError::Io("connection refused".to_string()));
        }

        Ok(Arc::new(ScriptedTransport {
            address: endpoint.address.clone(),
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedTransport {
    address: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, envelope: SignedEnvelope) -> Result<NodeReply, TransportError> {
        self.shared
            .sent
            .lock()
            .unwrap()
            .push((self.address.clone(), envelope.clone()));

        let step = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .get_mut(&self.address)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Scripted::Reply(Status::Ok));

        match step {
            Scripted::Reply(status) => Ok(NodeReply {
                transaction_id: envelope.body.transaction_id,
                node_account_id: envelope.body.node_account_id,
                status,
                payload: envelope.body.payload,
            }),
            Scripted::Fail(err) => Err(err),
            Scripted::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
    }
}
