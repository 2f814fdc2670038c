use crate::client::operator::Operator;
use crate::common::ids::{AccountId, TransactionId};

/// An opaque payload to be signed and submitted to one node.
///
/// # Example
/// ```rust,ignore
/// let request = Request::new(b"transfer".to_vec())
///     .with_node_account_id(AccountId::from_num(3))
///     .with_max_attempts(3);
/// let response = client.execute(&request).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    payload: Vec<u8>,
    node_account_id: Option<AccountId>,
    operator: Option<Operator>,
    max_attempts: Option<u32>,
}

impl Request {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            node_account_id: None,
            operator: None,
            max_attempts: None,
        }
    }

    /// Submit only to this node instead of choosing one.
    pub fn with_node_account_id(mut self, account_id: AccountId) -> Self {
        self.node_account_id = Some(account_id);
        self
    }

    /// Pay and sign with `operator` instead of the session's operator.
    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Lower (or raise) the session's attempt limit for this request.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn node_account_id(&self) -> Option<AccountId> {
        self.node_account_id
    }

    pub fn operator(&self) -> Option<&Operator> {
        self.operator.as_ref()
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// A node's successful answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The node that served the request
    pub node_account_id: AccountId,
    /// The endpoint the reply came from
    pub endpoint: String,
    pub transaction_id: TransactionId,
    pub payload: Vec<u8>,
}
