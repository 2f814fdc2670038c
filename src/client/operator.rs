//! The session's default signing identity.
//!
//! An [`Operator`] pairs the account that pays for requests with the key that
//! signs them. [`OperatorContext`] holds the current operator and may be read
//! and replaced from any task; a request that starts after `set` returns sees
//! the new operator, a request already in flight keeps the one it started with.

use std::sync::{Arc, PoisonError, RwLock};

use log::info;

use crate::common::ids::AccountId;
use crate::common::messages::{EnvelopeBody, SignedEnvelope};
use crate::keys::{PrivateKey, PublicKey};

/// Paying account plus signing key.
#[derive(Clone, Debug)]
pub struct Operator {
    account_id: AccountId,
    private_key: PrivateKey,
    public_key: PublicKey,
}

impl Operator {
    pub fn new(account_id: AccountId, private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            account_id,
            private_key,
            public_key,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Sign `body` with the operator key.
    pub fn sign(&self, body: EnvelopeBody) -> SignedEnvelope {
        let signature = self.private_key.sign(&body.signing_bytes());
        SignedEnvelope {
            body,
            signer_public_key: self.public_key.to_string(),
            signature: hex::encode(signature),
        }
    }
}

#[derive(Debug, Default)]
pub struct OperatorContext {
    current: RwLock<Option<Arc<Operator>>>,
}

impl OperatorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the operator. The public key is derived from `private_key`.
    pub fn set(&self, account_id: AccountId, private_key: PrivateKey) {
        self.set_operator(Operator::new(account_id, private_key));
    }

    pub fn set_operator(&self, operator: Operator) {
        info!(
            "Operator set to {} (public key {})",
            operator.account_id, operator.public_key
        );
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(Arc::new(operator));
    }

    /// Snapshot of the current operator.
    pub fn get(&self) -> Option<Arc<Operator>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_configured(&self) -> bool {
        self.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::TransactionId;

    #[test]
    fn test_unset_context_is_empty() {
        let context = OperatorContext::new();
        assert!(!context.is_configured());
        assert!(context.get().is_none());
    }

    #[test]
    fn test_set_replaces_previous_operator() {
        let context = OperatorContext::new();
        let first = PrivateKey::generate();
        let second = PrivateKey::generate();

        context.set(AccountId::from_num(2), first.clone());
        let snapshot = context.get().unwrap();
        context.set(AccountId::from_num(1001), second.clone());

        let current = context.get().unwrap();
        assert_eq!(current.account_id(), AccountId::from_num(1001));
        assert_eq!(current.public_key(), second.public_key());
        // Earlier snapshots are unaffected.
        assert_eq!(snapshot.account_id(), AccountId::from_num(2));
        assert_eq!(snapshot.public_key(), first.public_key());
    }

    #[test]
    fn test_signature_verifies_against_public_key() {
        let operator = Operator::new(AccountId::from_num(2), PrivateKey::generate());
        let body = EnvelopeBody {
            transaction_id: TransactionId::generate(operator.account_id()),
            node_account_id: AccountId::from_num(3),
            payload: b"transfer".to_vec(),
        };

        let envelope = operator.sign(body);
        let public_key: PublicKey = envelope.signer_public_key.parse().unwrap();
        let signature = hex::decode(&envelope.signature).unwrap();

        assert_eq!(public_key, operator.public_key());
        assert!(public_key.verify(&envelope.body.signing_bytes(), &signature));
        assert!(!public_key.verify(b"something else", &signature));
    }
}
