//! # Identifiers
//!
//! Account ids identify both payers (the operator) and consensus nodes.
//! Transaction ids are generated once per `execute` call and reused for every
//! retry so nodes can recognise duplicates.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Ledger account identifier in `shard.realm.num` form (e.g. `0.0.3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId {
    pub shard: u64,
    pub realm: u64,
    pub num: u64,
}

impl AccountId {
    pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }

    /// Shorthand for `0.0.num`, the form every built-in network uses.
    pub const fn from_num(num: u64) -> Self {
        Self::new(0, 0, num)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for AccountId {
    type Err = ClientError;

    /// Accepts `shard.realm.num` or a bare `num`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidAccountId(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();

        let parse = |part: &str| part.parse::<u64>().map_err(|_| invalid());

        match parts.as_slice() {
            [num] => Ok(Self::from_num(parse(num)?)),
            [shard, realm, num] => Ok(Self::new(parse(shard)?, parse(realm)?, parse(num)?)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for AccountId {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.to_string()
    }
}

/// Identifies a single request across all of its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Account paying for the request
    pub account_id: AccountId,
    /// Valid-start timestamp in nanoseconds since the Unix epoch
    pub valid_start_nanos: i64,
}

impl TransactionId {
    /// New id for `payer`, stamped with the current time.
    pub fn generate(payer: AccountId) -> Self {
        Self {
            account_id: payer,
            valid_start_nanos: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.valid_start_nanos.div_euclid(1_000_000_000);
        let nanos = self.valid_start_nanos.rem_euclid(1_000_000_000);
        write!(f, "{}@{}.{:09}", self.account_id, secs, nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_and_short_forms() {
        assert_eq!("0.0.3".parse::<AccountId>().unwrap(), AccountId::from_num(3));
        assert_eq!("1.2.1001".parse::<AccountId>().unwrap(), AccountId::new(1, 2, 1001));
        assert_eq!("7".parse::<AccountId>().unwrap(), AccountId::from_num(7));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "0.0", "0.0.x", "a.b.c", "0.0.3.4", "-1"] {
            assert!(
                matches!(bad.parse::<AccountId>(), Err(ClientError::InvalidAccountId(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_account_id_serializes_as_string() {
        let json = serde_json::to_string(&AccountId::from_num(3)).unwrap();
        assert_eq!(json, "\"0.0.3\"");
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AccountId::from_num(3));
    }

    #[test]
    fn test_transaction_id_display() {
        let id = TransactionId {
            account_id: AccountId::from_num(2),
            valid_start_nanos: 1_700_000_000_000_000_042,
        };
        assert_eq!(id.to_string(), "0.0.2@1700000000.000000042");
    }
}
