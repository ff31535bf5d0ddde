//! Identities and their identifiers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, PublicKey};
use crate::error::{Error, Result};
use crate::funding::FundingRecord;

/// Identifier of an identity, derived from the outpoint that funded it.
///
/// Displays as base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId(pub Hash);

impl IdentityId {
    /// Wrap a hash.
    pub fn from_hash(hash: Hash) -> Self {
        Self(hash)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Base58 encoding.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.as_bytes()).into_string()
    }

    /// Parse a base58 string.
    pub fn from_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s).into_vec()?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            Error::invalid_format(format!("identity id must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(Hash::from_bytes(arr)))
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", self.to_base58())
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl FromStr for IdentityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base58(s)
    }
}

/// Whether the platform has accepted the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    /// Locally known, not yet registered.
    Pending,
    /// Confirmed on the platform.
    Registered,
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityState::Pending => write!(f, "pending"),
            IdentityState::Registered => write!(f, "registered"),
        }
    }
}

/// An identity underwritten by a funding record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    identity_id: IdentityId,
    public_keys: BTreeSet<PublicKey>,
    state: IdentityState,
    balance_origin: FundingRecord,
    registered_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// A pending identity for `record` holding `public_keys`.
    pub fn new(record: FundingRecord, public_keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            identity_id: record.derived_identity_id(),
            public_keys: public_keys.into_iter().collect(),
            state: IdentityState::Pending,
            balance_origin: record,
            registered_at: None,
        }
    }

    /// Identifier (always the funding record's derived id).
    pub fn id(&self) -> IdentityId {
        self.identity_id
    }

    /// Keys bound to the identity.
    pub fn public_keys(&self) -> &BTreeSet<PublicKey> {
        &self.public_keys
    }

    /// Current state.
    pub fn state(&self) -> IdentityState {
        self.state
    }

    /// The funding record the balance came from.
    pub fn balance_origin(&self) -> &FundingRecord {
        &self.balance_origin
    }

    /// When the identity became registered.
    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.registered_at
    }

    /// Check whether the identity is registered.
    pub fn is_registered(&self) -> bool {
        self.state == IdentityState::Registered
    }

    /// Mark as registered. Returns `false` if it already was.
    pub fn mark_registered(&mut self) -> bool {
        if self.is_registered() {
            return false;
        }
        self.state = IdentityState::Registered;
        self.registered_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash, SecretKey};
    use crate::funding::{Transaction, TxId};

    fn record() -> FundingRecord {
        let burn = SecretKey::generate().public_key();
        let tx = Transaction::new(TxId(hash(b"tx")))
            .with_payment(hash(b"change"), 500)
            .with_credit_burn(burn, 100_000);
        FundingRecord::from_transaction(&tx).unwrap()
    }

    #[test]
    fn test_identity_id_base58_roundtrip() {
        let id = IdentityId(hash(b"identity"));
        let s = id.to_string();
        let parsed: IdentityId = s.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_identity_id_rejects_short_input() {
        assert!(IdentityId::from_base58("3mJr7A").is_err());
        assert!(IdentityId::from_base58("not-base58-0OIl").is_err());
    }

    #[test]
    fn test_identity_takes_record_id() {
        let record = record();
        let key = SecretKey::generate().public_key();
        let identity = Identity::new(record.clone(), [key]);
        assert_eq!(identity.id(), record.derived_identity_id());
        assert_eq!(identity.state(), IdentityState::Pending);
        assert!(identity.public_keys().contains(&key));
    }

    #[test]
    fn test_mark_registered_once() {
        let mut identity = Identity::new(record(), []);
        assert!(identity.mark_registered());
        let at = identity.registered_at();
        assert!(at.is_some());
        assert!(!identity.mark_registered());
        assert_eq!(identity.registered_at(), at);
    }
}
