//! Funding transactions and the credit-lock records derived from them.
//!
//! A funding transaction burns value into a credit balance through a
//! credit-burn output. The outpoint of that output is the identity's seed:
//! the identity id is the hash of its serialized form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{hash, Hash, PublicKey};
use crate::error::{Error, Result};
use crate::identity::IdentityId;

/// Transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub Hash);

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", &self.0.to_hex()[..16])
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a single transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction holding the output.
    pub txid: TxId,
    /// Output position.
    pub index: u32,
}

impl OutPoint {
    /// Serialized size in bytes.
    pub const SIZE: usize = 36;

    /// Create an outpoint.
    pub fn new(txid: TxId, index: u32) -> Self {
        Self { txid, index }
    }

    /// `txid || index (u32 little-endian)`.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..32].copy_from_slice(self.txid.0.as_bytes());
        out[32..].copy_from_slice(&self.index.to_le_bytes());
        out
    }

    /// Inverse of [`OutPoint::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(Error::invalid_format(format!(
                "outpoint must be {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&bytes[..32]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&bytes[32..]);
        Ok(Self::new(TxId(Hash::from_bytes(txid)), u32::from_le_bytes(index)))
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// What a transaction output does with its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Ordinary payment.
    Payment {
        /// Destination script hash.
        recipient: Hash,
    },
    /// Value burned into platform credit, spendable only by `burn_public_key`.
    CreditBurn {
        /// Key that signs the identity-create transition.
        burn_public_key: PublicKey,
    },
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in the smallest unit.
    pub value: u64,
    /// Output kind.
    pub kind: OutputKind,
}

/// A transaction as observed from the funding source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id.
    pub txid: TxId,
    /// Outputs in order.
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// A transaction with no outputs.
    pub fn new(txid: TxId) -> Self {
        Self {
            txid,
            outputs: Vec::new(),
        }
    }

    /// Append a payment output.
    pub fn with_payment(mut self, recipient: Hash, value: u64) -> Self {
        self.outputs.push(TxOutput {
            value,
            kind: OutputKind::Payment { recipient },
        });
        self
    }

    /// Append a credit-burn output.
    pub fn with_credit_burn(mut self, burn_public_key: PublicKey, value: u64) -> Self {
        self.outputs.push(TxOutput {
            value,
            kind: OutputKind::CreditBurn { burn_public_key },
        });
        self
    }

    /// First credit-burn output, with its index.
    pub fn credit_burn_output(&self) -> Option<(u32, u64, PublicKey)> {
        self.outputs
            .iter()
            .enumerate()
            .find_map(|(index, output)| match output.kind {
                OutputKind::CreditBurn { burn_public_key } => {
                    Some((index as u32, output.value, burn_public_key))
                }
                OutputKind::Payment { .. } => None,
            })
    }
}

/// Derive the identity id for a locked outpoint.
pub fn identity_id_for(outpoint: &OutPoint) -> IdentityId {
    IdentityId(hash(&outpoint.to_bytes()))
}

/// The credit lock a funding transaction established.
///
/// Read-only once built; the identity id is a pure function of the
/// locked outpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRecord {
    transaction_id: TxId,
    locked_outpoint: OutPoint,
    credit_amount: u64,
    burn_public_key: PublicKey,
    derived_identity_id: IdentityId,
}

impl FundingRecord {
    /// Build the record for a credit-lock transaction.
    pub fn from_transaction(tx: &Transaction) -> Result<Self> {
        let (index, value, burn_public_key) = tx.credit_burn_output().ok_or_else(|| {
            Error::not_a_funding_transaction(format!("{} has no credit-burn output", tx.txid))
        })?;
        if value == 0 {
            return Err(Error::not_a_funding_transaction(format!(
                "{} burns zero credit",
                tx.txid
            )));
        }

        let locked_outpoint = OutPoint::new(tx.txid, index);
        Ok(Self {
            transaction_id: tx.txid,
            locked_outpoint,
            credit_amount: value,
            burn_public_key,
            derived_identity_id: identity_id_for(&locked_outpoint),
        })
    }

    /// Funding transaction id.
    pub fn transaction_id(&self) -> TxId {
        self.transaction_id
    }

    /// The credit-burn outpoint.
    pub fn locked_outpoint(&self) -> OutPoint {
        self.locked_outpoint
    }

    /// Credit locked.
    pub fn credit_amount(&self) -> u64 {
        self.credit_amount
    }

    /// Key allowed to spend the lock into an identity.
    pub fn burn_public_key(&self) -> PublicKey {
        self.burn_public_key
    }

    /// The identity this lock funds.
    pub fn derived_identity_id(&self) -> IdentityId {
        self.derived_identity_id
    }
}
