//! Local record of observed funding transactions.
//!
//! The ledger turns credit-lock transactions into [`FundingRecord`]s and
//! remembers them. It holds no network state: confirmation depth comes from
//! a [`ConfirmationSource`](crate::platform::ConfirmationSource).

use std::collections::HashMap;

use idreg_core::{FundingRecord, IdentityId, Transaction, TxId};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::errors::Result;

/// Ledger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Records held.
    pub records: usize,
    /// `observe` calls that created a record.
    pub created: u64,
    /// `observe` calls answered from an existing record.
    pub repeated: u64,
}

/// Funding records by transaction id.
#[derive(Debug, Default)]
pub struct FundingLedger {
    records: RwLock<HashMap<TxId, FundingRecord>>,
    by_identity: RwLock<HashMap<IdentityId, TxId>>,
    counters: RwLock<(u64, u64)>,
}

impl FundingLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a funding transaction.
    ///
    /// Observing the same transaction again returns the stored record.
    /// Transactions without a credit-burn output are rejected with
    /// `NotAFundingTransaction`.
    pub fn observe(&self, tx: &Transaction) -> Result<FundingRecord> {
        if let Some(existing) = self.records.read().get(&tx.txid) {
            self.counters.write().1 += 1;
            return Ok(existing.clone());
        }

        let record = FundingRecord::from_transaction(tx)?;

        let mut records = self.records.write();
        // Another caller may have raced us between the read and write locks.
        if let Some(existing) = records.get(&tx.txid) {
            self.counters.write().1 += 1;
            return Ok(existing.clone());
        }
        records.insert(tx.txid, record.clone());
        self.by_identity
            .write()
            .insert(record.derived_identity_id(), tx.txid);
        self.counters.write().0 += 1;

        info!(
            txid = %tx.txid,
            identity = %record.derived_identity_id(),
            credit = record.credit_amount(),
            "Funding transaction observed"
        );
        Ok(record)
    }

    /// Record for a transaction.
    pub fn get(&self, txid: &TxId) -> Option<FundingRecord> {
        self.records.read().get(txid).cloned()
    }

    /// Record that funds an identity.
    pub fn by_identity(&self, identity_id: &IdentityId) -> Option<FundingRecord> {
        let txid = *self.by_identity.read().get(identity_id)?;
        self.get(&txid)
    }

    /// Check whether `depth` satisfies `required_depth`.
    pub fn is_locked(depth: u64, required_depth: u64) -> bool {
        depth >= required_depth
    }

    /// Drop a record from the local cache.
    pub fn evict(&self, txid: &TxId) -> Option<FundingRecord> {
        let record = self.records.write().remove(txid)?;
        self.by_identity
            .write()
            .remove(&record.derived_identity_id());
        debug!(txid = %txid, "Funding record evicted");
        Some(record)
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Counters.
    pub fn stats(&self) -> LedgerStats {
        let (created, repeated) = *self.counters.read();
        LedgerStats {
            records: self.len(),
            created,
            repeated,
        }
    }
}
