//! idreg Core - data model for identity and username registration.
//!
//! This crate provides the types every registration step shares:
//!
//! - [`crypto`] - Hashing (BLAKE3) and signatures (Ed25519)
//! - [`funding`] - Funding transactions and credit-lock records
//! - [`identity`] - Identities and their base58 ids
//! - [`label`] - Username label normalization
//! - [`salted`] - Salted preorder commitments
//! - [`claim`] - The username claim state machine
//! - [`transition`] - Signed state transitions
//! - [`document`] - Platform documents and query filters
//!
//! # Example
//!
//! ```rust
//! use idreg_core::{
//!     crypto::{hash, SecretKey},
//!     funding::{FundingRecord, Transaction, TxId},
//!     salted::SaltedHasher,
//! };
//!
//! let burn = SecretKey::generate();
//! let tx = Transaction::new(TxId(hash(b"funding")))
//!     .with_credit_burn(burn.public_key(), 50_000);
//! let record = FundingRecord::from_transaction(&tx).unwrap();
//!
//! let hasher = SaltedHasher::default();
//! let (salt, commitment) = hasher.commit("alice", &record.derived_identity_id()).unwrap();
//! assert!(hasher.verify(&salt, "alice", &record.derived_identity_id(), &commitment));
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod claim;
pub mod crypto;
pub mod document;
pub mod error;
pub mod funding;
pub mod identity;
pub mod label;
pub mod salted;
pub mod transition;

#[cfg(test)]
mod proptest;

// Re-exports for convenience
pub use claim::{ClaimState, UsernameClaim};
pub use crypto::{hash, hash_all, Hash, PublicKey, SecretKey, Sig};
pub use document::{Document, DocumentData, DocumentKind, DocumentQuery};
pub use error::{Error, ErrorCode, Result};
pub use funding::{FundingRecord, OutPoint, OutputKind, Transaction, TxId, TxOutput};
pub use identity::{Identity, IdentityId, IdentityState};
pub use label::{Label, DEFAULT_PARENT_DOMAIN};
pub use salted::{Salt, SaltedHasher};
pub use transition::{DomainEntry, DomainRecord, StateTransition, TransitionKind};
