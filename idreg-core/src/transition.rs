//! Signed state transitions submitted to the platform.
//!
//! Three transitions drive registration:
//! - identity create: spends a credit lock into a new identity, signed by
//!   the lock's burn key
//! - preorder: publishes salted domain hashes only
//! - domain register: reveals `(label, salt)` for preordered names
//!
//! Preorder and domain transitions batch every name of one request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{hash, Hash, PublicKey, SecretKey, Sig};
use crate::error::{Error, Result};
use crate::funding::FundingRecord;
use crate::identity::IdentityId;
use crate::salted::Salt;

/// Which owner record a domain entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainRecord {
    /// The identity's primary name.
    UniqueIdentity(IdentityId),
    /// An additional name pointing at the identity.
    Alias(IdentityId),
}

impl DomainRecord {
    /// The identity this record points at.
    pub fn identity_id(&self) -> IdentityId {
        match self {
            DomainRecord::UniqueIdentity(id) | DomainRecord::Alias(id) => *id,
        }
    }

    /// Check if this is the primary name record.
    pub fn is_unique(&self) -> bool {
        matches!(self, DomainRecord::UniqueIdentity(_))
    }
}

/// One name revealed by a domain registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEntry {
    /// Label as requested.
    pub label: String,
    /// Lowercased label.
    pub normalized_label: String,
    /// Parent domain.
    pub parent_domain: String,
    /// Salt used in the preorder.
    pub salt: Salt,
    /// Owner record.
    pub record: DomainRecord,
}

/// Payload of a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Create an identity from a credit lock.
    IdentityCreate {
        /// Identity being created.
        identity_id: IdentityId,
        /// The credit lock being spent.
        funding: FundingRecord,
        /// Keys bound to the new identity.
        public_keys: Vec<PublicKey>,
    },
    /// Commit to names without revealing them.
    Preorder {
        /// Preordering identity.
        owner: IdentityId,
        /// One commitment per name.
        salted_domain_hashes: Vec<Hash>,
    },
    /// Reveal preordered names.
    DomainRegister {
        /// Registering identity.
        owner: IdentityId,
        /// One entry per name.
        domains: Vec<DomainEntry>,
    },
}

impl TransitionKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::IdentityCreate { .. } => "identity_create",
            TransitionKind::Preorder { .. } => "preorder",
            TransitionKind::DomainRegister { .. } => "domain_register",
        }
    }

    /// The identity the transition acts for.
    pub fn identity_id(&self) -> IdentityId {
        match self {
            TransitionKind::IdentityCreate { identity_id, .. } => *identity_id,
            TransitionKind::Preorder { owner, .. } | TransitionKind::DomainRegister { owner, .. } => {
                *owner
            }
        }
    }
}

/// A signed state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    kind: TransitionKind,
    created_at: DateTime<Utc>,
    signer: PublicKey,
    signature: Sig,
}

#[derive(Serialize)]
struct SignableTransition<'a> {
    kind: &'a TransitionKind,
    created_at: DateTime<Utc>,
    signer: &'a PublicKey,
}

impl StateTransition {
    /// Sign `kind` with `key`.
    pub fn sign(kind: TransitionKind, key: &SecretKey) -> Result<Self> {
        let signer = key.public_key();
        let created_at = Utc::now();
        let bytes = bincode::serialize(&SignableTransition {
            kind: &kind,
            created_at,
            signer: &signer,
        })?;
        let signature = key.sign(&bytes);
        Ok(Self {
            kind,
            created_at,
            signer,
            signature,
        })
    }

    /// Bytes covered by the signature.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&SignableTransition {
            kind: &self.kind,
            created_at: self.created_at,
            signer: &self.signer,
        })?)
    }

    /// Transition id.
    pub fn id(&self) -> Result<Hash> {
        Ok(hash(&self.canonical_bytes()?))
    }

    /// Payload.
    pub fn kind(&self) -> &TransitionKind {
        &self.kind
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Signing key.
    pub fn signer(&self) -> &PublicKey {
        &self.signer
    }

    /// Signature over [`StateTransition::canonical_bytes`].
    pub fn signature(&self) -> &Sig {
        &self.signature
    }

    /// Check the signature.
    pub fn verify(&self) -> Result<()> {
        self.signer.verify(&self.canonical_bytes()?, &self.signature)
    }

    /// Check the signature and that `expected` produced it.
    pub fn verify_signer(&self, expected: &PublicKey) -> Result<()> {
        if &self.signer != expected {
            return Err(Error::invalid_key(format!(
                "{} signed by {:?}, expected {:?}",
                self.kind.name(),
                self.signer,
                expected
            )));
        }
        self.verify()
    }
}
