//! Platform documents produced by accepted transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{hash_all, Hash};
use crate::identity::IdentityId;
use crate::salted::Salt;
use crate::transition::{DomainRecord, StateTransition, TransitionKind};

/// Document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// A salted preorder commitment.
    Preorder,
    /// A revealed domain name.
    Domain,
}

/// Document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentData {
    /// Preorder commitment.
    Preorder {
        /// The committed hash.
        salted_domain_hash: Hash,
    },
    /// Registered name.
    Domain {
        /// Label as requested.
        label: String,
        /// Lowercased label.
        normalized_label: String,
        /// Parent domain.
        parent_domain: String,
        /// Revealed salt.
        salt: Salt,
        /// Owner record.
        record: DomainRecord,
    },
}

/// A document as returned by the query service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document id.
    pub id: Hash,
    /// Owning identity.
    pub owner: IdentityId,
    /// Body.
    pub data: DocumentData,
    /// When the platform stored it.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Document type.
    pub fn kind(&self) -> DocumentKind {
        match self.data {
            DocumentData::Preorder { .. } => DocumentKind::Preorder,
            DocumentData::Domain { .. } => DocumentKind::Domain,
        }
    }

    /// Commitment, for preorder documents.
    pub fn salted_domain_hash(&self) -> Option<Hash> {
        match &self.data {
            DocumentData::Preorder { salted_domain_hash } => Some(*salted_domain_hash),
            DocumentData::Domain { .. } => None,
        }
    }

    /// `(normalized_label, parent_domain)`, for domain documents.
    pub fn domain_name(&self) -> Option<(&str, &str)> {
        match &self.data {
            DocumentData::Domain {
                normalized_label,
                parent_domain,
                ..
            } => Some((normalized_label.as_str(), parent_domain.as_str())),
            DocumentData::Preorder { .. } => None,
        }
    }

    /// Documents the platform stores once `transition` is accepted.
    ///
    /// Identity creation produces none.
    pub fn from_transition(transition: &StateTransition) -> Vec<Document> {
        let created_at = transition.created_at();
        match transition.kind() {
            TransitionKind::IdentityCreate { .. } => Vec::new(),
            TransitionKind::Preorder {
                owner,
                salted_domain_hashes,
            } => salted_domain_hashes
                .iter()
                .map(|h| Document {
                    id: hash_all(&[b"preorder".as_slice(), h.as_bytes().as_slice()]),
                    owner: *owner,
                    data: DocumentData::Preorder {
                        salted_domain_hash: *h,
                    },
                    created_at,
                })
                .collect(),
            TransitionKind::DomainRegister { owner, domains } => domains
                .iter()
                .map(|d| Document {
                    id: hash_all(&[
                        b"domain".as_slice(),
                        d.parent_domain.as_bytes(),
                        d.normalized_label.as_bytes(),
                    ]),
                    owner: *owner,
                    data: DocumentData::Domain {
                        label: d.label.clone(),
                        normalized_label: d.normalized_label.clone(),
                        parent_domain: d.parent_domain.clone(),
                        salt: d.salt,
                        record: d.record,
                    },
                    created_at,
                })
                .collect(),
        }
    }
}

/// Filters understood by the query service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentQuery {
    /// Preorders whose commitment is one of these.
    SaltedHashIn(Vec<Hash>),
    /// Domains with one of these normalized labels under `parent_domain`.
    LabelIn {
        /// Parent domain.
        parent_domain: String,
        /// Normalized labels.
        labels: Vec<String>,
    },
    /// Everything owned by an identity.
    OwnedBy(IdentityId),
}

impl DocumentQuery {
    /// Check whether `doc` satisfies the filter.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            DocumentQuery::SaltedHashIn(hashes) => doc
                .salted_domain_hash()
                .map(|h| hashes.contains(&h))
                .unwrap_or(false),
            DocumentQuery::LabelIn {
                parent_domain,
                labels,
            } => doc
                .domain_name()
                .map(|(label, parent)| parent == parent_domain && labels.iter().any(|l| l == label))
                .unwrap_or(false),
            DocumentQuery::OwnedBy(owner) => &doc.owner == owner,
        }
    }
}
