//! Salted commitments for username preorders.
//!
//! A preorder publishes only `H(salt, name, owner)`. The salt and name are
//! revealed later in the domain registration, so nobody watching the
//! preorder can front-run the name.
//!
//! Construction (version 1):
//!
//! ```text
//! derive_key("idreg preorder salted domain hash v1",
//!     0x01 || salt[32] || u32_le(len(full_name)) || full_name || identity_id[32])
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{derive, random_bytes, Hash};
use crate::error::Result;
use crate::identity::IdentityId;
use crate::label::{Label, DEFAULT_PARENT_DOMAIN};

/// Key-derivation context for the v1 construction.
pub const SALTED_HASH_CONTEXT_V1: &str = "idreg preorder salted domain hash v1";

/// Version byte mixed into the v1 construction.
pub const SALTED_HASH_VERSION: u8 = 1;

/// 32 random bytes bound into a commitment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Salt(pub [u8; 32]);

impl Salt {
    /// Draw a fresh salt from the OS CSPRNG.
    pub fn random() -> Self {
        Self(random_bytes())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", &hex::encode(&self.0[..8]))
    }
}

/// Produces and checks preorder commitments.
#[derive(Debug, Clone)]
pub struct SaltedHasher {
    parent_domain: String,
}

impl Default for SaltedHasher {
    fn default() -> Self {
        Self::new(DEFAULT_PARENT_DOMAIN)
    }
}

impl SaltedHasher {
    /// A hasher resolving bare labels under `parent_domain`.
    pub fn new(parent_domain: impl Into<String>) -> Self {
        Self {
            parent_domain: parent_domain.into(),
        }
    }

    /// Parent domain for labels that don't name one.
    pub fn parent_domain(&self) -> &str {
        &self.parent_domain
    }

    /// Validate and normalize a requested label.
    pub fn label(&self, label: &str) -> Result<Label> {
        Label::parse_with_parent(label, &self.parent_domain)
    }

    /// Commit to `label` for `identity_id` with a fresh salt.
    pub fn commit(&self, label: &str, identity_id: &IdentityId) -> Result<(Salt, Hash)> {
        let label = self.label(label)?;
        Ok(Self::commit_label(&label, identity_id))
    }

    /// Commit to an already validated label with a fresh salt.
    pub fn commit_label(label: &Label, identity_id: &IdentityId) -> (Salt, Hash) {
        let salt = Salt::random();
        let hash = Self::hash_label(&salt, label, identity_id);
        (salt, hash)
    }

    /// Recompute a commitment for a known salt.
    pub fn hash_with_salt(&self, salt: &Salt, label: &str, identity_id: &IdentityId) -> Result<Hash> {
        let label = self.label(label)?;
        Ok(Self::hash_label(salt, &label, identity_id))
    }

    /// Check a commitment. Invalid labels never verify.
    pub fn verify(&self, salt: &Salt, label: &str, identity_id: &IdentityId, hash: &Hash) -> bool {
        self.hash_with_salt(salt, label, identity_id)
            .map(|h| &h == hash)
            .unwrap_or(false)
    }

    /// The v1 construction over a normalized label.
    pub fn hash_label(salt: &Salt, label: &Label, identity_id: &IdentityId) -> Hash {
        let full_name = label.full_name();
        let mut input = Vec::with_capacity(1 + 32 + 4 + full_name.len() + 32);
        input.push(SALTED_HASH_VERSION);
        input.extend_from_slice(salt.as_bytes());
        input.extend_from_slice(&(full_name.len() as u32).to_le_bytes());
        input.extend_from_slice(full_name.as_bytes());
        input.extend_from_slice(identity_id.as_bytes());
        derive(SALTED_HASH_CONTEXT_V1, &input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;
    use crate::error::ErrorCode;

    fn owner() -> IdentityId {
        IdentityId(hash(b"owner"))
    }

    #[test]
    fn test_commit_verifies() {
        let hasher = SaltedHasher::default();
        let (salt, h) = hasher.commit("alice", &owner()).unwrap();
        assert!(hasher.verify(&salt, "alice", &owner(), &h));
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let hasher = SaltedHasher::default();
        let (salt, h) = hasher.commit("Alice", &owner()).unwrap();
        assert!(hasher.verify(&salt, "ALICE", &owner(), &h));
        assert!(hasher.verify(&salt, "alice.dash", &owner(), &h));
    }

    #[test]
    fn test_hash_binds_every_input() {
        let hasher = SaltedHasher::default();
        let (salt, h) = hasher.commit("alice", &owner()).unwrap();

        assert!(!hasher.verify(&salt, "alice2", &owner(), &h));
        assert!(!hasher.verify(&salt, "alice", &IdentityId(hash(b"other")), &h));
        assert!(!hasher.verify(&Salt::random(), "alice", &owner(), &h));
        assert!(!hasher.verify(&salt, "alice.other", &owner(), &h));
    }

    #[test]
    fn test_commits_never_repeat() {
        let hasher = SaltedHasher::default();
        let (s1, h1) = hasher.commit("alice", &owner()).unwrap();
        let (s2, h2) = hasher.commit("alice", &owner()).unwrap();
        assert_ne!(s1, s2);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_hash_with_salt_is_deterministic() {
        let hasher = SaltedHasher::default();
        let salt = Salt([7u8; 32]);
        let a = hasher.hash_with_salt(&salt, "bob", &owner()).unwrap();
        let b = hasher.hash_with_salt(&salt, "BOB", &owner()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parent_domain_changes_hash() {
        let salt = Salt([1u8; 32]);
        let a = SaltedHasher::new("dash").hash_with_salt(&salt, "bob", &owner()).unwrap();
        let b = SaltedHasher::new("test").hash_with_salt(&salt, "bob", &owner()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_label_rejected_before_hashing() {
        let hasher = SaltedHasher::default();
        let err = hasher.commit("a!", &owner()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidLabel);
        assert!(!hasher.verify(&Salt([0u8; 32]), "a!", &owner(), &Hash::ZERO));
    }
}
