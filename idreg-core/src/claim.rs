//! Username claims and their lifecycle.
//!
//! ```text
//! Unregistered -> PreorderSubmitted -> PreorderConfirmed -> DomainSubmitted -> Registered
//!       \                 \                    \                   \
//!        +-----------------+--------------------+-------------------+--> TimedOut
//! ```
//!
//! Claims only move forward one step at a time. `Registered` and `TimedOut`
//! are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::error::{Error, Result};
use crate::identity::IdentityId;
use crate::label::Label;
use crate::salted::{Salt, SaltedHasher};

/// Lifecycle state of a username claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    /// Salt drawn, nothing submitted.
    Unregistered,
    /// Preorder transition accepted for broadcast.
    PreorderSubmitted,
    /// Preorder document visible on the platform.
    PreorderConfirmed,
    /// Domain transition accepted for broadcast.
    DomainSubmitted,
    /// Domain document visible and owned by the identity.
    Registered,
    /// Retry budget exhausted.
    TimedOut,
}

impl ClaimState {
    /// Check if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, ClaimState::Registered | ClaimState::TimedOut)
    }

    /// The state reached on success from this one.
    pub fn successor(self) -> Option<ClaimState> {
        match self {
            ClaimState::Unregistered => Some(ClaimState::PreorderSubmitted),
            ClaimState::PreorderSubmitted => Some(ClaimState::PreorderConfirmed),
            ClaimState::PreorderConfirmed => Some(ClaimState::DomainSubmitted),
            ClaimState::DomainSubmitted => Some(ClaimState::Registered),
            ClaimState::Registered | ClaimState::TimedOut => None,
        }
    }

    /// Check whether `next` is a legal move from here.
    pub fn can_advance_to(self, next: ClaimState) -> bool {
        if next == ClaimState::TimedOut {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClaimState::Unregistered => "unregistered",
            ClaimState::PreorderSubmitted => "preorder_submitted",
            ClaimState::PreorderConfirmed => "preorder_confirmed",
            ClaimState::DomainSubmitted => "domain_submitted",
            ClaimState::Registered => "registered",
            ClaimState::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// One identity's claim on one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameClaim {
    label: Label,
    identity_id: IdentityId,
    salt: Salt,
    salted_hash: Hash,
    state: ClaimState,
    history: Vec<ClaimState>,
    updated_at: DateTime<Utc>,
}

impl UsernameClaim {
    /// A fresh claim with a new salt.
    pub fn new(label: Label, identity_id: IdentityId) -> Self {
        let (salt, salted_hash) = SaltedHasher::commit_label(&label, &identity_id);
        Self::with_salt(label, identity_id, salt, salted_hash, ClaimState::Unregistered)
    }

    /// A claim for a name already registered on the platform.
    pub fn registered(label: Label, identity_id: IdentityId, salt: Salt) -> Self {
        let salted_hash = SaltedHasher::hash_label(&salt, &label, &identity_id);
        Self::with_salt(label, identity_id, salt, salted_hash, ClaimState::Registered)
    }

    fn with_salt(
        label: Label,
        identity_id: IdentityId,
        salt: Salt,
        salted_hash: Hash,
        state: ClaimState,
    ) -> Self {
        Self {
            label,
            identity_id,
            salt,
            salted_hash,
            state,
            history: vec![state],
            updated_at: Utc::now(),
        }
    }

    /// The claimed label.
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Claiming identity.
    pub fn identity_id(&self) -> IdentityId {
        self.identity_id
    }

    /// Salt bound into the preorder.
    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Preorder commitment.
    pub fn salted_hash(&self) -> Hash {
        self.salted_hash
    }

    /// Current state.
    pub fn state(&self) -> ClaimState {
        self.state
    }

    /// Every state this claim has held, oldest first.
    pub fn history(&self) -> &[ClaimState] {
        &self.history
    }

    /// Last transition time.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move to `next`, rejecting anything but the successor or a timeout.
    pub fn advance(&mut self, next: ClaimState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::illegal_transition(self.state, next));
        }
        self.state = next;
        self.history.push(next);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark as timed out. No-op on terminal claims.
    pub fn time_out(&mut self) {
        if !self.state.is_terminal() {
            self.state = ClaimState::TimedOut;
            self.history.push(ClaimState::TimedOut);
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;

    fn claim() -> UsernameClaim {
        UsernameClaim::new(Label::parse("alice").unwrap(), IdentityId(hash(b"id")))
    }

    #[test]
    fn test_happy_path() {
        let mut c = claim();
        for next in [
            ClaimState::PreorderSubmitted,
            ClaimState::PreorderConfirmed,
            ClaimState::DomainSubmitted,
            ClaimState::Registered,
        ] {
            c.advance(next).unwrap();
        }
        assert_eq!(c.state(), ClaimState::Registered);
        assert_eq!(c.history().len(), 5);
    }

    #[test]
    fn test_cannot_skip_preorder_confirmation() {
        let mut c = claim();
        c.advance(ClaimState::PreorderSubmitted).unwrap();
        let err = c.advance(ClaimState::DomainSubmitted).unwrap_err();
        assert!(err.to_string().contains("preorder_submitted"));
        assert_eq!(c.state(), ClaimState::PreorderSubmitted);
    }

    #[test]
    fn test_no_backward_moves() {
        let mut c = claim();
        c.advance(ClaimState::PreorderSubmitted).unwrap();
        c.advance(ClaimState::PreorderConfirmed).unwrap();
        assert!(c.advance(ClaimState::PreorderSubmitted).is_err());
        assert!(c.advance(ClaimState::Unregistered).is_err());
    }

    #[test]
    fn test_timed_out_is_absorbing() {
        let mut c = claim();
        c.advance(ClaimState::TimedOut).unwrap();
        assert!(c.advance(ClaimState::PreorderSubmitted).is_err());
        assert!(c.advance(ClaimState::TimedOut).is_err());
        c.time_out();
        assert_eq!(c.history(), &[ClaimState::Unregistered, ClaimState::TimedOut]);
    }

    #[test]
    fn test_registered_cannot_time_out() {
        let label = Label::parse("alice").unwrap();
        let mut c = UsernameClaim::registered(label, IdentityId(hash(b"id")), Salt([3u8; 32]));
        c.time_out();
        assert_eq!(c.state(), ClaimState::Registered);
        assert!(c.advance(ClaimState::TimedOut).is_err());
    }

    #[test]
    fn test_salted_hash_matches_hasher() {
        let c = claim();
        let hasher = SaltedHasher::default();
        assert!(hasher.verify(c.salt(), "alice", &c.identity_id(), &c.salted_hash()));
    }
}
