//! Property-based tests for core types.
//!
//! Uses proptest to verify invariants hold for arbitrary inputs.

use proptest::prelude::*;

use crate::claim::{ClaimState, UsernameClaim};
use crate::crypto::{hash, Hash, SecretKey};
use crate::funding::{identity_id_for, FundingRecord, OutPoint, Transaction, TxId};
use crate::identity::IdentityId;
use crate::label::Label;
use crate::salted::{Salt, SaltedHasher};

// ============================================================================
// Arbitrary Implementations
// ============================================================================

fn arb_bytes32() -> impl Strategy<Value = [u8; 32]> {
    prop::array::uniform32(any::<u8>())
}

fn arb_hash() -> impl Strategy<Value = Hash> {
    arb_bytes32().prop_map(Hash::from_bytes)
}

fn arb_identity_id() -> impl Strategy<Value = IdentityId> {
    arb_hash().prop_map(IdentityId)
}

/// Valid labels: 3..=20 chars of [a-z0-9], optionally with an inner '-'.
fn arb_label() -> impl Strategy<Value = String> {
    "[a-z0-9]{3,10}(-[a-z0-9]{1,9})?"
}

fn arb_claim_state() -> impl Strategy<Value = ClaimState> {
    prop_oneof![
        Just(ClaimState::Unregistered),
        Just(ClaimState::PreorderSubmitted),
        Just(ClaimState::PreorderConfirmed),
        Just(ClaimState::DomainSubmitted),
        Just(ClaimState::Registered),
        Just(ClaimState::TimedOut),
    ]
}

fn rank(state: ClaimState) -> u8 {
    match state {
        ClaimState::Unregistered => 0,
        ClaimState::PreorderSubmitted => 1,
        ClaimState::PreorderConfirmed => 2,
        ClaimState::DomainSubmitted => 3,
        ClaimState::Registered => 4,
        ClaimState::TimedOut => 5,
    }
}

// ============================================================================
// Salted commitments
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_commit_verifies(label in arb_label(), id in arb_identity_id()) {
        let hasher = SaltedHasher::default();
        let (salt, h) = hasher.commit(&label, &id).unwrap();
        prop_assert!(hasher.verify(&salt, &label, &id, &h));
        prop_assert!(hasher.verify(&salt, &label.to_uppercase(), &id, &h));
    }

    #[test]
    fn prop_salt_is_bound(label in arb_label(), id in arb_identity_id(), a in arb_bytes32(), b in arb_bytes32()) {
        prop_assume!(a != b);
        let hasher = SaltedHasher::default();
        let ha = hasher.hash_with_salt(&Salt(a), &label, &id).unwrap();
        let hb = hasher.hash_with_salt(&Salt(b), &label, &id).unwrap();
        prop_assert_ne!(ha, hb);
    }

    #[test]
    fn prop_owner_is_bound(label in arb_label(), a in arb_identity_id(), b in arb_identity_id()) {
        prop_assume!(a != b);
        let hasher = SaltedHasher::default();
        let salt = Salt([5u8; 32]);
        prop_assert_ne!(
            hasher.hash_with_salt(&salt, &label, &a).unwrap(),
            hasher.hash_with_salt(&salt, &label, &b).unwrap()
        );
    }
}

// ============================================================================
// Funding records
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_identity_id_is_deterministic(txid in arb_hash(), payments in 0usize..4, value in 1u64..u64::MAX) {
        let burn = SecretKey::generate().public_key();
        let mut tx = Transaction::new(TxId(txid));
        for i in 0..payments {
            tx = tx.with_payment(hash(&[i as u8]), 1);
        }
        let tx = tx.with_credit_burn(burn, value);

        let a = FundingRecord::from_transaction(&tx).unwrap();
        let b = FundingRecord::from_transaction(&tx).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(
            a.derived_identity_id(),
            identity_id_for(&OutPoint::new(TxId(txid), payments as u32))
        );
    }

    #[test]
    fn prop_outpoint_bytes_roundtrip(txid in arb_hash(), index in any::<u32>()) {
        let op = OutPoint::new(TxId(txid), index);
        prop_assert_eq!(OutPoint::from_bytes(&op.to_bytes()).unwrap(), op);
    }
}

// ============================================================================
// Claim lifecycle
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Whatever sequence of moves is attempted, the accepted history stays
    /// monotonic and never reaches DomainSubmitted without PreorderConfirmed.
    #[test]
    fn prop_claim_history_is_monotonic(moves in prop::collection::vec(arb_claim_state(), 0..24)) {
        let mut claim = UsernameClaim::new(Label::parse("alice").unwrap(), IdentityId(hash(b"id")));
        for next in moves {
            let before = claim.state();
            match claim.advance(next) {
                Ok(()) => prop_assert!(before.can_advance_to(next)),
                Err(_) => prop_assert_eq!(claim.state(), before),
            }
        }

        let history = claim.history();
        for pair in history.windows(2) {
            prop_assert!(rank(pair[0]) < rank(pair[1]));
        }
        if let Some(pos) = history.iter().position(|s| *s == ClaimState::DomainSubmitted) {
            prop_assert!(history[..pos].contains(&ClaimState::PreorderConfirmed));
        }
        if let Some(pos) = history.iter().position(|s| s.is_terminal()) {
            prop_assert_eq!(pos, history.len() - 1);
        }
    }
}
