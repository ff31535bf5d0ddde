//! End-to-end registration scenarios.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use idreg_core::{ClaimState, DocumentKind, Label, SaltedHasher, TransitionKind};
use idreg_registrar::{
    CancelSignal, ConfirmationWatcher, FundingLedger, IdentityRegistrar, MockPlatformConfig,
    Outcome, PollResult, RegistrarError, RejectedReason, RetryPolicy, UsernameRegistrar,
    WatchOutcome,
};
use idreg_scenarios::{fast_config, funded, init_tracing, Scenario};

#[tokio::test(start_paused = true)]
async fn test_identity_and_two_usernames_complete_once() {
    init_tracing();
    let scenario = Scenario::standard(5).unwrap();

    let mut flow = scenario.start("scenario-a", &["alice", "alice2"]).unwrap();
    let outcome = flow.outcome().await.unwrap();

    assert!(outcome.identity.is_completed());
    let usernames = outcome.usernames.unwrap();
    assert_eq!(usernames.completed().unwrap(), vec!["alice", "alice2"]);
    assert_eq!(scenario.mock.submitted_of("identity_create").len(), 1);
    assert_eq!(scenario.mock.submitted_of("preorder").len(), 1);
    assert_eq!(scenario.mock.submitted_of("domain_register").len(), 1);

    // Asking again reports both as complete without touching the platform.
    let calls = scenario.mock.submit_calls();
    let again = flow.register_usernames(["alice", "alice2"]).await.unwrap().unwrap();
    assert_eq!(again.completed().unwrap(), vec!["alice", "alice2"]);
    assert_eq!(scenario.mock.submit_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_domains_time_out_the_batch() {
    init_tracing();
    let scenario = Scenario::new(
        MockPlatformConfig {
            domain_visible_after: None,
            ..MockPlatformConfig::default()
        },
        fast_config(5),
    )
    .unwrap();

    let (keys, tx) = funded("scenario-b", 50_000);
    let record = scenario.coordinator.ledger().observe(&tx).unwrap();
    let signing = keys.signing.clone();
    let mut identity =
        IdentityRegistrar::new(record, keys, scenario.platform(), fast_config(5)).unwrap();
    assert!(identity.run().await.unwrap().is_completed());

    let mut usernames = UsernameRegistrar::new(
        identity.identity_id(),
        signing,
        scenario.platform(),
        fast_config(5),
    )
    .unwrap();
    let policy = RetryPolicy::linear(5, Duration::from_millis(100));
    let outcome = usernames.register(["alice", "alice2"], &policy).await.unwrap().unwrap();

    match outcome {
        Outcome::TimedOut(labels) => assert_eq!(labels, vec!["alice", "alice2"]),
        other => panic!("expected timeout, got {}", other.name()),
    }
    for label in ["alice", "alice2"] {
        let claim = usernames.claim(label).unwrap();
        assert_eq!(claim.state(), ClaimState::TimedOut);
        assert_eq!(
            claim.history(),
            &[
                ClaimState::Unregistered,
                ClaimState::PreorderSubmitted,
                ClaimState::PreorderConfirmed,
                ClaimState::DomainSubmitted,
                ClaimState::TimedOut,
            ]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_reports_username_timeout() {
    let scenario = Scenario::new(
        MockPlatformConfig {
            domain_visible_after: None,
            ..MockPlatformConfig::instant()
        },
        fast_config(5),
    )
    .unwrap();

    let mut flow = scenario.start("scenario-b2", &["alice", "alice2"]).unwrap();
    let outcome = flow.outcome().await.unwrap();
    assert!(outcome.identity.is_completed());
    assert!(matches!(
        outcome.usernames,
        Some(Outcome::TimedOut(ref labels)) if labels == &["alice", "alice2"]
    ));
    assert_eq!(scenario.coordinator.stats().timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn test_watcher_stops_after_budget() {
    let polls = Arc::new(AtomicU32::new(0));
    let watcher = ConfirmationWatcher::new("never", CancelSignal::new());
    let policy = RetryPolicy::linear(3, Duration::from_millis(200));

    let started = tokio::time::Instant::now();
    let counted = polls.clone();
    let outcome = watcher
        .watch(&policy, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { PollResult::<()>::Pending }
        })
        .await;

    assert!(matches!(outcome, Some(WatchOutcome::TimedOut { attempts: 3 })));
    assert_eq!(polls.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(400));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_ledger_records_are_bit_identical() {
    let ledger = FundingLedger::new();
    let (_keys, tx) = funded("ledger", 75_000);

    let first = ledger.observe(&tx).unwrap();
    let second = ledger.observe(&tx).unwrap();
    assert_eq!(
        bincode::serialize(&first).unwrap(),
        bincode::serialize(&second).unwrap()
    );
    assert_eq!(first.derived_identity_id(), second.derived_identity_id());
}

#[tokio::test(start_paused = true)]
async fn test_revealed_salts_match_preorder_commitments() {
    let scenario = Scenario::new(MockPlatformConfig::instant(), fast_config(3)).unwrap();
    let mut flow = scenario.start("commitments", &["alice", "Bob-1"]).unwrap();
    assert!(flow.outcome().await.unwrap().is_completed());

    let preorder = scenario.mock.submitted_of("preorder").pop().unwrap();
    let domains = scenario.mock.submitted_of("domain_register").pop().unwrap();
    let TransitionKind::Preorder {
        salted_domain_hashes,
        ..
    } = preorder.kind()
    else {
        panic!("not a preorder");
    };
    let TransitionKind::DomainRegister { owner, domains } = domains.kind() else {
        panic!("not a domain registration");
    };

    assert_eq!(domains.len(), 2);
    for entry in domains {
        let label = Label::parse_with_parent(&entry.normalized_label, &entry.parent_domain).unwrap();
        let commitment = SaltedHasher::hash_label(&entry.salt, &label, owner);
        assert!(salted_domain_hashes.contains(&commitment));
    }
    assert_eq!(domains[1].label, "Bob-1");
    assert_eq!(domains[1].normalized_label, "bob-1");
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_flow_resumes_where_it_stopped() {
    let scenario = Scenario::new(
        MockPlatformConfig {
            preorder_visible_after: None,
            ..MockPlatformConfig::instant()
        },
        fast_config(30),
    )
    .unwrap();

    let mut flow = scenario.start("cancel", &["alice"]).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    flow.cancel();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let queries = scenario.mock.query_calls();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(scenario.mock.query_calls(), queries);

    scenario.mock.release_documents(DocumentKind::Preorder);
    let resumed = flow.resume().await.unwrap().unwrap();
    assert!(resumed.is_completed());
    assert_eq!(scenario.mock.submitted_of("preorder").len(), 1);
    assert!(flow.outcome().await.unwrap().is_completed());
}

#[tokio::test(start_paused = true)]
async fn test_structural_rejection_is_not_retried() {
    let scenario = Scenario::new(MockPlatformConfig::instant(), fast_config(3)).unwrap();
    scenario
        .mock
        .reject_next([RejectedReason::Invalid("identity already exists".into())]);

    let mut flow = scenario.start("rejected", &["alice"]).unwrap();
    let outcome = flow.outcome().await.unwrap();
    assert!(matches!(
        outcome.identity,
        Outcome::Failed(RegistrarError::SubmissionRejected(_))
    ));
    assert!(outcome.usernames.is_none());
    assert_eq!(scenario.mock.submit_calls(), 1);
    assert_eq!(scenario.coordinator.stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_invisible() {
    let scenario = Scenario::new(MockPlatformConfig::instant(), fast_config(3)).unwrap();
    scenario.mock.reject_next([
        RejectedReason::Transient("connection reset".into()),
        RejectedReason::Transient("connection reset".into()),
    ]);

    let mut flow = scenario.start("transient", &["alice"]).unwrap();
    let outcome = flow.outcome().await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(scenario.mock.submitted().len(), 3);
    assert_eq!(scenario.mock.submit_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_identities_proceed_independently() {
    let scenario = Scenario::new(
        MockPlatformConfig {
            latency: Duration::from_millis(50),
            ..MockPlatformConfig::default()
        },
        fast_config(5),
    )
    .unwrap();

    let outcomes = scenario
        .run_all(&[
            ("par-1", &["alice"][..]),
            ("par-2", &["bob", "bobby"][..]),
            ("par-3", &["carol"][..]),
        ])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    for outcome in outcomes {
        assert!(outcome.unwrap().is_completed());
    }
    assert_eq!(scenario.mock.submitted_of("identity_create").len(), 3);
    assert_eq!(scenario.coordinator.stats().completed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_name_held_by_another_identity_fails() {
    let scenario = Scenario::new(MockPlatformConfig::instant(), fast_config(3)).unwrap();

    let mut first = scenario.start("owner-1", &["alice"]).unwrap();
    assert!(first.outcome().await.unwrap().is_completed());

    let mut second = scenario.start("owner-2", &["alice"]).unwrap();
    let outcome = second.outcome().await.unwrap();
    assert!(outcome.identity.is_completed());
    assert!(matches!(outcome.usernames, Some(Outcome::Failed(_))));
}
