//! Username registration.
//!
//! A batch of labels moves through two confirmed platform steps:
//!
//! 1. one preorder transition publishing a salted hash per label, watched
//!    until every hash resolves;
//! 2. one domain transition revealing `(label, salt)` per label, watched
//!    until every name resolves as owned by the identity.
//!
//! Batches are all-or-nothing: one missing document holds back the whole
//! batch and a timeout times out every claim in it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use idreg_core::{
    ClaimState, DocumentKind, DocumentQuery, DomainEntry, DomainRecord, Hash, IdentityId, Label,
    SaltedHasher, SecretKey, StateTransition, TransitionKind, UsernameClaim,
};
use tracing::{debug, info, warn};

use crate::config::{RegistrarConfig, RetryPolicy};
use crate::errors::Result;
use crate::outcome::{Outcome, UsernameOutcome};
use crate::platform::Platform;
use crate::submit::{submit_with_retry, Submission};
use crate::watcher::{CancelSignal, ConfirmationWatcher, PollResult, WatchOutcome};

/// Registers usernames for one identity.
pub struct UsernameRegistrar {
    identity_id: IdentityId,
    signing_key: SecretKey,
    hasher: SaltedHasher,
    /// Keyed by full domain name.
    claims: BTreeMap<String, UsernameClaim>,
    primary: Option<String>,
    pending_primary: Option<String>,
    platform: Platform,
    config: RegistrarConfig,
    cancel: CancelSignal,
}

/// Where a step left the batch.
enum Step {
    Continue,
    Stop(UsernameOutcome),
}

impl UsernameRegistrar {
    /// A registrar for `identity_id`, signing with `signing_key`.
    ///
    /// Fails with `Config` if `config` does not validate.
    pub fn new(
        identity_id: IdentityId,
        signing_key: SecretKey,
        platform: Platform,
        config: RegistrarConfig,
    ) -> Result<Self> {
        config.validate()?;
        let hasher = SaltedHasher::new(config.parent_domain.clone());
        Ok(Self {
            identity_id,
            signing_key,
            hasher,
            claims: BTreeMap::new(),
            primary: None,
            pending_primary: None,
            platform,
            config,
            cancel: CancelSignal::new(),
        })
    }

    /// Share a cancellation signal.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// The cancellation signal.
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Owning identity.
    pub fn identity_id(&self) -> IdentityId {
        self.identity_id
    }

    /// Claim for a requested label.
    pub fn claim(&self, label: &str) -> Option<&UsernameClaim> {
        let label = self.hasher.label(label).ok()?;
        self.claims.get(&label.full_name())
    }

    /// State of a requested label's claim.
    pub fn state_of(&self, label: &str) -> Option<ClaimState> {
        self.claim(label).map(UsernameClaim::state)
    }

    /// Every claim, by full domain name.
    pub fn claims(&self) -> impl Iterator<Item = &UsernameClaim> {
        self.claims.values()
    }

    /// Full domain name of the unique-identity record, once registered.
    pub fn primary(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    /// Register using the configured preorder and domain policies.
    pub async fn register_with_config<I, S>(&mut self, labels: I) -> Result<Option<UsernameOutcome>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let preorder = self.config.preorder_policy;
        let domain = self.config.domain_policy;
        self.run_batch(labels, &preorder, &domain).await
    }

    /// Register `labels`, watching both steps under `policy`.
    ///
    /// Fails with `InvalidLabel` or `Config` before touching any claim if
    /// a label or the policy is invalid. Returns `Ok(None)` if cancelled; claims keep their state
    /// and a later call with the same labels resumes them.
    pub async fn register<I, S>(&mut self, labels: I, policy: &RetryPolicy) -> Result<Option<UsernameOutcome>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_batch(labels, policy, policy).await
    }

    /// Adopt domains the platform already lists for this identity.
    ///
    /// Returns the full names of newly adopted claims.
    pub async fn recover(&mut self) -> Result<Vec<String>> {
        let docs = self.platform.query.domains_owned_by(&self.identity_id).await?;
        let mut adopted = Vec::new();

        for doc in docs {
            let idreg_core::DocumentData::Domain {
                normalized_label,
                parent_domain,
                salt,
                record,
                ..
            } = &doc.data
            else {
                continue;
            };
            let label = match Label::parse_with_parent(normalized_label, parent_domain) {
                Ok(label) => label,
                Err(e) => {
                    warn!(identity = %self.identity_id, error = %e, "Skipping malformed domain document");
                    continue;
                }
            };
            let name = label.full_name();
            if record.is_unique() {
                self.primary = Some(name.clone());
            }
            let known = self
                .claims
                .get(&name)
                .map(|c| c.state() == ClaimState::Registered)
                .unwrap_or(false);
            if !known {
                self.claims.insert(
                    name.clone(),
                    UsernameClaim::registered(label, self.identity_id, *salt),
                );
                adopted.push(name);
            }
        }

        if !adopted.is_empty() {
            info!(identity = %self.identity_id, names = ?adopted, "Recovered registered usernames");
        }
        Ok(adopted)
    }

    async fn run_batch<I, S>(
        &mut self,
        labels: I,
        preorder_policy: &RetryPolicy,
        domain_policy: &RetryPolicy,
    ) -> Result<Option<UsernameOutcome>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        preorder_policy.validate()?;
        domain_policy.validate()?;
        let requested = self.validate(labels)?;
        let reported: Vec<String> = requested.iter().map(|l| self.report_name(l)).collect();

        // A timed-out name may have landed after its watch gave up.
        let resalting = requested.iter().any(|l| {
            self.claims.get(&l.full_name()).map(UsernameClaim::state) == Some(ClaimState::TimedOut)
        });
        if resalting {
            if let Err(e) = self.recover().await {
                warn!(identity = %self.identity_id, error = %e, "Domain lookup before retry failed");
            }
        }

        let mut batch = Vec::new();
        for label in &requested {
            let name = label.full_name();
            match self.claims.get(&name).map(UsernameClaim::state) {
                Some(ClaimState::Registered) => {
                    debug!(identity = %self.identity_id, name = %name, "Already registered, skipping");
                }
                Some(ClaimState::TimedOut) | None => {
                    self.claims
                        .insert(name.clone(), UsernameClaim::new(label.clone(), self.identity_id));
                    batch.push(name);
                }
                Some(_) => batch.push(name),
            }
        }

        if batch.is_empty() {
            return Ok(Some(Outcome::Completed(reported)));
        }
        info!(identity = %self.identity_id, names = ?batch, "Registering usernames");

        let steps = [
            ClaimState::Unregistered,
            ClaimState::PreorderSubmitted,
            ClaimState::PreorderConfirmed,
            ClaimState::DomainSubmitted,
        ];
        for stage in steps {
            let step = match stage {
                ClaimState::Unregistered => self.submit_preorder(&batch).await,
                ClaimState::PreorderSubmitted => self.await_preorders(&batch, preorder_policy).await,
                ClaimState::PreorderConfirmed => self.submit_domains(&batch).await,
                _ => self.await_domains(&batch, domain_policy).await,
            };
            match step {
                None => return Ok(None),
                Some(Step::Stop(outcome)) => return Ok(Some(outcome)),
                Some(Step::Continue) => {}
            }
        }

        info!(identity = %self.identity_id, names = ?batch, "Usernames registered");
        Ok(Some(Outcome::Completed(reported)))
    }

    /// Parse and dedupe, rejecting the batch on the first invalid label.
    fn validate<I, S>(&self, labels: I) -> Result<Vec<Label>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for raw in labels {
            let label = self.hasher.label(raw.as_ref())?;
            if seen.insert(label.full_name()) {
                out.push(label);
            }
        }
        Ok(out)
    }

    fn in_state<'a>(&self, batch: &'a [String], state: ClaimState) -> Vec<&'a String> {
        batch
            .iter()
            .filter(|name| self.claims.get(*name).map(UsernameClaim::state) == Some(state))
            .collect()
    }

    fn advance(&mut self, names: &[&String], next: ClaimState) -> Result<()> {
        for name in names {
            if let Some(claim) = self.claims.get_mut(*name) {
                claim.advance(next)?;
            }
        }
        Ok(())
    }

    /// Time out every unfinished claim of the batch and report them.
    fn time_out(&mut self, batch: &[String]) -> UsernameOutcome {
        let mut incomplete = Vec::new();
        for name in batch {
            if let Some(claim) = self.claims.get_mut(name) {
                if claim.state() != ClaimState::Registered {
                    claim.time_out();
                    incomplete.push(claim.label().clone());
                }
            }
        }
        let incomplete: Vec<String> = incomplete.iter().map(|l| self.report_name(l)).collect();
        self.pending_primary = None;
        info!(identity = %self.identity_id, labels = ?incomplete, "Username batch timed out");
        Outcome::TimedOut(incomplete)
    }

    /// Bare label under the configured parent, full name otherwise.
    fn report_name(&self, label: &Label) -> String {
        if label.parent().eq_ignore_ascii_case(self.hasher.parent_domain()) {
            label.normalized().to_string()
        } else {
            label.full_name()
        }
    }

    fn sign(&self, kind: TransitionKind) -> std::result::Result<StateTransition, UsernameOutcome> {
        StateTransition::sign(kind, &self.signing_key).map_err(|e| Outcome::Failed(e.into()))
    }

    async fn broadcast(&mut self, transition: &StateTransition, batch: &[String]) -> Option<Step> {
        let policy = self.config.submission_policy;
        let broadcaster = self.platform.broadcaster.clone();
        match submit_with_retry(broadcaster.as_ref(), transition, &policy, &self.cancel).await {
            Submission::Accepted(_) => Some(Step::Continue),
            Submission::Rejected(e) => {
                warn!(identity = %self.identity_id, kind = transition.kind().name(), error = %e, "Username transition rejected");
                Some(Step::Stop(Outcome::Failed(e)))
            }
            Submission::Exhausted { attempts, last } => {
                debug!(identity = %self.identity_id, attempts, %last, "Username submission exhausted");
                Some(Step::Stop(self.time_out(batch)))
            }
            Submission::Cancelled => None,
        }
    }

    async fn submit_preorder(&mut self, batch: &[String]) -> Option<Step> {
        let fresh = self.in_state(batch, ClaimState::Unregistered);
        if fresh.is_empty() {
            return Some(Step::Continue);
        }

        let hashes: Vec<Hash> = fresh
            .iter()
            .filter_map(|name| self.claims.get(*name).map(UsernameClaim::salted_hash))
            .collect();
        let kind = TransitionKind::Preorder {
            owner: self.identity_id,
            salted_domain_hashes: hashes,
        };
        let transition = match self.sign(kind) {
            Ok(t) => t,
            Err(outcome) => return Some(Step::Stop(outcome)),
        };

        let step = self.broadcast(&transition, batch).await?;
        if let Step::Continue = step {
            if let Err(e) = self.advance(&fresh, ClaimState::PreorderSubmitted) {
                return Some(Step::Stop(Outcome::Failed(e)));
            }
            info!(identity = %self.identity_id, count = fresh.len(), "Preorder submitted");
            if self.cancel.is_cancelled() {
                return None;
            }
        }
        Some(step)
    }

    async fn await_preorders(&mut self, batch: &[String], policy: &RetryPolicy) -> Option<Step> {
        let waiting = self.in_state(batch, ClaimState::PreorderSubmitted);
        if waiting.is_empty() {
            return Some(Step::Continue);
        }

        let hashes: Vec<Hash> = waiting
            .iter()
            .filter_map(|name| self.claims.get(*name).map(UsernameClaim::salted_hash))
            .collect();
        let owner = self.identity_id;
        let query = self.platform.query.clone();
        let watcher = ConfirmationWatcher::new("preorder", self.cancel.clone());

        let outcome = watcher
            .watch(policy, |attempt| {
                let query = query.clone();
                let filter = DocumentQuery::SaltedHashIn(hashes.clone());
                let expected = hashes.clone();
                async move {
                    match query.resolve_documents(DocumentKind::Preorder, &filter).await {
                        Ok(docs) => {
                            let found: HashSet<Hash> = docs
                                .iter()
                                .filter(|d| d.owner == owner)
                                .filter_map(|d| d.salted_domain_hash())
                                .collect();
                            if expected.iter().all(|h| found.contains(h)) {
                                PollResult::Ready(())
                            } else {
                                PollResult::Pending
                            }
                        }
                        Err(e) => {
                            warn!(identity = %owner, attempt, error = %e, "Preorder query failed");
                            PollResult::Pending
                        }
                    }
                }
            })
            .await?;

        match outcome {
            WatchOutcome::Completed(()) => {
                if let Err(e) = self.advance(&waiting, ClaimState::PreorderConfirmed) {
                    return Some(Step::Stop(Outcome::Failed(e)));
                }
                info!(identity = %self.identity_id, count = waiting.len(), "Preorders confirmed");
                Some(Step::Continue)
            }
            WatchOutcome::TimedOut { attempts } => {
                debug!(identity = %self.identity_id, attempts, "Preorder confirmation timed out");
                Some(Step::Stop(self.time_out(batch)))
            }
        }
    }

    async fn submit_domains(&mut self, batch: &[String]) -> Option<Step> {
        let confirmed = self.in_state(batch, ClaimState::PreorderConfirmed);
        if confirmed.is_empty() {
            return Some(Step::Continue);
        }

        let mut unique_name = None;
        let mut domains = Vec::with_capacity(confirmed.len());
        for name in &confirmed {
            let Some(claim) = self.claims.get(*name) else {
                continue;
            };
            let record = if self.primary.is_none() && unique_name.is_none() {
                unique_name = Some((*name).clone());
                DomainRecord::UniqueIdentity(self.identity_id)
            } else {
                DomainRecord::Alias(self.identity_id)
            };
            let label = claim.label();
            domains.push(DomainEntry {
                label: label.display().to_string(),
                normalized_label: label.normalized().to_string(),
                parent_domain: label.parent().to_string(),
                salt: *claim.salt(),
                record,
            });
        }

        let kind = TransitionKind::DomainRegister {
            owner: self.identity_id,
            domains,
        };
        let transition = match self.sign(kind) {
            Ok(t) => t,
            Err(outcome) => return Some(Step::Stop(outcome)),
        };

        let step = self.broadcast(&transition, batch).await?;
        if let Step::Continue = step {
            if let Err(e) = self.advance(&confirmed, ClaimState::DomainSubmitted) {
                return Some(Step::Stop(Outcome::Failed(e)));
            }
            if unique_name.is_some() {
                self.pending_primary = unique_name;
            }
            info!(identity = %self.identity_id, count = confirmed.len(), "Domains submitted");
            if self.cancel.is_cancelled() {
                return None;
            }
        }
        Some(step)
    }

    async fn await_domains(&mut self, batch: &[String], policy: &RetryPolicy) -> Option<Step> {
        let waiting = self.in_state(batch, ClaimState::DomainSubmitted);
        if waiting.is_empty() {
            return Some(Step::Continue);
        }

        let expected: Vec<(String, String)> = waiting
            .iter()
            .filter_map(|name| self.claims.get(*name))
            .map(|c| (c.label().normalized().to_string(), c.label().parent().to_string()))
            .collect();
        let owner = self.identity_id;
        let query = self.platform.query.clone();
        let watcher = ConfirmationWatcher::new("domain", self.cancel.clone());

        let outcome = watcher
            .watch(policy, |attempt| {
                let query = query.clone();
                let expected = expected.clone();
                async move {
                    match query.domains_owned_by(&owner).await {
                        Ok(docs) => {
                            let all_present = expected.iter().all(|(label, parent)| {
                                docs.iter()
                                    .any(|d| d.domain_name() == Some((label.as_str(), parent.as_str())))
                            });
                            if all_present {
                                PollResult::Ready(())
                            } else {
                                PollResult::Pending
                            }
                        }
                        Err(e) => {
                            warn!(identity = %owner, attempt, error = %e, "Domain query failed");
                            PollResult::Pending
                        }
                    }
                }
            })
            .await?;

        match outcome {
            WatchOutcome::Completed(()) => {
                if let Err(e) = self.advance(&waiting, ClaimState::Registered) {
                    return Some(Step::Stop(Outcome::Failed(e)));
                }
                if self.primary.is_none() {
                    self.primary = self.pending_primary.take();
                }
                Some(Step::Continue)
            }
            WatchOutcome::TimedOut { attempts } => {
                debug!(identity = %self.identity_id, attempts, "Domain confirmation timed out");
                Some(Step::Stop(self.time_out(batch)))
            }
        }
    }
}

impl fmt::Debug for UsernameRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsernameRegistrar")
            .field("identity", &self.identity_id)
            .field("claims", &self.claims.len())
            .field("primary", &self.primary)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPlatform, MockPlatformConfig};
    use crate::errors::RegistrarError;
    use crate::platform::RejectedReason;
    use idreg_core::{hash, Document, DocumentData, ErrorCode};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::linear(attempts, Duration::from_millis(10))
    }

    fn config() -> RegistrarConfig {
        RegistrarConfig::new().with_submission_policy(policy(3))
    }

    fn setup(mock: MockPlatform) -> (Arc<MockPlatform>, UsernameRegistrar) {
        let mock = Arc::new(mock);
        let registrar = UsernameRegistrar::new(
            IdentityId(hash(b"username-owner")),
            SecretKey::generate(),
            Platform::from_shared(mock.clone()),
            config(),
        )
        .unwrap();
        (mock, registrar)
    }

    fn labels(outcome: UsernameOutcome) -> Vec<String> {
        match outcome {
            Outcome::Completed(l) | Outcome::TimedOut(l) => l,
            Outcome::Failed(e) => panic!("unexpected failure: {e}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_registers_every_label() {
        let (mock, mut registrar) = setup(MockPlatform::new());

        let outcome = registrar.register(["alice", "alice2"], &policy(5)).await.unwrap().unwrap();
        assert!(outcome.is_completed());
        assert_eq!(labels(outcome), vec!["alice", "alice2"]);

        assert_eq!(registrar.state_of("alice"), Some(ClaimState::Registered));
        assert_eq!(registrar.state_of("alice2"), Some(ClaimState::Registered));
        assert_eq!(mock.submitted_of("preorder").len(), 1);
        assert_eq!(mock.submitted_of("domain_register").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_name_is_unique_rest_alias() {
        let (mock, mut registrar) = setup(MockPlatform::instant());
        registrar.register(["alice", "alice2"], &policy(3)).await.unwrap();
        registrar.register(["alice3"], &policy(3)).await.unwrap();

        let records: Vec<DomainRecord> = mock
            .submitted_of("domain_register")
            .iter()
            .flat_map(|t| match t.kind() {
                TransitionKind::DomainRegister { domains, .. } => {
                    domains.iter().map(|d| d.record).collect::<Vec<_>>()
                }
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(records.iter().filter(|r| r.is_unique()).count(), 1);
        assert!(records[0].is_unique());
        assert_eq!(registrar.primary(), Some("alice.dash"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_label_is_skipped() {
        let (mock, mut registrar) = setup(MockPlatform::instant());
        registrar.register(["alice"], &policy(3)).await.unwrap();
        let calls = mock.submit_calls();

        let outcome = registrar.register(["alice"], &policy(3)).await.unwrap().unwrap();
        assert_eq!(labels(outcome), vec!["alice"]);
        assert_eq!(mock.submit_calls(), calls);

        let outcome = registrar.register(["alice", "bob"], &policy(3)).await.unwrap().unwrap();
        assert_eq!(labels(outcome), vec!["alice", "bob"]);
        let preorder = mock.submitted_of("preorder").pop().unwrap();
        match preorder.kind() {
            TransitionKind::Preorder { salted_domain_hashes, .. } => {
                assert_eq!(salted_domain_hashes.len(), 1);
            }
            other => panic!("unexpected transition {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_label_rejects_batch() {
        let (mock, mut registrar) = setup(MockPlatform::instant());

        let err = registrar.register(["alice", "-bad"], &policy(3)).await.unwrap_err();
        match err {
            RegistrarError::Core(e) => assert_eq!(e.code(), ErrorCode::InvalidLabel),
            other => panic!("unexpected error: {other}"),
        }
        assert!(registrar.claim("alice").is_none());
        assert_eq!(mock.submit_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_collapse() {
        let (mock, mut registrar) = setup(MockPlatform::instant());

        let outcome = registrar.register(["Alice", "alice"], &policy(3)).await.unwrap().unwrap();
        assert_eq!(labels(outcome), vec!["alice"]);
        assert_eq!(registrar.claims().count(), 1);
        assert_eq!(mock.submitted_of("domain_register").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_domain_timeout_times_out_batch() {
        let mock = MockPlatform::with_config(MockPlatformConfig {
            domain_visible_after: None,
            ..MockPlatformConfig::instant()
        });
        let (_mock, mut registrar) = setup(mock);

        let outcome = registrar.register(["alice", "alice2"], &policy(5)).await.unwrap().unwrap();
        assert!(outcome.is_timed_out());
        assert_eq!(labels(outcome), vec!["alice", "alice2"]);
        for claim in registrar.claims() {
            assert_eq!(claim.state(), ClaimState::TimedOut);
            assert!(claim.history().contains(&ClaimState::DomainSubmitted));
        }
        assert_eq!(registrar.primary(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_preorder_visibility_holds_batch() {
        let mock = MockPlatform::with_config(MockPlatformConfig::never_confirms());
        let (mock, mut registrar) = setup(mock);

        // Only a foreign preorder is visible.
        let foreign = Document {
            id: hash(b"doc"),
            owner: IdentityId(hash(b"someone-else")),
            data: DocumentData::Preorder {
                salted_domain_hash: hash(b"unrelated"),
            },
            created_at: chrono::Utc::now(),
        };
        mock.insert_document(foreign);

        let outcome = registrar.register(["alice", "alice2"], &policy(4)).await.unwrap().unwrap();
        assert!(outcome.is_timed_out());
        assert!(registrar
            .claims()
            .all(|c| !c.history().contains(&ClaimState::PreorderConfirmed)));
        assert!(mock.submitted_of("domain_register").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_claims_get_fresh_salt() {
        let mock = MockPlatform::with_config(MockPlatformConfig {
            preorder_visible_after: None,
            ..MockPlatformConfig::instant()
        });
        let (mock, mut registrar) = setup(mock);

        registrar.register(["alice"], &policy(2)).await.unwrap();
        let first_salt = *registrar.claim("alice").unwrap().salt();
        assert_eq!(registrar.state_of("alice"), Some(ClaimState::TimedOut));

        let retry = policy(10);
        let task = registrar.register(["alice"], &retry);
        let release = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            mock.release_documents(DocumentKind::Preorder);
        };
        let (outcome, ()) = tokio::join!(task, release);
        assert!(outcome.unwrap().unwrap().is_completed());
        assert_ne!(*registrar.claim("alice").unwrap().salt(), first_salt);
        assert_eq!(mock.submitted_of("preorder").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_rejection_leaves_states() {
        let (mock, mut registrar) = setup(MockPlatform::instant());
        mock.reject_next([RejectedReason::Invalid("quota".into())]);

        let outcome = registrar.register(["alice"], &policy(3)).await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Failed(RegistrarError::SubmissionRejected(_))));
        assert_eq!(registrar.state_of("alice"), Some(ClaimState::Unregistered));
        assert_eq!(mock.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_taken_by_other_identity_fails() {
        let (mock, mut other) = setup(MockPlatform::instant());
        other.register(["alice"], &policy(3)).await.unwrap();

        let mut registrar = UsernameRegistrar::new(
            IdentityId(hash(b"second-owner")),
            SecretKey::generate(),
            Platform::from_shared(mock.clone()),
            config(),
        )
        .unwrap();
        let outcome = registrar.register(["alice"], &policy(3)).await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(registrar.state_of("alice"), Some(ClaimState::PreorderConfirmed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_resume_without_resubmitting() {
        let mock = MockPlatform::with_config(MockPlatformConfig {
            domain_visible_after: None,
            ..MockPlatformConfig::instant()
        });
        let (mock, registrar) = setup(mock);
        let cancel = registrar.cancel_signal().clone();
        let mut registrar = registrar;

        let task = tokio::spawn(async move {
            let outcome = registrar.register(["alice"], &policy(20)).await;
            (registrar, outcome)
        });
        tokio::time::sleep(Duration::from_millis(35)).await;
        cancel.cancel();

        let (mut registrar, outcome) = task.await.unwrap();
        assert!(outcome.unwrap().is_none());
        assert_eq!(registrar.state_of("alice"), Some(ClaimState::DomainSubmitted));

        cancel.reset();
        mock.release_documents(DocumentKind::Domain);
        let outcome = registrar.register(["alice"], &policy(3)).await.unwrap().unwrap();
        assert!(outcome.is_completed());
        assert_eq!(mock.submitted_of("preorder").len(), 1);
        assert_eq!(mock.submitted_of("domain_register").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_adopts_owned_domains() {
        let (mock, mut first) = setup(MockPlatform::instant());
        first.register(["alice", "alice2"], &policy(3)).await.unwrap();

        let mut fresh = UsernameRegistrar::new(
            first.identity_id(),
            SecretKey::generate(),
            Platform::from_shared(mock.clone()),
            config(),
        )
        .unwrap();
        let mut adopted = fresh.recover().await.unwrap();
        adopted.sort();
        assert_eq!(adopted, vec!["alice.dash", "alice2.dash"]);
        assert_eq!(fresh.primary(), Some("alice.dash"));

        let calls = mock.submit_calls();
        let outcome = fresh.register(["alice"], &policy(3)).await.unwrap().unwrap();
        assert!(outcome.is_completed());
        assert_eq!(mock.submit_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempt_policy_rejected_before_broadcast() {
        let (mock, mut registrar) = setup(MockPlatform::instant());

        let err = registrar
            .register(["alice"], &RetryPolicy::linear(0, Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrarError::Config(_)));
        assert!(registrar.claim("alice").is_none());
        assert_eq!(mock.submit_calls(), 0);
        assert_eq!(mock.query_calls(), 0);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let err = UsernameRegistrar::new(
            IdentityId(hash(b"owner")),
            SecretKey::generate(),
            Platform::from_shared(Arc::new(MockPlatform::instant())),
            config().with_parent_domain(""),
        )
        .unwrap_err();
        assert!(matches!(err, RegistrarError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_domain_is_adopted_instead_of_resubmitted() {
        let mock = MockPlatform::with_config(MockPlatformConfig {
            domain_visible_after: None,
            ..MockPlatformConfig::instant()
        });
        let (mock, mut registrar) = setup(mock);

        let outcome = registrar.register(["alice"], &policy(3)).await.unwrap().unwrap();
        assert!(outcome.is_timed_out());

        mock.release_documents(DocumentKind::Domain);
        let outcome = registrar.register(["alice"], &policy(3)).await.unwrap().unwrap();
        assert_eq!(labels(outcome), vec!["alice"]);
        assert_eq!(registrar.state_of("alice"), Some(ClaimState::Registered));
        assert_eq!(registrar.primary(), Some("alice.dash"));
        assert_eq!(mock.submitted_of("preorder").len(), 1);
        assert_eq!(mock.submitted_of("domain_register").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_count_as_pending_polls() {
        let (mock, mut registrar) = setup(MockPlatform::instant());
        mock.fail_next_queries(2);

        let outcome = registrar.register(["alice"], &policy(5)).await.unwrap().unwrap();
        assert!(outcome.is_completed());
        // Three preorder polls, the first two failing, then one domain poll.
        assert_eq!(mock.query_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_use_up_the_budget() {
        let (mock, mut registrar) = setup(MockPlatform::instant());
        mock.fail_next_queries(3);

        let outcome = registrar.register(["alice"], &policy(3)).await.unwrap().unwrap();
        assert!(outcome.is_timed_out());
        assert_eq!(registrar.state_of("alice"), Some(ClaimState::TimedOut));
        assert_eq!(mock.query_calls(), 3);
        assert!(mock.submitted_of("domain_register").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_names_under_other_parents_report_full_name() {
        let (_mock, mut registrar) = setup(MockPlatform::instant());
        let outcome = registrar.register(["bob.test", "bob"], &policy(3)).await.unwrap().unwrap();
        assert_eq!(labels(outcome), vec!["bob.test", "bob"]);

        let mock = MockPlatform::with_config(MockPlatformConfig {
            domain_visible_after: None,
            ..MockPlatformConfig::instant()
        });
        let (_mock, mut registrar) = setup(mock);
        let outcome = registrar.register(["carol.test", "carol"], &policy(3)).await.unwrap().unwrap();
        assert!(outcome.is_timed_out());
        assert_eq!(labels(outcome), vec!["carol.test", "carol"]);
    }

    fn arb_visibility() -> impl Strategy<Value = Option<u32>> {
        prop_oneof![
            4 => (0u32..4).prop_map(Some),
            1 => Just(None),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_domain_never_submitted_before_preorder_confirmed(
            preorder_visible_after in arb_visibility(),
            domain_visible_after in arb_visibility(),
            transient in 0usize..4,
            attempts in 1u32..6,
            count in 1usize..4,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            let histories = rt.block_on(async {
                let mock = MockPlatform::with_config(MockPlatformConfig {
                    preorder_visible_after,
                    domain_visible_after,
                    ..MockPlatformConfig::default()
                });
                mock.reject_next(
                    std::iter::repeat(RejectedReason::Transient("flaky".into())).take(transient),
                );
                let (_mock, mut registrar) = setup(mock);
                let requested: Vec<String> = (0..count).map(|i| format!("name{i}")).collect();
                registrar.register(&requested, &policy(attempts)).await.unwrap();
                registrar
                    .claims()
                    .map(|c| c.history().to_vec())
                    .collect::<Vec<_>>()
            });

            for history in histories {
                let submitted = history.iter().position(|s| *s == ClaimState::DomainSubmitted);
                let confirmed = history.iter().position(|s| *s == ClaimState::PreorderConfirmed);
                if let Some(submitted) = submitted {
                    prop_assert!(matches!(confirmed, Some(c) if c < submitted));
                }
                for pair in history.windows(2) {
                    prop_assert!(pair[0].can_advance_to(pair[1]));
                }
            }
        }
    }
}
