//! Identity registration.
//!
//! ```text
//! AwaitingFunding -> FundingConfirmed -> SubmittingCreateTransition
//!                                              |
//!                                              v
//!                         Registered <- AwaitingNetworkConfirmation
//! ```
//!
//! Exhausted retries end in `TimedOut` and structural rejection in
//! `Failed`; both can be restarted.

use std::fmt;

use idreg_core::{FundingRecord, Identity, IdentityId, SecretKey, StateTransition, TransitionKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{RegistrarConfig, RetryPolicy};
use crate::errors::{RegistrarError, Result};
use crate::outcome::{IdentityOutcome, Outcome};
use crate::platform::Platform;
use crate::submit::{submit_with_retry, Submission};
use crate::watcher::{CancelSignal, ConfirmationWatcher, PollResult, WatchOutcome};

/// Where an identity registration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPhase {
    /// Waiting for the funding transaction to reach depth.
    AwaitingFunding,
    /// Funding is locked; checking whether the identity already exists.
    FundingConfirmed,
    /// Broadcasting the identity-create transition.
    SubmittingCreateTransition,
    /// Waiting for the platform to show the identity.
    AwaitingNetworkConfirmation,
    /// Done.
    Registered,
    /// A retry budget ran out.
    TimedOut,
    /// The platform refused the transition.
    Failed,
}

impl IdentityPhase {
    /// Check if `run` would return without doing anything.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IdentityPhase::Registered | IdentityPhase::TimedOut | IdentityPhase::Failed
        )
    }
}

impl fmt::Display for IdentityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentityPhase::AwaitingFunding => "awaiting_funding",
            IdentityPhase::FundingConfirmed => "funding_confirmed",
            IdentityPhase::SubmittingCreateTransition => "submitting_create_transition",
            IdentityPhase::AwaitingNetworkConfirmation => "awaiting_network_confirmation",
            IdentityPhase::Registered => "registered",
            IdentityPhase::TimedOut => "timed_out",
            IdentityPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Keys an identity flow signs with.
#[derive(Debug, Clone)]
pub struct IdentityKeys {
    /// Spends the credit lock.
    pub burn: SecretKey,
    /// Bound to the identity; signs username transitions.
    pub signing: SecretKey,
}

impl IdentityKeys {
    /// Pair up existing keys.
    pub fn new(burn: SecretKey, signing: SecretKey) -> Self {
        Self { burn, signing }
    }

    /// Fresh random keys.
    pub fn generate() -> Self {
        Self::new(SecretKey::generate(), SecretKey::generate())
    }
}

/// Drives one funding record to a registered identity.
pub struct IdentityRegistrar {
    record: FundingRecord,
    keys: IdentityKeys,
    identity: Identity,
    phase: IdentityPhase,
    last_error: Option<RegistrarError>,
    platform: Platform,
    config: RegistrarConfig,
    cancel: CancelSignal,
}

impl IdentityRegistrar {
    /// A registrar for `record`, waiting for funding.
    ///
    /// Fails with `Config` if `config` does not validate.
    pub fn new(
        record: FundingRecord,
        keys: IdentityKeys,
        platform: Platform,
        config: RegistrarConfig,
    ) -> Result<Self> {
        config.validate()?;
        let identity = Identity::new(record.clone(), [keys.signing.public_key()]);
        Ok(Self {
            record,
            keys,
            identity,
            phase: IdentityPhase::AwaitingFunding,
            last_error: None,
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

    /// Identity being registered.
    pub fn identity_id(&self) -> IdentityId {
        self.record.derived_identity_id()
    }

    /// Local view of the identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Funding record.
    pub fn record(&self) -> &FundingRecord {
        &self.record
    }

    /// Signing keys.
    pub fn keys(&self) -> &IdentityKeys {
        &self.keys
    }

    /// Current phase.
    pub fn phase(&self) -> IdentityPhase {
        self.phase
    }

    /// Start over after a timeout or failure with a fresh budget.
    ///
    /// Returns `false` if the registrar was not in a restartable phase.
    pub fn restart(&mut self) -> bool {
        if !matches!(self.phase, IdentityPhase::TimedOut | IdentityPhase::Failed) {
            return false;
        }
        info!(identity = %self.identity_id(), from = %self.phase, "Restarting identity registration");
        self.phase = IdentityPhase::AwaitingFunding;
        self.last_error = None;
        true
    }

    /// Register using the configured identity policy.
    pub async fn run(&mut self) -> Option<IdentityOutcome> {
        let policy = self.config.identity_policy;
        self.register(&policy).await
    }

    /// Drive the state machine from the current phase.
    ///
    /// `policy` bounds the network confirmation watch. Returns `None` if
    /// cancelled; the phase is left where it was so a later call resumes.
    /// An invalid `policy` fails with `Config` before any phase runs.
    pub async fn register(&mut self, policy: &RetryPolicy) -> Option<IdentityOutcome> {
        if let Err(e) = policy.validate() {
            return Some(Outcome::Failed(e));
        }
        let id = self.identity_id();
        loop {
            match self.phase {
                IdentityPhase::Registered => return Some(Outcome::Completed(id)),
                IdentityPhase::TimedOut => return Some(Outcome::TimedOut(())),
                IdentityPhase::Failed => {
                    let error = self.last_error.clone().unwrap_or_else(|| {
                        RegistrarError::SubmissionRejected("identity registration failed".into())
                    });
                    return Some(Outcome::Failed(error));
                }
                IdentityPhase::AwaitingFunding => {
                    if let Err(e) = self.await_funding().await? {
                        return Some(Outcome::Failed(e));
                    }
                }
                IdentityPhase::FundingConfirmed => self.check_existing().await,
                IdentityPhase::SubmittingCreateTransition => {
                    if let Some(outcome) = self.submit_create().await? {
                        return Some(outcome);
                    }
                }
                IdentityPhase::AwaitingNetworkConfirmation => {
                    return self.await_network(policy).await;
                }
            }
        }
    }

    fn set_phase(&mut self, phase: IdentityPhase) {
        debug!(identity = %self.identity_id(), from = %self.phase, to = %phase, "Identity phase");
        self.phase = phase;
    }

    /// `None` when cancelled.
    async fn await_funding(&mut self) -> Option<Result<()>> {
        let txid = self.record.transaction_id();
        let required = self.config.funding_confirmations;
        let confirmations = self.platform.confirmations.clone();
        let cancel = self.cancel.clone();

        let result = tokio::select! {
            r = confirmations.wait_for_depth(&txid, required) => r,
            _ = cancel.cancelled() => return None,
        };

        match result {
            Ok(depth) => {
                info!(identity = %self.identity_id(), txid = %txid, depth, "Funding confirmed");
                self.set_phase(IdentityPhase::FundingConfirmed);
                Some(Ok(()))
            }
            Err(e) => {
                warn!(identity = %self.identity_id(), error = %e, "Funding confirmation failed");
                Some(Err(e))
            }
        }
    }

    async fn check_existing(&mut self) {
        match self.platform.query.resolve_identity(&self.identity_id()).await {
            Ok(Some(_)) => {
                info!(identity = %self.identity_id(), "Identity already registered");
                self.identity.mark_registered();
                self.set_phase(IdentityPhase::Registered);
            }
            Ok(None) => self.set_phase(IdentityPhase::SubmittingCreateTransition),
            Err(e) => {
                warn!(identity = %self.identity_id(), error = %e, "Identity lookup failed, submitting anyway");
                self.set_phase(IdentityPhase::SubmittingCreateTransition);
            }
        }
    }

    fn fail(&mut self, error: RegistrarError) -> IdentityOutcome {
        warn!(identity = %self.identity_id(), %error, "Identity registration failed");
        self.last_error = Some(error.clone());
        self.set_phase(IdentityPhase::Failed);
        Outcome::Failed(error)
    }

    /// `Some(None)` to continue, `Some(Some(outcome))` to stop, `None` when cancelled.
    async fn submit_create(&mut self) -> Option<Option<IdentityOutcome>> {
        if self.keys.burn.public_key() != self.record.burn_public_key() {
            let error = RegistrarError::SubmissionRejected(
                "burn key does not match the funding record".into(),
            );
            return Some(Some(self.fail(error)));
        }

        let kind = TransitionKind::IdentityCreate {
            identity_id: self.identity_id(),
            funding: self.record.clone(),
            public_keys: self.identity.public_keys().iter().copied().collect(),
        };
        let transition = match StateTransition::sign(kind, &self.keys.burn) {
            Ok(t) => t,
            Err(e) => return Some(Some(self.fail(e.into()))),
        };

        let policy = self.config.submission_policy;
        let broadcaster = self.platform.broadcaster.clone();
        match submit_with_retry(broadcaster.as_ref(), &transition, &policy, &self.cancel).await {
            Submission::Accepted(_) => {
                info!(identity = %self.identity_id(), "Identity create transition accepted");
                self.set_phase(IdentityPhase::AwaitingNetworkConfirmation);
                if self.cancel.is_cancelled() {
                    return None;
                }
                Some(None)
            }
            Submission::Rejected(e) => Some(Some(self.fail(e))),
            Submission::Exhausted { attempts, last } => {
                warn!(identity = %self.identity_id(), attempts, %last, "Identity submission timed out");
                self.set_phase(IdentityPhase::TimedOut);
                Some(Some(Outcome::TimedOut(())))
            }
            Submission::Cancelled => None,
        }
    }

    async fn await_network(&mut self, policy: &RetryPolicy) -> Option<IdentityOutcome> {
        let id = self.identity_id();
        let query = self.platform.query.clone();
        let watcher = ConfirmationWatcher::new("identity", self.cancel.clone());

        let outcome = watcher
            .watch(policy, |attempt| {
                let query = query.clone();
                async move {
                    match query.resolve_identity(&id).await {
                        Ok(Some(identity)) => PollResult::Ready(identity),
                        Ok(None) => PollResult::Pending,
                        Err(e) => {
                            warn!(identity = %id, attempt, error = %e, "Identity query failed");
                            PollResult::Pending
                        }
                    }
                }
            })
            .await?;

        match outcome {
            WatchOutcome::Completed(_) => {
                if self.identity.mark_registered() {
                    info!(identity = %id, "Identity registered");
                }
                self.set_phase(IdentityPhase::Registered);
                Some(Outcome::Completed(id))
            }
            WatchOutcome::TimedOut { attempts } => {
                info!(identity = %id, attempts, "Identity confirmation timed out");
                self.set_phase(IdentityPhase::TimedOut);
                Some(Outcome::TimedOut(()))
            }
        }
    }
}

impl fmt::Debug for IdentityRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistrar")
            .field("identity", &self.identity_id())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
