//! Per-identity registration flows.
//!
//! The coordinator owns the funding ledger and a registry of live flows.
//! Each flow is one tokio task that owns the identity's registrars, so all
//! events for an identity are applied in arrival order while different
//! identities proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use idreg_core::{IdentityId, SaltedHasher, Transaction};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{RegistrarConfig, RetryPolicy};
use crate::errors::{RegistrarError, Result};
use crate::identity::{IdentityKeys, IdentityRegistrar};
use crate::ledger::FundingLedger;
use crate::outcome::{IdentityOutcome, Outcome, UsernameOutcome};
use crate::platform::Platform;
use crate::username::UsernameRegistrar;
use crate::watcher::CancelSignal;

const COMMAND_QUEUE_DEPTH: usize = 16;

/// Terminal result of a flow.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    /// Identity registration result.
    pub identity: IdentityOutcome,
    /// Username result, if the identity registered and labels were requested.
    pub usernames: Option<UsernameOutcome>,
}

impl FlowOutcome {
    /// Check whether every step completed.
    pub fn is_completed(&self) -> bool {
        self.identity.is_completed()
            && self.usernames.as_ref().map(Outcome::is_completed).unwrap_or(true)
    }

    fn is_timed_out(&self) -> bool {
        self.identity.is_timed_out()
            || self.usernames.as_ref().map(Outcome::is_timed_out).unwrap_or(false)
    }
}

/// Coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Flows started.
    pub started: u64,
    /// Flows whose first outcome completed.
    pub completed: u64,
    /// Flows whose first outcome timed out.
    pub timed_out: u64,
    /// Flows whose first outcome failed.
    pub failed: u64,
    /// Flows still registered.
    pub active: usize,
}

enum FlowCommand {
    RegisterUsernames {
        labels: Vec<String>,
        reply: oneshot::Sender<Result<Option<UsernameOutcome>>>,
    },
    Restart {
        reply: oneshot::Sender<Option<FlowOutcome>>,
    },
    Resume {
        reply: oneshot::Sender<Option<FlowOutcome>>,
    },
}

/// Handle to a running flow.
///
/// The flow task keeps serving commands until every handle is dropped.
pub struct FlowHandle {
    identity_id: IdentityId,
    outcome: Option<oneshot::Receiver<FlowOutcome>>,
    commands: mpsc::Sender<FlowCommand>,
    cancel: CancelSignal,
}

impl FlowHandle {
    /// Identity this flow registers.
    pub fn identity_id(&self) -> IdentityId {
        self.identity_id
    }

    /// Wait for the first terminal outcome.
    ///
    /// The outcome is delivered once; later calls return `None`, as does a
    /// flow that stopped without producing one.
    pub async fn outcome(&mut self) -> Option<FlowOutcome> {
        self.outcome.take()?.await.ok()
    }

    /// Pause the flow. In-flight polls finish and nothing else is scheduled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check whether the flow is paused.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Register more usernames once the identity is registered.
    pub async fn register_usernames<I, S>(&self, labels: I) -> Result<Option<UsernameOutcome>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels = labels.into_iter().map(Into::into).collect();
        let (reply, rx) = oneshot::channel();
        self.send(FlowCommand::RegisterUsernames { labels, reply }).await?;
        rx.await.map_err(|_| RegistrarError::FlowClosed(self.identity_id))?
    }

    /// Restart a timed-out or failed identity registration, then rerun
    /// the initial labels.
    pub async fn restart(&self) -> Result<Option<FlowOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.send(FlowCommand::Restart { reply }).await?;
        rx.await.map_err(|_| RegistrarError::FlowClosed(self.identity_id))
    }

    /// Clear a cancel and continue from where the flow stopped.
    pub async fn resume(&self) -> Result<Option<FlowOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.send(FlowCommand::Resume { reply }).await?;
        rx.await.map_err(|_| RegistrarError::FlowClosed(self.identity_id))
    }

    async fn send(&self, command: FlowCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RegistrarError::FlowClosed(self.identity_id))
    }
}

impl std::fmt::Debug for FlowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHandle")
            .field("identity", &self.identity_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Summary of a live flow.
#[derive(Debug, Clone)]
pub struct FlowInfo {
    /// Identity being registered.
    pub identity_id: IdentityId,
    /// When the flow started.
    pub started_at: DateTime<Utc>,
    /// Whether the flow is paused.
    pub cancelled: bool,
}

struct FlowEntry {
    cancel: CancelSignal,
    started_at: DateTime<Utc>,
}

type FlowRegistry = Arc<RwLock<HashMap<IdentityId, FlowEntry>>>;

/// Starts and tracks registration flows.
pub struct RegistrationCoordinator {
    platform: Platform,
    config: RegistrarConfig,
    ledger: Arc<FundingLedger>,
    flows: FlowRegistry,
    stats: Arc<RwLock<CoordinatorStats>>,
}

impl RegistrationCoordinator {
    /// A coordinator with a fresh ledger.
    pub fn new(platform: Platform, config: RegistrarConfig) -> Result<Self> {
        Self::with_ledger(platform, config, Arc::new(FundingLedger::new()))
    }

    /// A coordinator sharing `ledger`.
    pub fn with_ledger(
        platform: Platform,
        config: RegistrarConfig,
        ledger: Arc<FundingLedger>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            platform,
            config,
            ledger,
            flows: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(CoordinatorStats::default())),
        })
    }

    /// Funding ledger.
    pub fn ledger(&self) -> &Arc<FundingLedger> {
        &self.ledger
    }

    /// Configuration.
    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    /// Start registering the identity funded by `tx`, then `labels`.
    ///
    /// Validation errors (not a funding transaction, invalid label,
    /// invalid policy) are returned here. `policy`, when given, replaces
    /// the configured polling policies for this flow. Must be called from
    /// within a tokio runtime.
    pub fn start<I, S>(
        &self,
        tx: &Transaction,
        keys: IdentityKeys,
        labels: I,
        policy: Option<RetryPolicy>,
    ) -> Result<FlowHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let hasher = SaltedHasher::new(self.config.parent_domain.clone());
        for label in &labels {
            hasher.label(label)?;
        }
        if let Some(policy) = &policy {
            policy.validate()?;
        }

        let record = self.ledger.observe(tx)?;
        let identity_id = record.derived_identity_id();
        let cancel = CancelSignal::new();
        let signing = keys.signing.clone();
        let identity =
            IdentityRegistrar::new(record, keys, self.platform.clone(), self.config.clone())?
                .with_cancel(cancel.clone());
        let usernames = UsernameRegistrar::new(
            identity_id,
            signing,
            self.platform.clone(),
            self.config.clone(),
        )?
        .with_cancel(cancel.clone());

        {
            let mut flows = self.flows.write();
            if flows.contains_key(&identity_id) {
                return Err(RegistrarError::FlowExists(identity_id));
            }
            flows.insert(
                identity_id,
                FlowEntry {
                    cancel: cancel.clone(),
                    started_at: Utc::now(),
                },
            );
        }
        self.stats.write().started += 1;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let flow = Flow {
            identity,
            usernames,
            labels,
            policy,
            cancel: cancel.clone(),
            recovered: false,
        };
        tokio::spawn(flow.run(
            outcome_tx,
            commands_rx,
            self.flows.clone(),
            self.stats.clone(),
        ));

        info!(identity = %identity_id, "Registration flow started");
        Ok(FlowHandle {
            identity_id,
            outcome: Some(outcome_rx),
            commands: commands_tx,
            cancel,
        })
    }

    /// Pause the flow for `identity_id`.
    pub fn cancel(&self, identity_id: &IdentityId) -> Result<()> {
        let flows = self.flows.read();
        let entry = flows
            .get(identity_id)
            .ok_or(RegistrarError::FlowNotFound(*identity_id))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Live flows.
    pub fn active_flows(&self) -> Vec<FlowInfo> {
        self.flows
            .read()
            .iter()
            .map(|(id, entry)| FlowInfo {
                identity_id: *id,
                started_at: entry.started_at,
                cancelled: entry.cancel.is_cancelled(),
            })
            .collect()
    }

    /// Check whether a flow is live for `identity_id`.
    pub fn has_flow(&self, identity_id: &IdentityId) -> bool {
        self.flows.read().contains_key(identity_id)
    }

    /// Counters.
    pub fn stats(&self) -> CoordinatorStats {
        let mut stats = *self.stats.read();
        stats.active = self.flows.read().len();
        stats
    }
}

impl std::fmt::Debug for RegistrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationCoordinator")
            .field("flows", &self.flows.read().len())
            .field("ledger", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

/// State owned by one flow task.
struct Flow {
    identity: IdentityRegistrar,
    usernames: UsernameRegistrar,
    labels: Vec<String>,
    policy: Option<RetryPolicy>,
    cancel: CancelSignal,
    recovered: bool,
}

impl Flow {
    async fn run(
        mut self,
        outcome_tx: oneshot::Sender<FlowOutcome>,
        mut commands: mpsc::Receiver<FlowCommand>,
        flows: FlowRegistry,
        stats: Arc<RwLock<CoordinatorStats>>,
    ) {
        let id = self.identity.identity_id();
        let mut outcome_tx = Some(outcome_tx);

        if let Some(outcome) = self.drive().await {
            deliver(id, &mut outcome_tx, outcome, &stats);
        }

        while let Some(command) = commands.recv().await {
            match command {
                FlowCommand::RegisterUsernames { labels, reply } => {
                    let result = self.register_more(labels).await;
                    let _ = reply.send(result);
                }
                FlowCommand::Restart { reply } => {
                    self.identity.restart();
                    self.cancel.reset();
                    let outcome = self.drive().await;
                    let _ = reply.send(self.report(outcome, &mut outcome_tx, &stats));
                }
                FlowCommand::Resume { reply } => {
                    self.cancel.reset();
                    let outcome = self.drive().await;
                    let _ = reply.send(self.report(outcome, &mut outcome_tx, &stats));
                }
            }
        }

        flows.write().remove(&id);
        debug!(identity = %id, "Registration flow closed");
    }

    /// Deliver the first outcome to the handle's waiter and echo every
    /// outcome to the command caller.
    fn report(
        &self,
        outcome: Option<FlowOutcome>,
        outcome_tx: &mut Option<oneshot::Sender<FlowOutcome>>,
        stats: &RwLock<CoordinatorStats>,
    ) -> Option<FlowOutcome> {
        let outcome = outcome?;
        deliver(self.identity.identity_id(), outcome_tx, outcome.clone(), stats);
        Some(outcome)
    }

    /// Run identity then usernames. `None` when cancelled.
    async fn drive(&mut self) -> Option<FlowOutcome> {
        let identity = match self.policy {
            Some(policy) => self.identity.register(&policy).await?,
            None => self.identity.run().await?,
        };
        if !identity.is_completed() || self.labels.is_empty() {
            return Some(FlowOutcome {
                identity,
                usernames: None,
            });
        }

        let labels = self.labels.clone();
        let usernames = match self.register_labels(labels).await {
            Ok(outcome) => outcome?,
            Err(e) => Outcome::Failed(e),
        };
        Some(FlowOutcome {
            identity,
            usernames: Some(usernames),
        })
    }

    async fn register_more(&mut self, labels: Vec<String>) -> Result<Option<UsernameOutcome>> {
        if !self.identity.identity().is_registered() {
            return Err(RegistrarError::IdentityNotRegistered(self.identity.identity_id()));
        }
        self.cancel.reset();
        self.register_labels(labels).await
    }

    async fn register_labels(&mut self, labels: Vec<String>) -> Result<Option<UsernameOutcome>> {
        if !self.recovered {
            match self.usernames.recover().await {
                Ok(_) => self.recovered = true,
                Err(e) => {
                    warn!(identity = %self.identity.identity_id(), error = %e, "Username recovery failed")
                }
            }
        }
        match self.policy {
            Some(policy) => self.usernames.register(&labels, &policy).await,
            None => self.usernames.register_with_config(&labels).await,
        }
    }
}

fn deliver(
    identity_id: IdentityId,
    outcome_tx: &mut Option<oneshot::Sender<FlowOutcome>>,
    outcome: FlowOutcome,
    stats: &RwLock<CoordinatorStats>,
) {
    let Some(tx) = outcome_tx.take() else {
        return;
    };
    {
        let mut stats = stats.write();
        if outcome.is_completed() {
            stats.completed += 1;
        } else if outcome.is_timed_out() {
            stats.timed_out += 1;
        } else {
            stats.failed += 1;
        }
    }
    info!(
        identity = %identity_id,
        identity_outcome = outcome.identity.name(),
        username_outcome = outcome.usernames.as_ref().map(Outcome::name),
        "Registration flow finished"
    );
    let _ = tx.send(outcome);
}
