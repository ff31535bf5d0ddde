//! Mock platform for testing and development.
//!
//! [`MockPlatform`] implements all three collaborator traits in memory.
//! Accepted transitions turn into identities and documents that become
//! visible after a configurable number of queries, so tests can simulate
//! slow confirmation, no confirmation, transient broadcast trouble and
//! outright rejection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use idreg_core::{
    Document, DocumentKind, DocumentQuery, Identity, IdentityId, SaltedHasher, StateTransition,
    TransitionKind, TxId,
};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use crate::errors::{RegistrarError, Result};
use crate::platform::{
    Accepted, ConfirmationSource, PlatformQuery, RejectedReason, TransitionBroadcaster,
};

/// Configuration for the mock platform.
///
/// A visibility of `Some(n)` hides an accepted item from its first `n`
/// queries. `None` hides it until released by hand.
#[derive(Debug, Clone)]
pub struct MockPlatformConfig {
    /// Queries before a created identity resolves.
    pub identity_visible_after: Option<u32>,
    /// Queries before preorder documents resolve.
    pub preorder_visible_after: Option<u32>,
    /// Queries before domain documents resolve.
    pub domain_visible_after: Option<u32>,
    /// Depth reported for transactions nobody has set a depth for.
    pub initial_depth: u64,
    /// Simulated latency per call.
    pub latency: Duration,
}

impl Default for MockPlatformConfig {
    fn default() -> Self {
        Self {
            identity_visible_after: Some(1),
            preorder_visible_after: Some(1),
            domain_visible_after: Some(1),
            initial_depth: 1,
            latency: Duration::ZERO,
        }
    }
}

impl MockPlatformConfig {
    /// Everything visible on the first query.
    pub fn instant() -> Self {
        Self {
            identity_visible_after: Some(0),
            preorder_visible_after: Some(0),
            domain_visible_after: Some(0),
            ..Self::default()
        }
    }

    /// Nothing ever becomes visible on its own.
    pub fn never_confirms() -> Self {
        Self {
            identity_visible_after: None,
            preorder_visible_after: None,
            domain_visible_after: None,
            ..Self::default()
        }
    }

    /// Funding transactions start at depth zero.
    pub fn unfunded(mut self) -> Self {
        self.initial_depth = 0;
        self
    }
}

#[derive(Debug, Clone)]
struct Hidden<T> {
    item: T,
    /// Remaining hidden queries; `None` while held.
    remaining: Option<u32>,
}

impl<T: Clone> Hidden<T> {
    fn new(item: T, remaining: Option<u32>) -> Self {
        Self { item, remaining }
    }

    /// Count one query; return the item if it is visible.
    fn observe(&mut self) -> Option<T> {
        match self.remaining {
            Some(0) => Some(self.item.clone()),
            Some(ref mut n) => {
                *n -= 1;
                None
            }
            None => None,
        }
    }
}

/// In-memory platform.
pub struct MockPlatform {
    config: MockPlatformConfig,
    identities: RwLock<HashMap<IdentityId, Hidden<Identity>>>,
    documents: RwLock<Vec<Hidden<Document>>>,
    depths: RwLock<HashMap<TxId, watch::Sender<u64>>>,
    submitted: RwLock<Vec<StateTransition>>,
    scripted_rejections: RwLock<VecDeque<RejectedReason>>,
    failing_queries: AtomicU64,
    submit_calls: AtomicU64,
    query_calls: AtomicU64,
}

impl MockPlatform {
    /// A mock with default config.
    pub fn new() -> Self {
        Self::with_config(MockPlatformConfig::default())
    }

    /// A mock with custom configuration.
    pub fn with_config(config: MockPlatformConfig) -> Self {
        Self {
            config,
            identities: RwLock::new(HashMap::new()),
            documents: RwLock::new(Vec::new()),
            depths: RwLock::new(HashMap::new()),
            submitted: RwLock::new(Vec::new()),
            scripted_rejections: RwLock::new(VecDeque::new()),
            failing_queries: AtomicU64::new(0),
            submit_calls: AtomicU64::new(0),
            query_calls: AtomicU64::new(0),
        }
    }

    /// Everything visible on the first query.
    pub fn instant() -> Self {
        Self::with_config(MockPlatformConfig::instant())
    }

    /// Configuration.
    pub fn config(&self) -> &MockPlatformConfig {
        &self.config
    }

    /// Set the depth of a funding transaction.
    pub fn set_depth(&self, txid: TxId, depth: u64) {
        self.with_depth_sender(txid, |tx| {
            tx.send_replace(depth);
        });
    }

    /// Refuse the next submissions with these reasons, in order.
    pub fn reject_next(&self, reasons: impl IntoIterator<Item = RejectedReason>) {
        self.scripted_rejections.write().extend(reasons);
    }

    /// Fail the next `count` queries with a query error.
    pub fn fail_next_queries(&self, count: u64) {
        self.failing_queries.store(count, Ordering::SeqCst);
    }

    /// Make every held or delayed identity visible.
    pub fn release_identities(&self) {
        for hidden in self.identities.write().values_mut() {
            hidden.remaining = Some(0);
        }
    }

    /// Make every held or delayed document of `kind` visible.
    pub fn release_documents(&self, kind: DocumentKind) {
        for hidden in self.documents.write().iter_mut() {
            if hidden.item.kind() == kind {
                hidden.remaining = Some(0);
            }
        }
    }

    /// Store a visible identity directly.
    pub fn insert_identity(&self, identity: Identity) {
        self.identities
            .write()
            .insert(identity.id(), Hidden::new(identity, Some(0)));
    }

    /// Store a visible document directly.
    pub fn insert_document(&self, document: Document) {
        self.documents.write().push(Hidden::new(document, Some(0)));
    }

    /// Every transition accepted so far.
    pub fn submitted(&self) -> Vec<StateTransition> {
        self.submitted.read().clone()
    }

    /// Accepted transitions of one kind.
    pub fn submitted_of(&self, name: &str) -> Vec<StateTransition> {
        self.submitted
            .read()
            .iter()
            .filter(|t| t.kind().name() == name)
            .cloned()
            .collect()
    }

    /// Number of `submit_transition` calls, including refused ones.
    pub fn submit_calls(&self) -> u64 {
        self.submit_calls.load(Ordering::Relaxed)
    }

    /// Number of identity and document queries.
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::Relaxed)
    }

    fn with_depth_sender<R>(&self, txid: TxId, f: impl FnOnce(&watch::Sender<u64>) -> R) -> R {
        let mut depths = self.depths.write();
        let sender = depths
            .entry(txid)
            .or_insert_with(|| watch::channel(self.config.initial_depth).0);
        f(sender)
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    fn take_query_failure(&self) -> bool {
        self.failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Platform-side validity rules.
    fn check(&self, transition: &StateTransition) -> std::result::Result<(), String> {
        transition.verify().map_err(|e| e.to_string())?;

        match transition.kind() {
            TransitionKind::IdentityCreate {
                identity_id,
                funding,
                ..
            } => {
                if transition.signer() != &funding.burn_public_key() {
                    return Err("identity create not signed by the burn key".into());
                }
                if *identity_id != funding.derived_identity_id() {
                    return Err("identity id does not match the locked outpoint".into());
                }
                if self.identities.read().contains_key(identity_id) {
                    return Err(format!("identity {} already exists", identity_id));
                }
            }
            TransitionKind::Preorder {
                salted_domain_hashes,
                ..
            } => {
                if salted_domain_hashes.is_empty() {
                    return Err("empty preorder".into());
                }
            }
            TransitionKind::DomainRegister { owner, domains } => {
                let docs = self.documents.read();
                for entry in domains {
                    let label = idreg_core::Label::parse_with_parent(
                        &entry.normalized_label,
                        &entry.parent_domain,
                    )
                    .map_err(|e| e.to_string())?;
                    let commitment = SaltedHasher::hash_label(&entry.salt, &label, owner);
                    let preordered = docs.iter().any(|d| {
                        d.remaining == Some(0)
                            && d.item.owner == *owner
                            && d.item.salted_domain_hash() == Some(commitment)
                    });
                    if !preordered {
                        return Err(format!("{} was not preordered", label.full_name()));
                    }
                    let taken = docs.iter().any(|d| {
                        d.item.owner != *owner
                            && d.item.domain_name()
                                == Some((entry.normalized_label.as_str(), entry.parent_domain.as_str()))
                    });
                    if taken {
                        return Err(format!("{} is taken", label.full_name()));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&self, transition: &StateTransition) {
        match transition.kind() {
            TransitionKind::IdentityCreate {
                identity_id,
                funding,
                public_keys,
            } => {
                let mut identity = Identity::new(funding.clone(), public_keys.iter().copied());
                identity.mark_registered();
                self.identities.write().insert(
                    *identity_id,
                    Hidden::new(identity, self.config.identity_visible_after),
                );
            }
            TransitionKind::Preorder { .. } => {
                let visible_after = self.config.preorder_visible_after;
                self.documents.write().extend(
                    Document::from_transition(transition)
                        .into_iter()
                        .map(|d| Hidden::new(d, visible_after)),
                );
            }
            TransitionKind::DomainRegister { .. } => {
                let visible_after = self.config.domain_visible_after;
                self.documents.write().extend(
                    Document::from_transition(transition)
                        .into_iter()
                        .map(|d| Hidden::new(d, visible_after)),
                );
            }
        }
        self.submitted.write().push(transition.clone());
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransitionBroadcaster for MockPlatform {
    async fn submit_transition(
        &self,
        transition: &StateTransition,
    ) -> std::result::Result<Accepted, RejectedReason> {
        self.simulate_latency().await;
        self.submit_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = self.scripted_rejections.write().pop_front() {
            debug!(kind = transition.kind().name(), ?reason, "Mock refusing transition");
            return Err(reason);
        }

        self.check(transition).map_err(RejectedReason::Invalid)?;
        let transition_id = transition
            .id()
            .map_err(|e| RejectedReason::Invalid(e.to_string()))?;
        self.apply(transition);
        Ok(Accepted { transition_id })
    }
}

#[async_trait]
impl ConfirmationSource for MockPlatform {
    async fn confirmation_depth(&self, txid: &TxId) -> Result<watch::Receiver<u64>> {
        Ok(self.with_depth_sender(*txid, |tx| tx.subscribe()))
    }
}

#[async_trait]
impl PlatformQuery for MockPlatform {
    async fn resolve_identity(&self, id: &IdentityId) -> Result<Option<Identity>> {
        self.simulate_latency().await;
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        if self.take_query_failure() {
            return Err(RegistrarError::Query("mock query failure".into()));
        }
        Ok(self
            .identities
            .write()
            .get_mut(id)
            .and_then(|hidden| hidden.observe()))
    }

    async fn resolve_documents(&self, kind: DocumentKind, query: &DocumentQuery) -> Result<Vec<Document>> {
        self.simulate_latency().await;
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        if self.take_query_failure() {
            return Err(RegistrarError::Query("mock query failure".into()));
        }
        Ok(self
            .documents
            .write()
            .iter_mut()
            .filter(|hidden| hidden.item.kind() == kind && query.matches(&hidden.item))
            .filter_map(|hidden| hidden.observe())
            .collect())
    }
}
