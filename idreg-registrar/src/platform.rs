//! Contracts for the external services registration depends on.
//!
//! Implement these traits to connect the registrars to a real network:
//! - [`TransitionBroadcaster`] submits signed transitions
//! - [`ConfirmationSource`] reports funding transaction depth
//! - [`PlatformQuery`] reads identities and documents

use std::sync::Arc;

use async_trait::async_trait;
use idreg_core::{
    Document, DocumentKind, DocumentQuery, Hash, Identity, IdentityId, StateTransition, TxId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::errors::{RegistrarError, Result};

/// Broadcast acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    /// Id of the accepted transition.
    pub transition_id: Hash,
}

/// Why a broadcast was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectedReason {
    /// Network or node trouble; resubmitting may work.
    Transient(String),
    /// The transition itself is invalid.
    Invalid(String),
}

impl From<RejectedReason> for RegistrarError {
    fn from(reason: RejectedReason) -> Self {
        match reason {
            RejectedReason::Transient(msg) => RegistrarError::SubmissionTransientFailure(msg),
            RejectedReason::Invalid(msg) => RegistrarError::SubmissionRejected(msg),
        }
    }
}

/// Submits signed transitions.
#[async_trait]
pub trait TransitionBroadcaster: Send + Sync {
    /// Submit one transition.
    async fn submit_transition(
        &self,
        transition: &StateTransition,
    ) -> std::result::Result<Accepted, RejectedReason>;
}

/// Reports confirmation depth of funding transactions.
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    /// Subscribe to the depth of `txid`.
    async fn confirmation_depth(&self, txid: &TxId) -> Result<watch::Receiver<u64>>;

    /// Wait until `txid` reaches `depth`. Returns the observed depth.
    async fn wait_for_depth(&self, txid: &TxId, depth: u64) -> Result<u64> {
        let mut rx = self.confirmation_depth(txid).await?;
        let reached = *rx.wait_for(|d| *d >= depth).await.map_err(|_| {
            RegistrarError::ConfirmationSource(format!("depth stream for {} closed", txid))
        })?;
        Ok(reached)
    }
}

/// Reads identities and documents from the platform.
#[async_trait]
pub trait PlatformQuery: Send + Sync {
    /// Fetch an identity if the platform knows it.
    async fn resolve_identity(&self, id: &IdentityId) -> Result<Option<Identity>>;

    /// Fetch documents of `kind` matching `query`.
    async fn resolve_documents(&self, kind: DocumentKind, query: &DocumentQuery) -> Result<Vec<Document>>;

    /// Domain documents owned by `owner`.
    async fn domains_owned_by(&self, owner: &IdentityId) -> Result<Vec<Document>> {
        self.resolve_documents(DocumentKind::Domain, &DocumentQuery::OwnedBy(*owner))
            .await
    }
}

/// The three collaborators bundled for hand-off to registrars.
#[derive(Clone)]
pub struct Platform {
    /// Broadcast channel.
    pub broadcaster: Arc<dyn TransitionBroadcaster>,
    /// Depth notifications.
    pub confirmations: Arc<dyn ConfirmationSource>,
    /// Read side.
    pub query: Arc<dyn PlatformQuery>,
}

impl Platform {
    /// Bundle three collaborators.
    pub fn new(
        broadcaster: Arc<dyn TransitionBroadcaster>,
        confirmations: Arc<dyn ConfirmationSource>,
        query: Arc<dyn PlatformQuery>,
    ) -> Self {
        Self {
            broadcaster,
            confirmations,
            query,
        }
    }

    /// Use one object for all three roles.
    pub fn from_shared<P>(platform: Arc<P>) -> Self
    where
        P: TransitionBroadcaster + ConfirmationSource + PlatformQuery + 'static,
    {
        Self {
            broadcaster: platform.clone(),
            confirmations: platform.clone(),
            query: platform,
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
