//! Error types for the registration layer.

use idreg_core::IdentityId;
use thiserror::Error;

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrarError>;

/// Errors that can occur while registering identities and usernames.
///
/// Exhausting a retry budget is not an error; it surfaces as
/// [`Outcome::TimedOut`](crate::Outcome::TimedOut).
#[derive(Debug, Clone, Error)]
pub enum RegistrarError {
    /// Validation or structural failure from the core types.
    #[error(transparent)]
    Core(#[from] idreg_core::Error),

    /// The platform refused the transition as invalid. Never retried.
    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    /// Broadcast failed for a reason that may clear up.
    #[error("transient submission failure: {0}")]
    SubmissionTransientFailure(String),

    /// Query service failure.
    #[error("query failed: {0}")]
    Query(String),

    /// Confirmation source failure.
    #[error("confirmation source failed: {0}")]
    ConfirmationSource(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A flow for this identity is already running.
    #[error("registration flow already active for {0}")]
    FlowExists(IdentityId),

    /// No flow for this identity.
    #[error("no registration flow for {0}")]
    FlowNotFound(IdentityId),

    /// The flow task has stopped.
    #[error("registration flow for {0} has stopped")]
    FlowClosed(IdentityId),

    /// Usernames requested before the identity was registered.
    #[error("identity {0} is not registered")]
    IdentityNotRegistered(IdentityId),
}

impl RegistrarError {
    /// Check if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistrarError::SubmissionTransientFailure(_)
                | RegistrarError::Query(_)
                | RegistrarError::ConfirmationSource(_)
        )
    }

    /// Check if the caller supplied something invalid.
    pub fn is_validation(&self) -> bool {
        match self {
            RegistrarError::Core(e) => e.is_client_error(),
            RegistrarError::Config(_) => true,
            _ => false,
        }
    }
}
