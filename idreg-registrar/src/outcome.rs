//! Terminal results of registration flows.

use crate::errors::RegistrarError;

/// How a flow ended.
///
/// `P` is what a timeout reports: nothing for identities, the unfinished
/// labels for username batches.
#[derive(Debug, Clone)]
pub enum Outcome<T, P = ()> {
    /// Every step confirmed.
    Completed(T),
    /// A retry budget ran out.
    TimedOut(P),
    /// The platform refused a transition.
    Failed(RegistrarError),
}

impl<T, P> Outcome<T, P> {
    /// Check for [`Outcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// Check for [`Outcome::TimedOut`].
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut(_))
    }

    /// The completion value, if any.
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Completed(_) => "completed",
            Outcome::TimedOut(_) => "timed_out",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// Result of registering an identity.
pub type IdentityOutcome = Outcome<idreg_core::IdentityId>;

/// Result of a username batch: completed labels, or the incomplete ones.
pub type UsernameOutcome = Outcome<Vec<String>, Vec<String>>;
