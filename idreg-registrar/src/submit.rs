//! Broadcasting with transient-failure retries.

use idreg_core::StateTransition;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::errors::RegistrarError;
use crate::platform::{Accepted, RejectedReason, TransitionBroadcaster};
use crate::watcher::CancelSignal;

/// How a submission ended.
#[derive(Debug)]
pub(crate) enum Submission {
    /// The platform took the transition.
    Accepted(Accepted),
    /// The platform refused it as invalid.
    Rejected(RegistrarError),
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last: String },
    /// Cancelled before an attempt succeeded.
    Cancelled,
}

/// Submit `transition`, retrying transient failures under `policy`.
///
/// An accepted result is always returned, even if cancellation was
/// requested while the attempt was in flight.
pub(crate) async fn submit_with_retry(
    broadcaster: &dyn TransitionBroadcaster,
    transition: &StateTransition,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
) -> Submission {
    let kind = transition.kind().name();
    let mut last = String::new();

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Submission::Cancelled;
        }

        match broadcaster.submit_transition(transition).await {
            Ok(accepted) => {
                debug!(kind, attempt, transition = %accepted.transition_id, "Transition accepted");
                return Submission::Accepted(accepted);
            }
            Err(RejectedReason::Invalid(reason)) => {
                warn!(kind, attempt, %reason, "Transition rejected");
                return Submission::Rejected(RegistrarError::SubmissionRejected(reason));
            }
            Err(RejectedReason::Transient(reason)) => {
                warn!(kind, attempt, max_attempts = policy.max_attempts, %reason, "Transient submission failure");
                last = reason;
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
                _ = cancel.cancelled() => return Submission::Cancelled,
            }
        }
    }

    Submission::Exhausted {
        attempts: policy.max_attempts,
        last,
    }
}
