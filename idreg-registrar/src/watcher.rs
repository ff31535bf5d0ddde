//! Bounded polling with cancellation.
//!
//! A [`ConfirmationWatcher`] evaluates a caller-supplied predicate until it
//! reports [`PollResult::Ready`] or the [`RetryPolicy`] runs out. The first
//! poll runs immediately; the policy's delay separates later polls. The
//! watcher does no I/O itself.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::config::RetryPolicy;

/// What one poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not yet.
    Pending,
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome<T> {
    /// The predicate became ready.
    Completed(T),
    /// Every attempt came back pending.
    TimedOut {
        /// Polls performed.
        attempts: u32,
    },
}

/// Cooperative cancellation shared between a flow and its watchers.
///
/// Cloning shares the flag. Safe to trigger from any thread.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    /// A signal that is not cancelled.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Check the flag.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls a predicate on a retry schedule.
#[derive(Debug, Clone)]
pub struct ConfirmationWatcher {
    name: &'static str,
    cancel: CancelSignal,
}

impl ConfirmationWatcher {
    /// A watcher that stops when `cancel` fires.
    pub fn new(name: &'static str, cancel: CancelSignal) -> Self {
        Self { name, cancel }
    }

    /// What is being watched, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Poll `predicate` under `policy`.
    ///
    /// Returns `None` if cancelled: an in-flight poll is allowed to finish
    /// but its result is discarded and nothing further is scheduled.
    pub async fn watch<T, F, Fut>(&self, policy: &RetryPolicy, mut predicate: F) -> Option<WatchOutcome<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PollResult<T>>,
    {
        let max_attempts = policy.max_attempts;
        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                debug!(watch = self.name, attempt, "Watch cancelled");
                return None;
            }

            let result = predicate(attempt).await;
            if self.cancel.is_cancelled() {
                debug!(watch = self.name, attempt, "Watch cancelled during poll");
                return None;
            }

            match result {
                PollResult::Ready(value) => {
                    trace!(watch = self.name, attempt, "Poll ready");
                    return Some(WatchOutcome::Completed(value));
                }
                PollResult::Pending => {
                    trace!(watch = self.name, attempt, max_attempts, "Poll pending");
                }
            }

            if attempt < max_attempts {
                let delay = policy.delay_for(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => {
                        debug!(watch = self.name, attempt, "Watch cancelled while waiting");
                        return None;
                    }
                }
            }
        }

        debug!(watch = self.name, attempts = max_attempts, "Watch timed out");
        Some(WatchOutcome::TimedOut {
            attempts: max_attempts,
        })
    }
}
