//! Confirmation-gated identity and username registration.
//!
//! A funding transaction locks credit; once it is deep enough the credit
//! becomes an identity, and the identity then claims usernames through a
//! preorder / register sequence. Every platform step waits for
//! confirmation under a bounded [`RetryPolicy`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   REGISTRATION COORDINATOR                        │
//! │   - one task per identity, commands applied in arrival order      │
//! │   - funding ledger shared by every flow                           │
//! └──────────────────────────────────────────────────────────────────┘
//!                │                                 │
//!                ▼                                 ▼
//! ┌──────────────────────────────┐  ┌──────────────────────────────┐
//! │ IDENTITY REGISTRAR           │  │ USERNAME REGISTRAR           │
//! │  funding depth -> create tx  │─▶│  preorder batch -> confirm   │
//! │  -> identity visible         │  │  domain batch -> confirm     │
//! └──────────────────────────────┘  └──────────────────────────────┘
//!                │                                 │
//!                └────────────┬────────────────────┘
//!                             ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ CONFIRMATION WATCHER  (poll, back off, time out, cancel)          │
//! └──────────────────────────────────────────────────────────────────┘
//!                             │
//!          ┌──────────────────┼───────────────────┐
//!          ▼                  ▼                   ▼
//!   TransitionBroadcaster  ConfirmationSource  PlatformQuery
//! ```
//!
//! # Example
//!
//! ```ignore
//! use idreg_registrar::prelude::*;
//!
//! let platform = Platform::from_shared(Arc::new(MockPlatform::new()));
//! let coordinator = RegistrationCoordinator::new(platform, RegistrarConfig::default())?;
//!
//! let mut flow = coordinator.start(&funding_tx, IdentityKeys::generate(), ["alice"], None)?;
//! let outcome = flow.outcome().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod identity;
pub mod ledger;
pub mod outcome;
pub mod platform;
pub mod username;
pub mod watcher;

mod submit;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{Backoff, RegistrarConfig, RetryPolicy};
pub use coordinator::{CoordinatorStats, FlowHandle, FlowInfo, FlowOutcome, RegistrationCoordinator};
pub use errors::{RegistrarError, Result};
pub use identity::{IdentityKeys, IdentityPhase, IdentityRegistrar};
pub use ledger::{FundingLedger, LedgerStats};
pub use outcome::{IdentityOutcome, Outcome, UsernameOutcome};
pub use platform::{
    Accepted, ConfirmationSource, Platform, PlatformQuery, RejectedReason, TransitionBroadcaster,
};
pub use username::UsernameRegistrar;
pub use watcher::{CancelSignal, ConfirmationWatcher, PollResult, WatchOutcome};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockPlatform, MockPlatformConfig};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{RegistrarConfig, RetryPolicy};
    pub use crate::coordinator::{FlowHandle, FlowOutcome, RegistrationCoordinator};
    pub use crate::errors::{RegistrarError, Result};
    pub use crate::identity::{IdentityKeys, IdentityRegistrar};
    pub use crate::outcome::Outcome;
    pub use crate::platform::{ConfirmationSource, Platform, PlatformQuery, TransitionBroadcaster};
    pub use crate::username::UsernameRegistrar;
    pub use crate::watcher::CancelSignal;

    #[cfg(any(test, feature = "mock"))]
    pub use crate::mock::{MockPlatform, MockPlatformConfig};
}
