//! Shared setup for end-to-end registration scenarios.
//!
//! Every scenario runs the real registrars against [`MockPlatform`], which
//! stands in for the funding chain, the broadcast channel and the query
//! service at once.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use idreg_core::{hash, Transaction, TxId};
use idreg_registrar::{
    FlowHandle, FlowOutcome, IdentityKeys, MockPlatform, MockPlatformConfig, Platform,
    RegistrarConfig, RegistrationCoordinator, Result, RetryPolicy,
};
use tracing_subscriber::EnvFilter;

/// Install a tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call repeatedly; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_test_writer()
        .try_init();
}

/// Policies short enough for paused-clock tests.
pub fn fast_config(attempts: u32) -> RegistrarConfig {
    let step = Duration::from_millis(100);
    RegistrarConfig::new()
        .with_submission_policy(RetryPolicy::linear(3, step))
        .with_identity_policy(RetryPolicy::exponential(attempts, step))
        .with_username_policy(RetryPolicy::linear(attempts, step))
}

/// Fresh keys and a credit-lock transaction burning `credit` to them.
pub fn funded(seed: &str, credit: u64) -> (IdentityKeys, Transaction) {
    let keys = IdentityKeys::generate();
    let tx = Transaction::new(TxId(hash(seed.as_bytes())))
        .with_payment(hash(b"change"), 1_000)
        .with_credit_burn(keys.burn.public_key(), credit);
    (keys, tx)
}

/// A mock platform and a coordinator wired to it.
pub struct Scenario {
    /// The simulated platform.
    pub mock: Arc<MockPlatform>,
    /// Coordinator under test.
    pub coordinator: RegistrationCoordinator,
}

impl Scenario {
    /// A scenario with `config` for the platform and `registrar` for flows.
    pub fn new(config: MockPlatformConfig, registrar: RegistrarConfig) -> Result<Self> {
        let mock = Arc::new(MockPlatform::with_config(config));
        let coordinator = RegistrationCoordinator::new(Platform::from_shared(mock.clone()), registrar)?;
        Ok(Self { mock, coordinator })
    }

    /// Default platform behavior with fast policies.
    pub fn standard(attempts: u32) -> Result<Self> {
        Self::new(MockPlatformConfig::default(), fast_config(attempts))
    }

    /// Platform handle for registrars driven by hand.
    pub fn platform(&self) -> Platform {
        Platform::from_shared(self.mock.clone())
    }

    /// Fund a new identity and start its flow.
    pub fn start(&self, seed: &str, labels: &[&str]) -> Result<FlowHandle> {
        let (keys, tx) = funded(seed, 100_000);
        self.coordinator
            .start(&tx, keys, labels.iter().copied(), None)
    }

    /// Start one flow per `(seed, labels)` and wait for every outcome.
    pub async fn run_all(&self, flows: &[(&str, &[&str])]) -> Result<Vec<Option<FlowOutcome>>> {
        let mut handles = flows
            .iter()
            .map(|(seed, labels)| self.start(seed, labels))
            .collect::<Result<Vec<_>>>()?;
        Ok(join_all(handles.iter_mut().map(FlowHandle::outcome)).await)
    }
}
