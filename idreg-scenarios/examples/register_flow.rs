//! Register an identity and two usernames against the mock platform.
//!
//! Run with: RUST_LOG=idreg_registrar=debug cargo run -p idreg-scenarios --example register_flow

use std::time::Duration;

use anyhow::Context;
use idreg_registrar::{MockPlatformConfig, Outcome};
use idreg_scenarios::{fast_config, init_tracing, Scenario};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let scenario = Scenario::new(
        MockPlatformConfig {
            latency: Duration::from_millis(20),
            ..MockPlatformConfig::default()
        },
        fast_config(8),
    )?;

    let mut flow = scenario.start("demo-funding", &["alice", "alice2"])?;
    info!(identity = %flow.identity_id(), "Flow started");

    let outcome = flow.outcome().await.context("flow stopped without an outcome")?;
    match outcome.usernames {
        Some(Outcome::Completed(labels)) => info!(?labels, "Usernames registered"),
        Some(Outcome::TimedOut(labels)) => info!(?labels, "Usernames timed out"),
        Some(Outcome::Failed(e)) => return Err(e.into()),
        None => info!(identity = outcome.identity.name(), "No usernames registered"),
    }

    let more = flow
        .register_usernames(["alice", "carol"])
        .await?
        .context("registration was cancelled")?;
    info!(outcome = more.name(), "Second batch finished");

    let stats = scenario.coordinator.stats();
    info!(
        started = stats.started,
        completed = stats.completed,
        transitions = scenario.mock.submitted().len(),
        "Done"
    );
    Ok(())
}
