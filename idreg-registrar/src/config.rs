//! Retry policies and registrar configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RegistrarError, Result};

/// How the wait between polls grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay every time.
    #[default]
    Linear,
    /// Delay doubles after every poll.
    Exponential,
    /// Delay grows by `growth_percent` after every poll.
    Scaled {
        /// Growth per poll, in percent.
        growth_percent: u16,
    },
}

/// Bounded polling/retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth rule.
    pub backoff: Backoff,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            backoff: Backoff::Linear,
            max_delay_ms: None,
        }
    }

    /// Doubling delay between attempts.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential,
            ..Self::linear(max_attempts, base_delay)
        }
    }

    /// Delay growing by `growth_percent` per attempt.
    pub fn scaled(max_attempts: u32, base_delay: Duration, growth_percent: u16) -> Self {
        Self {
            backoff: Backoff::Scaled { growth_percent },
            ..Self::linear(max_attempts, base_delay)
        }
    }

    /// Cap every delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(max_delay.as_millis() as u64);
        self
    }

    /// Base delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Wait after attempt `attempt` (1-based) before the next one.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);
        let base = u128::from(self.base_delay_ms);
        let cap = self.max_delay_ms.map(u128::from).unwrap_or(u128::from(u64::MAX));

        let mut delay = base;
        match self.backoff {
            Backoff::Linear => {}
            Backoff::Exponential => {
                for _ in 0..steps {
                    delay = delay.saturating_mul(2);
                    if delay >= cap {
                        break;
                    }
                }
            }
            Backoff::Scaled { growth_percent } => {
                let factor = 100 + u128::from(growth_percent);
                for _ in 0..steps {
                    delay = delay.saturating_mul(factor) / 100;
                    if delay >= cap {
                        break;
                    }
                }
            }
        }
        Duration::from_millis(delay.min(cap) as u64)
    }

    /// Sum of every delay the policy can incur.
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|n| self.delay_for(n)).sum()
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RegistrarError::Config(
                "max_attempts must be at least 1".into(),
            ));
        }
        if let Some(cap) = self.max_delay_ms {
            if cap < self.base_delay_ms {
                return Err(RegistrarError::Config(format!(
                    "max_delay_ms ({}) is below base_delay_ms ({})",
                    cap, self.base_delay_ms
                )));
            }
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::scaled(10, Duration::from_secs(5), 20)
    }
}

/// Configuration shared by the registrars and the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Depth at which a funding transaction counts as locked.
    pub funding_confirmations: u64,

    /// Retries for transient broadcast failures.
    pub submission_policy: RetryPolicy,

    /// Polling for the identity to appear.
    pub identity_policy: RetryPolicy,

    /// Polling for preorder documents.
    pub preorder_policy: RetryPolicy,

    /// Polling for domain documents.
    pub domain_policy: RetryPolicy,

    /// Parent domain for bare labels.
    pub parent_domain: String,
}

impl RegistrarConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self {
            funding_confirmations: 1,
            submission_policy: RetryPolicy::linear(3, Duration::from_millis(500)),
            identity_policy: RetryPolicy::default(),
            preorder_policy: RetryPolicy::default(),
            domain_policy: RetryPolicy::default(),
            parent_domain: idreg_core::DEFAULT_PARENT_DOMAIN.to_string(),
        }
    }

    /// Set funding depth.
    pub fn with_funding_confirmations(mut self, depth: u64) -> Self {
        self.funding_confirmations = depth;
        self
    }

    /// Set submission retries.
    pub fn with_submission_policy(mut self, policy: RetryPolicy) -> Self {
        self.submission_policy = policy;
        self
    }

    /// Set identity polling.
    pub fn with_identity_policy(mut self, policy: RetryPolicy) -> Self {
        self.identity_policy = policy;
        self
    }

    /// Set preorder polling.
    pub fn with_preorder_policy(mut self, policy: RetryPolicy) -> Self {
        self.preorder_policy = policy;
        self
    }

    /// Set domain polling.
    pub fn with_domain_policy(mut self, policy: RetryPolicy) -> Self {
        self.domain_policy = policy;
        self
    }

    /// Set both username polling policies.
    pub fn with_username_policy(self, policy: RetryPolicy) -> Self {
        self.with_preorder_policy(policy).with_domain_policy(policy)
    }

    /// Set parent domain.
    pub fn with_parent_domain(mut self, parent: impl Into<String>) -> Self {
        self.parent_domain = parent.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.funding_confirmations == 0 {
            return Err(RegistrarError::Config(
                "funding_confirmations must be at least 1".into(),
            ));
        }
        if self.parent_domain.is_empty() {
            return Err(RegistrarError::Config("parent_domain is required".into()));
        }
        for policy in [
            &self.submission_policy,
            &self.identity_policy,
            &self.preorder_policy,
            &self.domain_policy,
        ] {
            policy.validate()?;
        }
        Ok(())
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_linear_delays() {
        let p = RetryPolicy::linear(3, ms(100));
        assert_eq!(p.delay_for(1), ms(100));
        assert_eq!(p.delay_for(2), ms(100));
        assert_eq!(p.total_delay(), ms(200));
    }

    #[test]
    fn test_exponential_delays_and_cap() {
        let p = RetryPolicy::exponential(6, ms(100));
        assert_eq!(p.delay_for(1), ms(100));
        assert_eq!(p.delay_for(2), ms(200));
        assert_eq!(p.delay_for(4), ms(800));

        let capped = p.with_max_delay(ms(300));
        assert_eq!(capped.delay_for(2), ms(200));
        assert_eq!(capped.delay_for(3), ms(300));
        assert_eq!(capped.delay_for(60), ms(300));
    }

    #[test]
    fn test_scaled_delays() {
        let p = RetryPolicy::scaled(5, ms(1000), 20);
        assert_eq!(p.delay_for(1), ms(1000));
        assert_eq!(p.delay_for(2), ms(1200));
        assert_eq!(p.delay_for(3), ms(1440));

        let p = RetryPolicy::scaled(5, ms(1000), 50);
        assert_eq!(p.delay_for(3), ms(2250));
    }

    #[test]
    fn test_huge_attempt_count_saturates() {
        let p = RetryPolicy::exponential(u32::MAX, ms(1));
        assert_eq!(p.delay_for(200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::linear(1, ms(0)).validate().is_ok());
        assert!(RetryPolicy::linear(0, ms(10)).validate().is_err());
        assert!(RetryPolicy::linear(3, ms(500))
            .with_max_delay(ms(100))
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = RegistrarConfig::new()
            .with_funding_confirmations(6)
            .with_username_policy(RetryPolicy::linear(5, ms(10)))
            .with_parent_domain("test");

        assert_eq!(config.funding_confirmations, 6);
        assert_eq!(config.preorder_policy.max_attempts, 5);
        assert_eq!(config.domain_policy.max_attempts, 5);
        assert_eq!(config.parent_domain, "test");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(RegistrarConfig::default().validate().is_ok());
        assert!(RegistrarConfig::new()
            .with_funding_confirmations(0)
            .validate()
            .is_err());
        assert!(RegistrarConfig::new()
            .with_identity_policy(RetryPolicy::linear(0, ms(1)))
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_serde() {
        let config = RegistrarConfig::new().with_submission_policy(RetryPolicy::exponential(4, ms(250)));
        let json = serde_json::to_string(&config).unwrap();
        let back: RegistrarConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.submission_policy, config.submission_policy);
        assert!(json.contains("\"exponential\""));
    }
}
