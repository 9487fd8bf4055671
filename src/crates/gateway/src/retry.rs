//! Retry logic with exponential backoff
//!
//! Classifies provider failures into retry decisions. The policy is plain data
//! (configurable per instance); a [`RetryController`] carries the per-job state.

use crate::state::InstanceState;
use llm::{ErrorKind, LlmError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Upper bound for the jitter fraction.
pub const MAX_JITTER: f64 = 0.5;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total provider calls allowed per job (first call included)
    pub max_attempts: u32,

    /// Delay before the first backoff retry (in milliseconds)
    pub base_delay_ms: u64,

    /// Maximum backoff delay (in milliseconds)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub multiplier: f64,

    /// Fixed delay after a maintenance response (in milliseconds)
    pub maintenance_delay_ms: u64,

    /// Random spread applied to backoff delays, as a fraction (0.0-0.5)
    pub jitter: f64,

    /// Seed for the jitter generator; unset draws from OS entropy
    pub jitter_seed: Option<u64>,

    /// Overrides the computed terminal deadline of a job (in seconds)
    pub job_deadline_secs: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            maintenance_delay_ms: 30_000,
            jitter: 0.1,
            jitter_seed: None,
            job_deadline_secs: None,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if !(0.0..=MAX_JITTER).contains(&self.jitter) {
            return Err(format!("retry.jitter must be within 0.0..={}", MAX_JITTER));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("retry.multiplier must be at least 1.0".to_string());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err("retry.base_delay_ms exceeds retry.max_delay_ms".to_string());
        }
        Ok(())
    }

    /// Calculate backoff delay for a given retry number (0-indexed), before jitter
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let delay_ms = (self.base_delay_ms as f64) * self.multiplier.powi(retry.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped_ms as u64)
    }

    pub fn maintenance_delay(&self) -> Duration {
        Duration::from_millis(self.maintenance_delay_ms)
    }

    /// Generator for jitter draws; seeded when `jitter_seed` is set.
    pub fn rng(&self) -> StdRng {
        match self.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Longest a job may live from submission until its terminal result.
    ///
    /// Sum over the attempt budget of the larger of the backoff and maintenance
    /// delays (widened by the jitter bound), plus one request timeout and one
    /// request interval per attempt.
    pub fn job_deadline(&self, request_timeout: Duration, request_interval: Duration) -> Duration {
        if let Some(secs) = self.job_deadline_secs {
            return Duration::from_secs(secs);
        }

        let waits: Duration = (0..self.max_attempts)
            .map(|i| self.calculate_delay(i).max(self.maintenance_delay()))
            .sum();

        waits.mul_f64(1.0 + self.jitter) + (request_timeout + request_interval) * self.max_attempts
    }
}

/// Outcome of classifying one failed provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Wait `delay`, showing `state`, then call the provider again.
    Retry { delay: Duration, state: InstanceState },
    /// Stop; the error is the job's terminal result.
    Fail,
}

/// Per-job retry bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    attempts: u32,
    backoff_retries: u32,
    malformed_retried: bool,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            backoff_retries: 0,
            malformed_retried: false,
        }
    }

    /// Count a provider call about to be made.
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Provider calls made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decide what follows a failed call.
    pub fn decide<R: Rng + ?Sized>(&mut self, error: &LlmError, rng: &mut R) -> RetryDecision {
        let decision = match error.kind() {
            ErrorKind::AuthError | ErrorKind::ContextTooLong | ErrorKind::ModelUnavailable => {
                RetryDecision::Fail
            }
            _ if self.attempts >= self.policy.max_attempts => RetryDecision::Fail,
            ErrorKind::MalformedResponse => {
                if self.malformed_retried {
                    RetryDecision::Fail
                } else {
                    self.malformed_retried = true;
                    RetryDecision::Retry {
                        delay: Duration::ZERO,
                        state: InstanceState::Retrying,
                    }
                }
            }
            ErrorKind::Maintenance => RetryDecision::Retry {
                delay: self.policy.maintenance_delay(),
                state: InstanceState::Maintenance,
            },
            ErrorKind::RateLimited => RetryDecision::Retry {
                delay: self.next_backoff(rng),
                state: InstanceState::RateLimited,
            },
            ErrorKind::Timeout | ErrorKind::TransportError => RetryDecision::Retry {
                delay: self.next_backoff(rng),
                state: InstanceState::Retrying,
            },
        };

        debug!(
            kind = %error.kind(),
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            decision = ?decision,
            "Classified provider failure"
        );
        decision
    }

    fn next_backoff<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.policy.calculate_delay(self.backoff_retries);
        self.backoff_retries += 1;
        apply_jitter(delay, self.policy.jitter, rng)
    }
}

/// Spread `delay` uniformly within ±`jitter` of itself.
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, jitter: f64, rng: &mut R) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(MAX_JITTER);
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1_000);
        assert_eq!(policy.max_delay_ms, 60_000);
        assert_eq!(policy.jitter, 0.1);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_calculate_delay_exponential_and_capped() {
        let policy = policy();
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_policies() {
        assert!(RetryPolicy { max_attempts: 0, ..policy() }.validate().is_err());
        assert!(RetryPolicy { jitter: 0.6, ..policy() }.validate().is_err());
        assert!(RetryPolicy { multiplier: 0.5, ..policy() }.validate().is_err());
    }

    #[test]
    fn test_terminal_kinds_never_retry() {
        let mut rng = policy().rng();
        for err in [
            LlmError::AuthError("bad key".into()),
            LlmError::ContextTooLong("too long".into()),
            LlmError::ModelUnavailable("gone".into()),
        ] {
            let mut controller = RetryController::new(policy());
            controller.record_attempt();
            assert_eq!(controller.decide(&err, &mut rng), RetryDecision::Fail);
        }
    }

    #[test]
    fn test_rate_limit_backs_off_exponentially() {
        let mut rng = policy().rng();
        let mut controller = RetryController::new(policy());
        let err = LlmError::RateLimited("429".into());

        controller.record_attempt();
        assert_eq!(
            controller.decide(&err, &mut rng),
            RetryDecision::Retry { delay: Duration::from_secs(1), state: InstanceState::RateLimited }
        );
        controller.record_attempt();
        assert_eq!(
            controller.decide(&err, &mut rng),
            RetryDecision::Retry { delay: Duration::from_secs(2), state: InstanceState::RateLimited }
        );
    }

    #[test]
    fn test_maintenance_uses_fixed_delay() {
        let mut rng = policy().rng();
        let mut controller = RetryController::new(policy());
        controller.record_attempt();
        assert_eq!(
            controller.decide(&LlmError::Maintenance("503".into()), &mut rng),
            RetryDecision::Retry { delay: Duration::from_secs(30), state: InstanceState::Maintenance }
        );
    }

    #[test]
    fn test_malformed_retries_once_immediately() {
        let mut rng = policy().rng();
        let mut controller = RetryController::new(policy());
        let err = LlmError::MalformedResponse("no choices".into());

        controller.record_attempt();
        assert_eq!(
            controller.decide(&err, &mut rng),
            RetryDecision::Retry { delay: Duration::ZERO, state: InstanceState::Retrying }
        );
        controller.record_attempt();
        assert_eq!(controller.decide(&err, &mut rng), RetryDecision::Fail);
    }

    #[test]
    fn test_budget_exhaustion() {
        let mut rng = policy().rng();
        let mut controller = RetryController::new(RetryPolicy { max_attempts: 2, ..policy() });
        let err = LlmError::Timeout("slow".into());

        controller.record_attempt();
        assert!(matches!(controller.decide(&err, &mut rng), RetryDecision::Retry { .. }));
        controller.record_attempt();
        assert_eq!(controller.decide(&err, &mut rng), RetryDecision::Fail);
    }

    #[test]
    fn test_seeded_jitter_is_reproducible_and_bounded() {
        let policy = RetryPolicy { jitter: 0.25, jitter_seed: Some(7), ..policy() };
        let err = LlmError::TransportError("reset".into());

        let run = || {
            let mut rng = policy.rng();
            let mut controller = RetryController::new(policy.clone());
            (0..3)
                .map(|_| {
                    controller.record_attempt();
                    controller.decide(&err, &mut rng)
                })
                .collect::<Vec<_>>()
        };

        let first = run();
        assert_eq!(first, run());

        if let RetryDecision::Retry { delay, .. } = &first[0] {
            assert!(*delay >= Duration::from_millis(750) && *delay <= Duration::from_millis(1250));
        } else {
            panic!("expected a retry");
        }
    }

    #[test]
    fn test_job_deadline() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1_000,
            maintenance_delay_ms: 3_000,
            jitter: 0.0,
            ..Default::default()
        };
        // 2 * max(backoff, 3s) + 2 * (10s + 1s)
        assert_eq!(
            policy.job_deadline(Duration::from_secs(10), Duration::from_secs(1)),
            Duration::from_secs(28)
        );

        let fixed = RetryPolicy { job_deadline_secs: Some(5), ..policy };
        assert_eq!(fixed.job_deadline(Duration::from_secs(10), Duration::ZERO), Duration::from_secs(5));
    }
}
