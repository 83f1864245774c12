//! Retry and backoff policy
//!
//! `RetryPolicy::next_delay` is a pure function of the attempt number and the
//! configured parameters (plus optional additive jitter).

use crate::duration_ms;
use crate::error::ConfigError;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Lower bound of the jitter factor applied to a delay
pub const JITTER_MIN: f64 = 0.1;
/// Upper bound of the jitter factor applied to a delay
pub const JITTER_MAX: f64 = 0.3;

/// Shape of the backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// initial * multiplier^(attempt - 1)
    #[default]
    Exponential,
    /// initial * (attempt + 1)
    Linear,
    /// initial, every time
    Fixed,
}

/// Configuration for operation retries
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// When false, operations run exactly once
    pub enabled: bool,
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound on any computed delay
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor for the exponential policy
    pub multiplier: f64,
    /// Add 10-30% random delay on top of the computed value
    pub jitter: bool,
    pub policy: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            policy: BackoffPolicy::Exponential,
        }
    }
}

impl RetryConfig {
    /// Check the invariants the policy relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.initial_delay.is_zero() {
            return Err(ConfigError::ZeroInitialDelay);
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::MaxBelowInitial {
                initial_ms: self.initial_delay.as_millis(),
                max_ms: self.max_delay.as_millis(),
            });
        }
        if self.policy == BackoffPolicy::Exponential
            && !(self.multiplier.is_finite() && self.multiplier > 1.0)
        {
            return Err(ConfigError::Multiplier(self.multiplier));
        }
        Ok(())
    }
}

/// Computes delays between attempts from a [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based), without jitter
    pub fn unjittered_delay(&self, attempt: u32) -> Duration {
        let cfg = &self.config;
        let raw = match cfg.policy {
            BackoffPolicy::Exponential => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = cfg.initial_delay.as_secs_f64() * cfg.multiplier.powi(exp);
                if !secs.is_finite() || secs >= cfg.max_delay.as_secs_f64() {
                    cfg.max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
            BackoffPolicy::Linear => cfg.initial_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffPolicy::Fixed => cfg.initial_delay,
        };
        raw.min(cfg.max_delay)
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// Jitter is strictly additive; the result is clamped to `max_delay` last.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.unjittered_delay(attempt);
        if !self.config.jitter {
            return delay;
        }

        let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        delay
            .saturating_add(delay.mul_f64(factor))
            .min(self.config.max_delay)
    }
}
