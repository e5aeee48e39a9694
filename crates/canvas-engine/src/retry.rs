//! Retry policies with exponential backoff
//!
//! Each error category carries its own policy. The delay before retry `n`
//! (zero-based) is `baseDelay * backoffMultiplier^n`, optionally spread by
//! a jitter fraction, and never more than `maxDelay`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::classify::{Classification, ErrorKind};

/// Backoff settings for one error category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Growth factor per retry (values below 1.0 are treated as 1.0)
    pub backoff_multiplier: f64,
    /// Upper bound for any delay in milliseconds
    pub max_delay_ms: u64,
    /// Random spread as a fraction of the delay (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, 1000)
    }
}

impl RetryPolicy {
    /// Doubling backoff capped at 30s, without jitter
    pub fn exponential(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.0,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::exponential(0, 0)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before retry `attempt`, without jitter.
    ///
    /// Non-decreasing in `attempt` and capped at `max_delay_ms`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms_for(attempt) as u64)
    }

    fn base_delay_ms_for(&self, attempt: u32) -> f64 {
        let multiplier = self.backoff_multiplier.max(1.0);
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base_delay_ms as f64 * multiplier.powi(exponent);
        let cap = self.max_delay_ms as f64;
        if raw.is_finite() {
            raw.min(cap)
        } else {
            cap
        }
    }

    /// Delay before retry `attempt`, with jitter drawn from `rng`
    pub fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay_ms_for(attempt);
        let spread = self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 || base == 0.0 {
            return Duration::from_millis(base as u64);
        }
        let factor = rng.gen_range((1.0 - spread)..=(1.0 + spread));
        let jittered = (base * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(jittered as u64)
    }

    /// Delay before retry `attempt`, with jitter from the thread RNG
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }
}

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// How long to wait before retrying (zero when not retrying)
    pub delay: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// One retry policy per error category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicies {
    pub network: RetryPolicy,
    pub timeout: RetryPolicy,
    pub download: RetryPolicy,
    pub rate_limit: RetryPolicy,
    pub auth: RetryPolicy,
    pub validation: RetryPolicy,
    pub api: RetryPolicy,
    pub storage: RetryPolicy,
    pub system: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            network: RetryPolicy::exponential(5, 1000).with_jitter(0.1),
            timeout: RetryPolicy::exponential(3, 2000).with_jitter(0.1),
            download: RetryPolicy::exponential(3, 1000),
            rate_limit: RetryPolicy::exponential(5, 5000)
                .with_max_delay(60_000)
                .with_jitter(0.2),
            auth: RetryPolicy::none(),
            validation: RetryPolicy::none(),
            api: RetryPolicy::exponential(3, 1000).with_jitter(0.1),
            storage: RetryPolicy::exponential(2, 500),
            system: RetryPolicy::exponential(1, 1000),
        }
    }
}

impl RetryPolicies {
    /// Default retry counts with every delay set to zero
    pub fn without_delays() -> Self {
        let mut policies = Self::default();
        for kind in ErrorKind::ALL {
            let policy = policies.for_kind_mut(kind);
            policy.base_delay_ms = 0;
            policy.max_delay_ms = 0;
            policy.jitter = 0.0;
        }
        policies
    }

    /// Never retry anything
    pub fn disabled() -> Self {
        let mut policies = Self::default();
        for kind in ErrorKind::ALL {
            *policies.for_kind_mut(kind) = RetryPolicy::none();
        }
        policies
    }

    /// Replace the policy for one category
    pub fn with_policy(mut self, kind: ErrorKind, policy: RetryPolicy) -> Self {
        *self.for_kind_mut(kind) = policy;
        self
    }

    pub fn for_kind(&self, kind: ErrorKind) -> &RetryPolicy {
        match kind {
            ErrorKind::Network => &self.network,
            ErrorKind::Timeout => &self.timeout,
            ErrorKind::Download => &self.download,
            ErrorKind::RateLimit => &self.rate_limit,
            ErrorKind::Auth => &self.auth,
            ErrorKind::Validation => &self.validation,
            ErrorKind::Api => &self.api,
            ErrorKind::Storage => &self.storage,
            ErrorKind::System => &self.system,
        }
    }

    fn for_kind_mut(&mut self, kind: ErrorKind) -> &mut RetryPolicy {
        match kind {
            ErrorKind::Network => &mut self.network,
            ErrorKind::Timeout => &mut self.timeout,
            ErrorKind::Download => &mut self.download,
            ErrorKind::RateLimit => &mut self.rate_limit,
            ErrorKind::Auth => &mut self.auth,
            ErrorKind::Validation => &mut self.validation,
            ErrorKind::Api => &mut self.api,
            ErrorKind::Storage => &mut self.storage,
            ErrorKind::System => &mut self.system,
        }
    }

    /// Decide whether to retry after a failure.
    ///
    /// `attempt` is the number of retries already performed. Non-recoverable
    /// failures are never retried, whatever the attempt count.
    pub fn decide(&self, classification: Classification, attempt: u32) -> RetryDecision {
        if !classification.recoverable {
            return RetryDecision::stop();
        }
        let policy = self.for_kind(classification.kind);
        if attempt >= policy.max_retries {
            return RetryDecision::stop();
        }
        RetryDecision {
            should_retry: true,
            delay: policy.delay(attempt),
        }
    }
}
