//! Retry policy: a stateless decision function plus a backoff calculator
//!
//! The policy never looks at HTTP methods; whether a request may be resent
//! at all is decided by the pipeline before it consults the policy.
//!
//! ## Backoff
//! `delay(n) = min(max_delay, base_delay * multiplier^(n-1))`, plus a uniform
//! jitter of up to 10% of that value when enabled.

use std::time::Duration;

use rand::Rng;
use resilink_common::error::CommonResult;
use resilink_domain::{ApiError, HttpMethod, RetryConfig, TransportErrorKind};

/// Fraction of the computed delay added at most as jitter
pub const JITTER_RATIO: f64 = 0.1;

/// Ceiling on the exponent so huge attempt numbers cannot overflow
const MAX_BACKOFF_EXPONENT: i32 = 64;

/// What a failed attempt produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    Status(u16),
    Error(TransportErrorKind),
}

impl RetryTrigger {
    /// Trigger for an error returned by the chain, if it has one
    pub fn from_error(err: &ApiError) -> Option<Self> {
        err.status().map(Self::Status).or_else(|| err.transport_kind().map(Self::Error))
    }
}

/// Immutable retry policy built from a validated [`RetryConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { config: RetryConfig::default() }
    }
}

impl RetryPolicy {
    /// Validate `config` and wrap it
    pub fn from_config(config: RetryConfig) -> CommonResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Few, slow attempts for critical writes
    pub fn conservative() -> Self {
        Self {
            config: RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
                retryable_status_codes: vec![502, 503, 504],
                ..RetryConfig::default()
            },
        }
    }

    /// Many quick attempts for idempotent reads
    pub fn aggressive() -> Self {
        Self {
            config: RetryConfig {
                max_attempts: 5,
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(8),
                multiplier: 1.5,
                ..RetryConfig::default()
            },
        }
    }

    /// Long base delay tuned for 429/503 and honoring `Retry-After`
    pub fn rate_limited() -> Self {
        Self {
            config: RetryConfig {
                max_attempts: 4,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
                retryable_status_codes: vec![429, 503],
                respect_retry_after: true,
                ..RetryConfig::default()
            },
        }
    }

    /// Single attempt, never retries
    pub fn none() -> Self {
        Self {
            config: RetryConfig {
                max_attempts: 1,
                retryable_status_codes: Vec::new(),
                retryable_error_kinds: Vec::new(),
                ..RetryConfig::default()
            },
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether the pipeline may resend `method` without an explicit opt-in
    pub fn retries_method(&self, method: HttpMethod) -> bool {
        self.config.retry_methods.contains(&method)
    }

    /// `attempt` is the number of attempts already made (1 after the first)
    pub fn should_retry(&self, attempt: u32, trigger: RetryTrigger) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        match trigger {
            RetryTrigger::Status(status) => self.config.retryable_status_codes.contains(&status),
            RetryTrigger::Error(kind) => self.config.retryable_error_kinds.contains(&kind),
        }
    }

    /// [`should_retry`](Self::should_retry) for an error from the chain;
    /// errors without a status or transport kind are never retried
    pub fn should_retry_error(&self, attempt: u32, err: &ApiError) -> bool {
        RetryTrigger::from_error(err).is_some_and(|trigger| self.should_retry(attempt, trigger))
    }

    /// Backoff for retry number `attempt` (1-based) without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1))
            .unwrap_or(MAX_BACKOFF_EXPONENT)
            .min(MAX_BACKOFF_EXPONENT);
        let base = self.config.base_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        let raw = base * self.config.multiplier.powi(exponent);
        if !raw.is_finite() || raw >= max {
            self.config.max_delay
        } else {
            Duration::from_secs_f64(raw)
        }
    }

    /// Backoff for retry number `attempt`, jittered when enabled
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// [`delay_for`](Self::delay_for) with a caller-supplied random source
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let computed = self.base_delay_for(attempt);
        if !self.config.jitter || computed.is_zero() {
            return computed;
        }
        let extra = rng.gen_range(0.0..=JITTER_RATIO);
        computed + computed.mul_f64(extra)
    }

    /// Delay before retrying after `err`, preferring the server's
    /// `Retry-After` when configured, capped at `max_delay`
    pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) if self.config.respect_retry_after => hint.min(self.config.max_delay),
            _ => self.delay_for(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use resilink_domain::{ApiResponse, Headers};

    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::from_config(RetryConfig { jitter: false, ..RetryConfig::default() }).unwrap()
    }

    #[test]
    fn test_should_retry_respects_attempt_budget() {
        let policy = no_jitter();
        assert!(policy.should_retry(1, RetryTrigger::Status(503)));
        assert!(policy.should_retry(2, RetryTrigger::Status(503)));
        assert!(!policy.should_retry(3, RetryTrigger::Status(503)));
    }

    #[test]
    fn test_should_retry_sets() {
        let policy = no_jitter();
        assert!(policy.should_retry(1, RetryTrigger::Status(429)));
        assert!(policy.should_retry(1, RetryTrigger::Status(408)));
        assert!(!policy.should_retry(1, RetryTrigger::Status(404)));
        assert!(!policy.should_retry(1, RetryTrigger::Status(501)));
        assert!(policy.should_retry(1, RetryTrigger::Error(TransportErrorKind::ConnectTimeout)));
        assert!(policy.should_retry(1, RetryTrigger::Error(TransportErrorKind::Connection)));
        assert!(!policy.should_retry(1, RetryTrigger::Error(TransportErrorKind::Tls)));
        assert!(!policy.should_retry(1, RetryTrigger::Error(TransportErrorKind::Other)));
    }

    #[test]
    fn test_should_retry_error_without_trigger() {
        let policy = no_jitter();
        assert!(!policy.should_retry_error(1, &ApiError::Cancelled));
        assert!(!policy.should_retry_error(1, &ApiError::Auth("expired".into())));
        let server = ApiError::from_response(ApiResponse::new(502, Headers::new(), Vec::new()))
            .unwrap_err();
        assert!(policy.should_retry_error(1, &server));
    }

    #[test]
    fn test_backoff_without_jitter() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=6 {
            let computed = policy.base_delay_for(attempt);
            for _ in 0..50 {
                let delay = policy.delay_with_rng(attempt, &mut rng);
                assert!(delay >= computed);
                assert!(delay <= computed.mul_f64(1.1));
            }
        }
    }

    #[test]
    fn test_retry_after_capped() {
        let policy = no_jitter();
        assert_eq!(policy.delay_after(1, Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(policy.delay_after(1, Some(Duration::from_secs(600))), Duration::from_secs(30));
        assert_eq!(policy.delay_after(2, None), Duration::from_secs(2));

        let ignoring = RetryPolicy::from_config(RetryConfig {
            jitter: false,
            respect_retry_after: false,
            ..RetryConfig::default()
        })
        .unwrap();
        assert_eq!(ignoring.delay_after(1, Some(Duration::from_secs(5))), Duration::from_secs(1));
    }

    #[test]
    fn test_presets_are_valid() {
        for policy in [
            RetryPolicy::conservative(),
            RetryPolicy::aggressive(),
            RetryPolicy::rate_limited(),
            RetryPolicy::none(),
        ] {
            assert!(policy.config().validate().is_ok());
        }
        assert!(!RetryPolicy::none().should_retry(0, RetryTrigger::Status(503)));
        assert!(RetryPolicy::rate_limited().should_retry(1, RetryTrigger::Status(429)));
        assert!(RetryPolicy::default().retries_method(HttpMethod::Get));
        assert!(!RetryPolicy::default().retries_method(HttpMethod::Post));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        assert!(RetryPolicy::from_config(RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        })
        .is_err());
    }
}
