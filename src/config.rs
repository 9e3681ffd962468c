//! Session configuration.

use std::time::Duration;

use serde_json::Value;

use crate::auth::Credentials;
use crate::error::{SessionError, SessionResult};
use crate::network::DEFAULT_WS_URL;

pub const ENV_CLIENT_ID: &str = "DERIBIT_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "DERIBIT_CLIENT_SECRET";
pub const ENV_WS_URL: &str = "DERIBIT_WS_URL";

/// Token-bucket and retry parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens held by the bucket.
    pub capacity: u32,
    /// Tokens added per refill period.
    pub refill_amount: u32,
    pub refill_period: Duration,
    /// Maximum permits that may be queued waiting for tokens.
    pub queue_limit: u32,
    /// Pause before retrying when the waiter queue is full.
    pub queue_full_backoff: Duration,
    /// Backoff step for rate-limit retries; the n-th retry waits `n * retry_step`.
    pub retry_step: Duration,
    /// Retries allowed after a "too many requests" reply.
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 50_000,
            refill_amount: 1_000,
            refill_period: Duration::from_millis(100),
            queue_limit: 5_000,
            queue_full_backoff: Duration::from_millis(100),
            retry_step: Duration::from_millis(100),
            max_retries: 5,
        }
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(500),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        let base_ms = self.base_delay.as_millis() as u64;
        let scaled = base_ms.saturating_mul(1u64 << exp);

        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % jitter_ms
        };

        let cap = self.max_delay.as_millis() as u64;
        Duration::from_millis(scaled.saturating_add(jitter).min(cap))
    }
}

/// What happens when the post-authentication probe call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbePolicy {
    /// Log the failure and keep the session authenticated.
    #[default]
    BestEffort,
    /// Treat the failure as an authentication failure.
    Required,
}

/// A call issued right after every successful authentication,
/// e.g. `private/get_account_summary` to warm account state.
#[derive(Debug, Clone, PartialEq)]
pub struct PostAuthProbe {
    pub method: String,
    pub params: Value,
    pub policy: ProbePolicy,
}

impl PostAuthProbe {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            policy: ProbePolicy::BestEffort,
        }
    }

    pub fn required(mut self) -> Self {
        self.policy = ProbePolicy::Required;
        self
    }
}

/// Complete configuration for a [`DeribitClient`](crate::client::DeribitClient).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub credentials: Option<Credentials>,
    /// Bound on a single transport open.
    pub connect_timeout: Duration,
    /// Deadline applied to calls that do not carry their own.
    pub request_timeout: Duration,
    /// Token weight of an ordinary call.
    pub default_weight: u32,
    /// Token weight of a call that hits the matching engine.
    pub matching_weight: u32,
    pub rate_limit: RateLimitConfig,
    pub reconnect: ReconnectConfig,
    /// Buffer of the inbound subscription broadcast.
    pub inbound_capacity: usize,
    pub post_auth_probe: Option<PostAuthProbe>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            credentials: None,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            default_weight: 500,
            matching_weight: 2_500,
            rate_limit: RateLimitConfig::default(),
            reconnect: ReconnectConfig::default(),
            inbound_capacity: 1_024,
            post_auth_probe: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `DERIBIT_WS_URL`, `DERIBIT_CLIENT_ID` and `DERIBIT_CLIENT_SECRET`.
    pub fn from_env() -> SessionResult<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(ENV_WS_URL) {
            config.url = url;
        }
        match (std::env::var(ENV_CLIENT_ID), std::env::var(ENV_CLIENT_SECRET)) {
            (Ok(id), Ok(secret)) => config.credentials = Some(Credentials::new(id, secret)),
            (Err(_), Err(_)) => {}
            _ => {
                return Err(SessionError::Config(format!(
                    "{} and {} must be set together",
                    ENV_CLIENT_ID, ENV_CLIENT_SECRET
                )))
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SessionError::Config(format!(
                "url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        let limits = &self.rate_limit;
        if limits.capacity == 0 || limits.refill_amount == 0 || limits.queue_limit == 0 {
            return Err(SessionError::Config(
                "rate limit capacity, refill amount and queue limit must be positive".into(),
            ));
        }
        if limits.refill_period.is_zero() {
            return Err(SessionError::Config("refill period must be positive".into()));
        }
        for (name, weight) in [
            ("default_weight", self.default_weight),
            ("matching_weight", self.matching_weight),
        ] {
            if weight == 0 || weight > limits.capacity {
                return Err(SessionError::Config(format!(
                    "{} must be in 1..={}, got {}",
                    name, limits.capacity, weight
                )));
            }
        }
        if self.inbound_capacity == 0 {
            return Err(SessionError::Config("inbound capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.default_weight, 500);
        assert_eq!(config.matching_weight, 2_500);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.rate_limit.capacity, 50_000);
        assert_eq!(config.rate_limit.refill_amount, 1_000);
        assert_eq!(config.rate_limit.queue_limit, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_http_url() {
        let config = SessionConfig {
            url: "https://www.deribit.com".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_weight_above_capacity() {
        let config = SessionConfig {
            matching_weight: 60_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_delay_no_jitter() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: Duration::ZERO,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_reconnect_delay_caps_at_max() {
        let config = ReconnectConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(500),
        };
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(5));
    }

    #[test]
    fn test_reconnect_delay_jitter_bounded() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(50),
        };
        for _ in 0..100 {
            let d = config.delay_for_attempt(1);
            assert!(d >= Duration::from_millis(100) && d < Duration::from_millis(150));
        }
    }

    #[test]
    fn test_post_auth_probe_policy() {
        let probe = PostAuthProbe::new("private/get_account_summary", serde_json::json!({}));
        assert_eq!(probe.policy, ProbePolicy::BestEffort);
        assert_eq!(probe.required().policy, ProbePolicy::Required);
    }
}
