//! Transport settings shared by the chain and hub clients.

use crate::rpc::circuit_breaker::CircuitBreakerSettings;
use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 16;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: usize = 4;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 4_000;

#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
    /// Attempts per idempotent read. Hub writes are always sent once.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_request_body_bytes: usize,
    pub max_response_body_bytes: usize,
    pub breaker: CircuitBreakerSettings,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            max_request_body_bytes: DEFAULT_HTTP_BODY_LIMIT_BYTES,
            max_response_body_bytes: DEFAULT_HTTP_BODY_LIMIT_BYTES,
            breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl RpcClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must not be shorter than initial_backoff");
        }
        if self.max_request_body_bytes == 0 || self.max_response_body_bytes == 0 {
            bail!("http body limits must be greater than 0");
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), doubling up to `max_backoff`.
    pub(crate) fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    pub(crate) fn body_limits(&self) -> (u32, u32) {
        let clamp = |bytes: usize| bytes.min(u32::MAX as usize) as u32;
        (
            clamp(self.max_request_body_bytes),
            clamp(self.max_response_body_bytes),
        )
    }
}
