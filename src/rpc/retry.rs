//! Log labels and context for the retry loop around idempotent chain reads.

use crate::rpc::circuit_breaker::CircuitState;
use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(block) = $ctx.block {
            tracing::$level!(method = $ctx.messages.method, block, $($rest)*);
        } else {
            tracing::$level!(method = $ctx.messages.method, $($rest)*);
        }
    }};
}

#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) method: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) timeout: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) missing: Option<&'static str>,
}

/// Per-call context handed to `retry_with_breaker`: which method is running
/// and, when relevant, the block it concerns.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    block: Option<u64>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages) -> Self {
        Self {
            block: None,
            messages,
        }
    }

    pub(crate) fn for_block(messages: &'a RetryMessages, block: u64) -> Self {
        Self {
            block: Some(block),
            messages,
        }
    }

    pub(crate) fn method(&self) -> &'static str {
        self.messages.method
    }

    pub(crate) fn log_permit(&self, state: CircuitState) {
        log_with_retry_ctx!(trace, self, breaker_state = ?state, "rpc permit acquired");
    }

    pub(crate) fn log_circuit_open(&self) {
        log_with_retry_ctx!(warn, self, "{}", self.messages.circuit_open);
    }

    pub(crate) fn log_timeout(&self, attempt: usize, backoff: Duration) {
        let backoff_ms = duration_to_millis(backoff);
        log_with_retry_ctx!(warn, self, attempt, backoff_ms, "{}", self.messages.timeout);
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error) {
        let backoff_ms = duration_to_millis(backoff);
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms,
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }

    pub(crate) fn log_missing(&self, attempt: usize) {
        if let Some(message) = self.messages.missing {
            log_with_retry_ctx!(debug, self, attempt, "{}", message);
        }
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const GET_BLOCK_RETRY: RetryMessages = RetryMessages {
    method: "eth_getBlockByNumber",
    circuit_open: "chain circuit breaker open; rejecting block request",
    timeout: "block request timed out; retrying",
    retry: "block request failed; retrying",
    exhausted: "block request exhausted retries",
    missing: Some("requested block is not available yet"),
};

pub(crate) const GET_LOGS_RETRY: RetryMessages = RetryMessages {
    method: "eth_getLogs",
    circuit_open: "chain circuit breaker open; rejecting log query",
    timeout: "log query timed out; retrying",
    retry: "log query failed; retrying",
    exhausted: "log query exhausted retries",
    missing: None,
};
