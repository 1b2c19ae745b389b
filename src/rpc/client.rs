//! HTTP JSON-RPC transport shared by the chain and hub clients: request
//! timeouts, circuit breaker gating, metrics, and the retry loop used for
//! idempotent reads.

use crate::rpc::auth::RpcAuth;
use crate::rpc::circuit_breaker::{RpcCircuitBreaker, CircuitBreakerError};
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::retry::RetryContext;
use anyhow::{anyhow, Result};
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::http_helpers::HttpError;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::transport::Error as HttpTransportError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use std::{future::Future, sync::Arc};
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    CircuitOpen { endpoint: &'static str },
    /// The node has not produced the requested block yet.
    BlockNotFound { number: u64 },
    ResponseTooLarge { method: &'static str },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::CircuitOpen { endpoint } => {
                write!(f, "{endpoint} rpc circuit breaker is open")
            }
            RpcError::BlockNotFound { number } => write!(f, "block {number} not found"),
            RpcError::ResponseTooLarge { method } => {
                write!(f, "rpc {method} response exceeded HTTP size limits")
            }
        }
    }
}

impl std::error::Error for RpcError {}

impl From<CircuitBreakerError> for RpcError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen { endpoint } => RpcError::CircuitOpen { endpoint },
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RpcTransport {
    url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
    breaker: RpcCircuitBreaker,
}

impl RpcTransport {
    pub(crate) fn new(
        name: &'static str,
        url: impl Into<String>,
        auth: &RpcAuth,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let url = url.into();
        let (max_request_size, max_response_size) = options.body_limits();
        let client = HttpClientBuilder::default()
            .set_headers(auth.headers()?)
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_size)
            .max_response_size(max_response_size)
            .build(&url)
            .map_err(|err| anyhow!("failed to build {name} RPC client: {err}"))?;

        let breaker = RpcCircuitBreaker::new(name, options.breaker);

        Ok(Self {
            url: Arc::new(url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
            breaker,
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn breaker(&self) -> &RpcCircuitBreaker {
        &self.breaker
    }

    pub(crate) fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    /// One request bounded by the configured timeout.
    pub(crate) async fn call<R>(&self, method: &'static str, params: ArrayParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        timeout(self.options.request_timeout, self.client.request(method, params))
            .await
            .map_err(|_| RpcError::Timeout { method })?
            .map_err(|err| map_rpc_error(method, err))
    }

    /// Sends a non-idempotent request exactly once, still gated by the breaker.
    pub(crate) async fn call_once<R>(&self, method: &'static str, params: ArrayParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        if let Err(err) = self.breaker.before_request() {
            self.metrics.record_rejected();
            tracing::warn!(method, "circuit breaker open; request not sent");
            return Err(RpcError::from(err).into());
        }

        let start = Instant::now();
        let result = self.call(method, params).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                self.metrics.record_success(elapsed);
                self.breaker.record_success();
            }
            Err(err) => {
                if matches!(err.downcast_ref::<RpcError>(), Some(RpcError::Timeout { .. })) {
                    self.metrics.record_timeout(elapsed);
                } else {
                    self.metrics.record_failure(elapsed);
                }
                self.breaker.record_failure();
            }
        }

        result
    }

    /// Retry loop for idempotent reads: breaker gating, metrics, exponential
    /// backoff and consistent logging.
    pub(crate) async fn retry_with_breaker<T, F, Fut>(
        &self,
        context: RetryContext<'_>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match self.breaker.before_request() {
                Ok(state) => context.log_permit(state),
                Err(err) => {
                    self.metrics.record_rejected();
                    context.log_circuit_open();
                    return Err(RpcError::from(err).into());
                }
            }

            attempt += 1;
            let start = Instant::now();

            let err = match operation().await {
                Ok(value) => {
                    self.metrics.record_success(start.elapsed());
                    self.breaker.record_success();
                    tracing::trace!(method = context.method(), attempt, "rpc call succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };

            let elapsed = start.elapsed();
            let timed_out = match err.downcast_ref::<RpcError>() {
                Some(RpcError::BlockNotFound { .. }) => {
                    // The node answered; the block simply does not exist yet.
                    self.metrics.record_success(elapsed);
                    self.breaker.record_success();
                    context.log_missing(attempt);
                    return Err(err);
                }
                Some(RpcError::ResponseTooLarge { .. }) => {
                    self.metrics.record_failure(elapsed);
                    self.breaker.record_failure();
                    context.log_exhausted(attempt, &err);
                    return Err(err);
                }
                Some(RpcError::Timeout { .. }) => {
                    self.metrics.record_timeout(elapsed);
                    true
                }
                _ => {
                    self.metrics.record_failure(elapsed);
                    false
                }
            };
            self.breaker.record_failure();

            if attempt >= self.options.max_attempts {
                context.log_exhausted(attempt, &err);
                return Err(err);
            }

            let backoff = self.options.backoff_delay(attempt);
            if timed_out {
                context.log_timeout(attempt, backoff);
            } else {
                context.log_retry(attempt, backoff, &err);
            }
            sleep(backoff).await;
        }
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    if response_too_large(&err) {
        return RpcError::ResponseTooLarge { method }.into();
    }
    match err {
        JsonRpcError::Call(call) => anyhow!(
            "rpc {method} call failed (code={}, message={})",
            call.code(),
            call.message()
        ),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}

fn response_too_large(err: &JsonRpcError) -> bool {
    let JsonRpcError::Transport(inner) = err else {
        return false;
    };
    matches!(
        inner.downcast_ref::<HttpTransportError>(),
        Some(HttpTransportError::Http(HttpError::TooLarge))
            | Some(HttpTransportError::RequestTooLarge)
    )
}
