//! JSON-RPC adapters for the chain node and the hub, with the shared
//! transport plumbing: authentication, circuit breaker, metrics, retry policy,
//! and payload decoding.

pub mod auth;
pub mod chain;
pub mod circuit_breaker;
pub mod client;
pub mod helpers;
pub mod hub;
pub mod metrics;
pub mod options;
mod retry;

pub use auth::RpcAuth;
pub use chain::ChainRpcClient;
pub use circuit_breaker::{
    CircuitBreakerError, CircuitBreakerSettings, CircuitBreakerSnapshot, CircuitState,
    RpcCircuitBreaker,
};
pub use client::RpcError;
pub use helpers::{did_update_channel_topic, parse_quantity, DID_UPDATE_CHANNEL_SIGNATURE};
pub use hub::HubRpcClient;
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
