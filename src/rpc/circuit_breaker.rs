//! Closed / open / half-open gate placed in front of an RPC endpoint so a dead
//! node is not hammered by every sync cycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_FAILURE_THRESHOLD: usize = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_HALF_OPEN_PROBES: usize = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: usize,
    /// Time an open breaker rejects calls before letting probes through.
    pub cooldown: Duration,
    /// Concurrent probes admitted while half-open.
    pub half_open_probes: usize,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            half_open_probes: DEFAULT_HALF_OPEN_PROBES,
        }
    }
}

#[derive(Debug)]
pub enum CircuitBreakerError {
    CircuitOpen { endpoint: &'static str },
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen { endpoint } => {
                write!(f, "{endpoint} circuit breaker is open")
            }
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

#[derive(Debug)]
struct Gate {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probes_in_flight: usize,
}

impl Gate {
    fn trip(&mut self, endpoint: &'static str) {
        self.opened_at = Some(Instant::now());
        self.probes_in_flight = 0;
        self.move_to(endpoint, CircuitState::Open);
    }

    fn move_to(&mut self, endpoint: &'static str, next: CircuitState) {
        if self.state == next {
            return;
        }
        tracing::warn!(
            endpoint,
            previous = ?self.state,
            next = ?next,
            consecutive_failures = self.consecutive_failures,
            "circuit breaker state changed"
        );
        self.state = next;
    }

    fn release_probe(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
        }
    }
}

/// Cloning shares the underlying gate.
#[derive(Debug, Clone)]
pub struct RpcCircuitBreaker {
    endpoint: &'static str,
    settings: CircuitBreakerSettings,
    gate: Arc<Mutex<Gate>>,
}

impl RpcCircuitBreaker {
    pub fn new(endpoint: &'static str, settings: CircuitBreakerSettings) -> Self {
        let settings = CircuitBreakerSettings {
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: settings.cooldown.max(Duration::from_millis(1)),
            half_open_probes: settings.half_open_probes.max(1),
        };

        Self {
            endpoint,
            settings,
            gate: Arc::new(Mutex::new(Gate {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            })),
        }
    }

    pub fn endpoint(&self) -> &'static str {
        self.endpoint
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let gate = self.gate.lock().expect("circuit breaker mutex poisoned");
        CircuitBreakerSnapshot {
            state: gate.state,
            consecutive_failures: gate.consecutive_failures,
            opened_at: gate.opened_at,
        }
    }

    /// Admits or rejects the next call. A half-open breaker admits at most
    /// `half_open_probes` calls until one of them reports back.
    pub fn before_request(&self) -> Result<CircuitState, CircuitBreakerError> {
        let mut gate = self.gate.lock().expect("circuit breaker mutex poisoned");
        let rejected = CircuitBreakerError::CircuitOpen {
            endpoint: self.endpoint,
        };

        if gate.state == CircuitState::Open {
            let cooled = gate
                .opened_at
                .is_some_and(|opened| opened.elapsed() >= self.settings.cooldown);
            if !cooled {
                return Err(rejected);
            }
            gate.move_to(self.endpoint, CircuitState::HalfOpen);
            gate.probes_in_flight = 0;
        }

        if gate.state == CircuitState::HalfOpen {
            if gate.probes_in_flight >= self.settings.half_open_probes {
                return Err(rejected);
            }
            gate.probes_in_flight += 1;
        }

        Ok(gate.state)
    }

    pub fn record_success(&self) {
        let mut gate = self.gate.lock().expect("circuit breaker mutex poisoned");
        gate.release_probe();
        gate.consecutive_failures = 0;

        if gate.state == CircuitState::HalfOpen {
            gate.opened_at = None;
            gate.move_to(self.endpoint, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut gate = self.gate.lock().expect("circuit breaker mutex poisoned");
        gate.release_probe();
        gate.consecutive_failures = gate.consecutive_failures.saturating_add(1);

        match gate.state {
            CircuitState::HalfOpen => gate.trip(self.endpoint),
            CircuitState::Closed
                if gate.consecutive_failures >= self.settings.failure_threshold =>
            {
                gate.trip(self.endpoint)
            }
            _ => {}
        }
    }
}
