//! Sequential interval scheduler with a soft per-call timeout.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub type PollFuture = BoxFuture<'static, anyhow::Result<()>>;

type TimeoutHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerError {
    AlreadyStarted { name: &'static str },
}

impl fmt::Display for PollerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerError::AlreadyStarted { name } => write!(f, "poller {name} is already started"),
        }
    }
}

impl std::error::Error for PollerError {}

struct PollerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs a callback immediately and then `interval` after each call settles.
///
/// Calls never overlap with one another, except that a call outliving
/// `timeout` is left running in the background (only to log how it ends) while
/// the schedule moves on.
pub struct Poller {
    name: &'static str,
    interval: Duration,
    timeout: Duration,
    on_timeout: Option<TimeoutHook>,
    running: Mutex<Option<PollerHandle>>,
}

impl Poller {
    pub fn new(name: &'static str, interval: Duration, timeout: Duration) -> Self {
        Self {
            name,
            interval,
            timeout,
            on_timeout: None,
            running: Mutex::new(None),
        }
    }

    /// Registers a hook invoked every time a call exceeds the timeout.
    pub fn on_timeout(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(hook));
        self
    }

    pub fn start<F>(&self, callback: F) -> Result<(), PollerError>
    where
        F: Fn() -> PollFuture + Send + Sync + 'static,
    {
        let mut running = self.running.lock().expect("poller mutex poisoned");
        if running.is_some() {
            return Err(PollerError::AlreadyStarted { name: self.name });
        }

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            LoopParams {
                name: self.name,
                interval: self.interval,
                timeout: self.timeout,
                on_timeout: self.on_timeout.clone(),
                shutdown: shutdown.clone(),
            },
            callback,
        ));
        *running = Some(PollerHandle { shutdown, task });

        tracing::debug!(poller = self.name, "poller started");
        Ok(())
    }

    /// Cancels the pending timer. A call already in flight finishes but is not
    /// followed by another one. Returns the scheduling task so callers can
    /// await its exit.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let handle = self.running.lock().expect("poller mutex poisoned").take()?;
        handle.shutdown.cancel();
        tracing::debug!(poller = self.name, "poller stop requested");
        Some(handle.task)
    }

    pub fn is_started(&self) -> bool {
        self.running.lock().expect("poller mutex poisoned").is_some()
    }
}

struct LoopParams {
    name: &'static str,
    interval: Duration,
    timeout: Duration,
    on_timeout: Option<TimeoutHook>,
    shutdown: CancellationToken,
}

async fn run_loop<F>(params: LoopParams, callback: F)
where
    F: Fn() -> PollFuture + Send + Sync + 'static,
{
    let LoopParams {
        name,
        interval,
        timeout,
        on_timeout,
        shutdown,
    } = params;

    loop {
        let mut call = tokio::spawn(callback());

        tokio::select! {
            joined = &mut call => log_outcome(name, joined, false),
            _ = sleep(timeout) => {
                tracing::warn!(
                    poller = name,
                    timeout_ms = timeout.as_millis() as u64,
                    "poll callback exceeded its timeout; scheduling next run anyway"
                );
                if let Some(hook) = &on_timeout {
                    hook();
                }
                tokio::spawn(async move {
                    let joined = call.await;
                    log_outcome(name, joined, true);
                });
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }

    tracing::info!(poller = name, "poller stopped");
}

fn log_outcome(name: &'static str, joined: Result<anyhow::Result<()>, JoinError>, late: bool) {
    match joined {
        Ok(Ok(())) if late => {
            tracing::info!(poller = name, "timed out poll callback eventually succeeded");
        }
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(poller = name, late, error = %err, "poll callback failed");
        }
        Err(err) => {
            tracing::error!(poller = name, late, error = %err, "poll callback panicked");
        }
    }
}
