use crate::processor::controller::SyncController;
use crate::runtime::telemetry::spawn_metrics_reporter;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns a running [`SyncController`] plus its metrics reporter and handles OS
/// signals for graceful shutdowns.
pub struct Runner {
    controller: Arc<SyncController>,
    shutdown: CancellationToken,
    metrics_handle: Option<JoinHandle<()>>,
    started: bool,
}

impl Runner {
    pub fn new(controller: Arc<SyncController>) -> Self {
        Self {
            controller,
            shutdown: CancellationToken::new(),
            metrics_handle: None,
            started: false,
        }
    }

    pub fn controller(&self) -> Arc<SyncController> {
        self.controller.clone()
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Starts the sync loop and the metrics reporter. Calling it again while
    /// running is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.controller.start()?;
        self.metrics_handle = Some(spawn_metrics_reporter(
            self.controller.telemetry(),
            self.controller.store(),
            self.shutdown.child_token(),
            self.controller.config().metrics_interval(),
        ));
        self.started = true;
        Ok(())
    }

    /// Stops polling and waits for the scheduling task and the reporter to exit.
    /// A sync cycle already in flight runs to completion in the background.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();

        if let Some(handle) = self.controller.stop() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "sync poller task panicked");
            }
        }

        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }

        self.started = false;
        self.shutdown = CancellationToken::new();
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start()?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }
}
