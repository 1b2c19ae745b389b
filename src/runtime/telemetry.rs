use crate::store::Store;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing sync controller activity.
#[derive(Default, Debug)]
pub struct SyncTelemetry {
    cycles: AtomicU64,
    cycle_timeouts: AtomicU64,
    pulled_updates: AtomicU64,
    flushed_updates: AtomicU64,
    flush_failures: AtomicU64,
    dropped_updates: AtomicU64,
    invalidations: AtomicU64,
}

impl SyncTelemetry {
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_timeout(&self) {
        self.cycle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pulled_updates(&self, count: usize) {
        self.pulled_updates
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_flushed_updates(&self, count: usize) {
        self.flushed_updates
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_updates(&self, count: usize) {
        self.dropped_updates
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncTelemetrySnapshot {
        SyncTelemetrySnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            cycle_timeouts: self.cycle_timeouts.load(Ordering::Relaxed),
            pulled_updates: self.pulled_updates.load(Ordering::Relaxed),
            flushed_updates: self.flushed_updates.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            dropped_updates: self.dropped_updates.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SyncTelemetrySnapshot {
    pub cycles: u64,
    pub cycle_timeouts: u64,
    pub pulled_updates: u64,
    pub flushed_updates: u64,
    pub flush_failures: u64,
    pub dropped_updates: u64,
    pub invalidations: u64,
}

/// Spawns a background task that periodically logs counters and queue depths.
pub fn spawn_metrics_reporter(
    telemetry: Arc<SyncTelemetry>,
    store: Arc<dyn Store>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "hubsync::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    let state = store.state();

                    tracing::info!(
                        target: "hubsync::metrics",
                        cycles = snapshot.cycles,
                        cycle_timeouts = snapshot.cycle_timeouts,
                        pulled = snapshot.pulled_updates,
                        flushed = snapshot.flushed_updates,
                        flush_failures = snapshot.flush_failures,
                        dropped = snapshot.dropped_updates,
                        invalidations = snapshot.invalidations,
                        queued_to_hub = state.updates_to_sync().len(),
                        pending_from_hub = state.runtime.sync_results_from_hub.len(),
                        status = %state.runtime.channel_status,
                        "sync metrics snapshot"
                    );
                }
            }
        }
    })
}
