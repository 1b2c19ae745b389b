//! Hub synchronisation loop: pull hub updates, flush local ones, and invalidate
//! pending states whose on-chain deadline passed unconfirmed.

use super::block_finder::find_block_nearest_timeout;
use super::invalidation::invalidate_update;
use super::poller::{Poller, PollerError};
use crate::merge::{filter_pending_sync_results, merge_sync_results};
use crate::model::{
    ChannelStatus, ChannelUpdate, InvalidationReason, SyncResult, ThreadStateUpdate,
};
use crate::runtime::config::SyncConfig;
use crate::runtime::protocol::{ChainProvider, Hub, HubSyncResponse, Validator, DID_UPDATE_CHANNEL};
use crate::runtime::telemetry::SyncTelemetry;
use crate::store::{Store, StoreAction};
use anyhow::{bail, Context, Result};
use std::fmt;
use std::sync::{Arc, Mutex as SyncMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The hub put the channel in thread dispute, which this client cannot
    /// take part in.
    ThreadDispute,
    /// A pending state has neither a timeout nor a creation time to derive one.
    MissingTimeout { tx_count_global: u64 },
    /// A timed-out state cannot be invalidated because the update that produced
    /// it was not persisted.
    MissingChannelUpdate { tx_count_global: u64 },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::ThreadDispute => {
                f.write_str("channel is in thread dispute, which is not supported")
            }
            SyncError::MissingTimeout { tx_count_global } => write!(
                f,
                "channel state {tx_count_global} has pending operations but no timeout or update timestamp"
            ),
            SyncError::MissingChannelUpdate { tx_count_global } => write!(
                f,
                "channel state {tx_count_global} timed out but its update is unknown"
            ),
        }
    }
}

impl std::error::Error for SyncError {}

/// What a timeout check concluded about the current channel state.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutCheck {
    /// Nothing pending, no expiry, or hub results still waiting to be applied.
    Skipped,
    /// The chain has not yet produced a block past the timeout.
    NotExpired,
    /// The contract emitted an update for this state before it expired.
    ConfirmedOnChain,
    /// An invalidation for the timed-out state is already queued.
    AlreadyInvalidating,
    Invalidated(ChannelUpdate),
}

#[derive(Debug, Default)]
struct FlushState {
    consecutive_failures: usize,
}

pub struct SyncControllerParams {
    pub hub: Arc<dyn Hub>,
    pub chain: Arc<dyn ChainProvider>,
    pub validator: Arc<dyn Validator>,
    pub store: Arc<dyn Store>,
    pub config: SyncConfig,
}

pub struct SyncController {
    hub: Arc<dyn Hub>,
    chain: Arc<dyn ChainProvider>,
    validator: Arc<dyn Validator>,
    store: Arc<dyn Store>,
    config: SyncConfig,
    telemetry: Arc<SyncTelemetry>,
    flush: Mutex<FlushState>,
    /// Serialises read-merge-write cycles on the hub results.
    hub_results: SyncMutex<()>,
    poller: Poller,
}

impl SyncController {
    pub fn new(params: SyncControllerParams) -> Self {
        let SyncControllerParams {
            hub,
            chain,
            validator,
            store,
            config,
        } = params;

        let telemetry = Arc::new(SyncTelemetry::default());
        let timeouts = telemetry.clone();
        let poller = Poller::new("sync", config.poll_interval(), config.cycle_timeout())
            .on_timeout(move || timeouts.record_cycle_timeout());

        Self {
            hub,
            chain,
            validator,
            store,
            config,
            telemetry,
            flush: Mutex::new(FlushState::default()),
            hub_results: SyncMutex::new(()),
            poller,
        }
    }

    pub fn telemetry(&self) -> Arc<SyncTelemetry> {
        self.telemetry.clone()
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Starts polling the hub. The running loop keeps the controller alive
    /// until [`SyncController::stop`] is called.
    pub fn start(self: &Arc<Self>) -> Result<(), PollerError> {
        let controller = Arc::clone(self);
        self.poller.start(move || {
            let controller = controller.clone();
            Box::pin(async move {
                controller.cycle().await;
                Ok(())
            })
        })?;
        tracing::info!(
            poll_interval_ms = self.config.poll_interval().as_millis() as u64,
            "sync controller started"
        );
        Ok(())
    }

    pub fn stop(&self) -> Option<JoinHandle<()>> {
        self.poller.stop()
    }

    pub fn is_started(&self) -> bool {
        self.poller.is_started()
    }

    /// Runs pull, flush and timeout check once. A failing step is logged and
    /// does not prevent the following ones.
    pub async fn cycle(&self) {
        self.telemetry.record_cycle();

        if let Err(err) = self.pull_from_hub().await {
            tracing::warn!(error = ?err, "hub sync failed");
        }

        if let Err(err) = self.flush_pending_updates().await {
            tracing::warn!(error = ?err, "flushing updates to hub failed");
        }

        match self.check_current_state_timeout_and_invalidate().await {
            Ok(TimeoutCheck::Invalidated(update)) => {
                tracing::info!(tx_count = ?update.tx_count, "invalidated timed-out channel state");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = ?err, "timeout check failed");
            }
        }
    }

    /// Fetches everything newer than the local counters and records it.
    pub async fn pull_from_hub(&self) -> Result<()> {
        let state = self.store.state();
        let tx_count_global = state.persistent.channel.tx_count_global;
        let last_thread_update_id = state.persistent.last_thread_update_id;

        let response = self
            .hub
            .sync(tx_count_global, last_thread_update_id)
            .await
            .context("hub sync request failed")?;

        match response {
            Some(response) if !response.updates.is_empty() => self.handle_hub_sync(response),
            _ => {
                tracing::trace!(tx_count_global, "hub has no new updates");
                Ok(())
            }
        }
    }

    /// Applies a hub sync response: records the reported channel status and
    /// merges the returned updates.
    pub fn handle_hub_sync(&self, response: HubSyncResponse) -> Result<()> {
        let HubSyncResponse { status, updates } = response;

        if self.store.state().runtime.channel_status != status {
            tracing::info!(%status, "channel status changed");
            self.store.dispatch(StoreAction::SetChannelStatus(status));
        }

        self.enqueue_sync_results_from_hub(updates)?;

        match status {
            ChannelStatus::Open => Ok(()),
            ChannelStatus::ChannelDispute | ChannelStatus::ChainsawError => {
                tracing::warn!(%status, "hub reports channel is not open");
                Ok(())
            }
            ChannelStatus::ThreadDispute => Err(SyncError::ThreadDispute.into()),
        }
    }

    /// Filters out results this client is still sending, then merges the rest
    /// into the hub results awaiting application. Returns how many were kept.
    pub fn enqueue_sync_results_from_hub(&self, updates: Vec<SyncResult>) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let _guard = self.hub_results.lock().expect("hub results mutex poisoned");
        let state = self.store.state();
        let received = updates.len();
        let fresh = filter_pending_sync_results(updates, state.updates_to_sync());
        let merged = merge_sync_results(&state.runtime.sync_results_from_hub, &fresh)?;

        tracing::debug!(
            received,
            kept = fresh.len(),
            pending = merged.len(),
            "merged hub updates"
        );
        self.telemetry.record_pulled_updates(fresh.len());
        self.store
            .dispatch(StoreAction::SetSortedSyncResultsFromHub(merged));
        Ok(fresh.len())
    }

    /// Removes and returns the first `count` hub results for a downstream
    /// consumer. Runs under the same lock as merges, so a concurrent merge
    /// never writes drained results back.
    pub fn drain_sync_results_from_hub(&self, count: usize) -> Vec<SyncResult> {
        let _guard = self.hub_results.lock().expect("hub results mutex poisoned");
        let results = self.store.state().runtime.sync_results_from_hub;
        let drained: Vec<SyncResult> = results.into_iter().take(count).collect();
        self.store.dispatch(StoreAction::DrainSyncResults {
            count: drained.len(),
        });
        drained
    }

    /// Queues a locally created update and sends it right away.
    pub async fn send_update_to_hub(&self, update: ChannelUpdate) -> Result<()> {
        self.store
            .dispatch(StoreAction::EnqueueUpdatesToSync(vec![SyncResult::Channel(update)]));
        self.flush_pending_updates().await
    }

    /// Sends the queued updates to the hub. Only one flush runs at a time; a
    /// concurrent caller waits for the running one to finish.
    pub async fn flush_pending_updates(&self) -> Result<()> {
        let mut flush = self.flush.lock().await;

        let state = self.store.state();
        let attempted = state.updates_to_sync().to_vec();
        if attempted.is_empty() {
            return Ok(());
        }

        let mut channel_updates = Vec::new();
        let mut thread_updates = Vec::new();
        for result in &attempted {
            match result {
                SyncResult::Channel(update) => channel_updates.push(update.clone()),
                SyncResult::Thread(update) => thread_updates.push(update.clone()),
            }
        }

        let sent = self
            .send_updates(
                channel_updates,
                thread_updates,
                state.persistent.last_thread_update_id,
            )
            .await;

        match sent {
            Ok(returned) => {
                flush.consecutive_failures = 0;
                self.store.dispatch(StoreAction::DequeueUpdatesToSync {
                    count: attempted.len(),
                });
                self.telemetry.record_flushed_updates(attempted.len());
                tracing::debug!(
                    flushed = attempted.len(),
                    returned = returned.len(),
                    "flushed updates to hub"
                );
                self.enqueue_sync_results_from_hub(returned)?;
                Ok(())
            }
            Err(err) => {
                flush.consecutive_failures += 1;
                self.telemetry.record_flush_failure();
                let failures = flush.consecutive_failures;
                let max_failures = self.config.flush_max_failures();

                if failures >= max_failures {
                    tracing::error!(
                        error = ?err,
                        failures,
                        dropped = attempted.len(),
                        "giving up on queued updates after repeated flush failures"
                    );
                    self.store.dispatch(StoreAction::DequeueUpdatesToSync {
                        count: attempted.len(),
                    });
                    self.telemetry.record_dropped_updates(attempted.len());
                    flush.consecutive_failures = 0;
                }

                tokio::time::sleep(self.config.flush_failure_delay()).await;
                Err(err.context(format!("flush attempt {failures} of {max_failures} failed")))
            }
        }
    }

    async fn send_updates(
        &self,
        channel_updates: Vec<ChannelUpdate>,
        thread_updates: Vec<ThreadStateUpdate>,
        last_thread_update_id: u64,
    ) -> Result<Vec<SyncResult>> {
        let mut returned = Vec::new();

        if !channel_updates.is_empty() {
            let response = self
                .hub
                .update_hub(channel_updates, last_thread_update_id)
                .await
                .context("update_hub request failed")?;
            if let Some(error) = response.error {
                bail!("hub rejected channel updates: {error}");
            }
            returned = response.updates.updates;
        }

        for update in thread_updates {
            let thread_id = update.state.thread_id;
            let response = self
                .hub
                .update_thread(update)
                .await
                .with_context(|| format!("update_thread request for thread {thread_id} failed"))?;
            if let Some(error) = response.error {
                bail!("hub rejected thread {thread_id} update: {error}");
            }
        }

        Ok(returned)
    }

    /// Checks whether the current channel state carries pending operations
    /// whose deadline has passed without the contract confirming them, and
    /// queues an invalidation if so.
    pub async fn check_current_state_timeout_and_invalidate(&self) -> Result<TimeoutCheck> {
        let state = self.store.state();
        let channel = &state.persistent.channel;

        if !channel.has_pending_ops()
            || channel.timeout == Some(0)
            || !state.runtime.sync_results_from_hub.is_empty()
        {
            return Ok(TimeoutCheck::Skipped);
        }

        let timeout = match channel.timeout {
            Some(timeout) => timeout,
            None => state
                .persistent
                .channel_update
                .as_ref()
                .and_then(|update| update.created_on)
                .map(|created| {
                    created.timestamp().max(0) as u64 + self.config.default_update_timeout().as_secs()
                })
                .ok_or(SyncError::MissingTimeout {
                    tx_count_global: channel.tx_count_global,
                })?,
        };

        let block = find_block_nearest_timeout(
            self.chain.as_ref(),
            timeout,
            self.config.block_search_delta().as_secs(),
            self.config.max_block_search_step(),
        )
        .await?;

        if block.timestamp < timeout {
            tracing::trace!(
                timeout,
                block = block.number,
                block_timestamp = block.timestamp,
                "channel state has not expired yet"
            );
            return Ok(TimeoutCheck::NotExpired);
        }

        let from_block = block
            .number
            .saturating_sub(self.config.event_lookback_blocks());
        let events = self
            .chain
            .get_contract_events(DID_UPDATE_CHANNEL, from_block)
            .await
            .with_context(|| format!("failed to fetch {DID_UPDATE_CHANNEL} events"))?;

        if events
            .iter()
            .any(|event| event.tx_count_global == channel.tx_count_global)
        {
            tracing::debug!(
                tx_count_global = channel.tx_count_global,
                "pending state was confirmed on chain"
            );
            return Ok(TimeoutCheck::ConfirmedOnChain);
        }

        let target = state
            .persistent
            .channel_update
            .clone()
            .ok_or(SyncError::MissingChannelUpdate {
                tx_count_global: channel.tx_count_global,
            })?;

        if invalidation_queued(state.updates_to_sync(), &target) {
            return Ok(TimeoutCheck::AlreadyInvalidating);
        }

        tracing::warn!(
            tx_count_global = channel.tx_count_global,
            timeout,
            block = block.number,
            "pending channel state timed out without on-chain confirmation"
        );

        let update = invalidate_update(
            self.store.as_ref(),
            self.validator.as_ref(),
            &target,
            InvalidationReason::Timeout,
            format!("update timed out (timeout={timeout}, block={})", block.number),
        )
        .await?;
        self.telemetry.record_invalidation();

        Ok(TimeoutCheck::Invalidated(update))
    }
}

fn invalidation_queued(queue: &[SyncResult], target: &ChannelUpdate) -> bool {
    let Some(tx_count) = target.tx_count else {
        return false;
    };
    queue
        .iter()
        .filter_map(SyncResult::as_channel)
        .filter_map(|update| update.invalidation_args().ok().flatten())
        .any(|args| args.invalidated_range().contains(&tx_count))
}
