use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hubsync::{
    ChannelStatus, HubSyncResponse, MemoryStore, PollerError, Store, StoreAction, StoreState,
    SyncController, SyncControllerParams, SyncError, SyncResult, UpdateReason,
};

use crate::support::fakes::{FakeChain, FakeHub, FakeValidator, Harness};
use crate::support::helpers::{
    at, channel, hub_signed, settled_channel, store_with_queue, test_config, thread, user_signed,
    wait_until,
};

fn response(status: ChannelStatus, updates: Vec<SyncResult>) -> HubSyncResponse {
    HubSyncResponse { status, updates }
}

#[tokio::test]
async fn pull_requests_updates_after_local_counters() -> Result<()> {
    let store = store_with_queue(Vec::new());
    store.dispatch(StoreAction::SetChannel {
        state: settled_channel(3),
        update: None,
    });
    store.dispatch(StoreAction::SetLastThreadUpdateId(12));
    let harness = Harness::new(store, test_config());

    harness.hub.push_sync(response(
        ChannelStatus::Open,
        vec![
            channel(hub_signed(4, UpdateReason::Payment, at(10))),
            thread(1, 1, at(5)),
        ],
    ));
    harness.controller.pull_from_hub().await?;

    assert_eq!(harness.hub.sync_calls(), vec![(3, 12)]);
    let results = harness.hub_results();
    assert_eq!(results.len(), 2);
    assert!(results[0].as_thread().is_some(), "older thread update first");
    assert_eq!(results[1].as_channel().and_then(|u| u.tx_count), Some(4));
    assert_eq!(harness.controller.telemetry().snapshot().pulled_updates, 2);
    Ok(())
}

#[tokio::test]
async fn repeated_pulls_do_not_duplicate_results() -> Result<()> {
    let harness = Harness::new(store_with_queue(Vec::new()), test_config());
    let update = channel(hub_signed(1, UpdateReason::Payment, at(1)));

    harness
        .hub
        .push_sync(response(ChannelStatus::Open, vec![update.clone()]));
    harness
        .hub
        .push_sync(response(ChannelStatus::Open, vec![update.clone()]));
    harness.controller.pull_from_hub().await?;
    harness.controller.pull_from_hub().await?;

    assert_eq!(harness.hub_results(), vec![update]);
    Ok(())
}

#[tokio::test]
async fn empty_or_missing_responses_change_nothing() -> Result<()> {
    let harness = Harness::new(store_with_queue(Vec::new()), test_config());
    harness
        .hub
        .push_sync(response(ChannelStatus::ChannelDispute, Vec::new()));

    harness.controller.pull_from_hub().await?;
    harness.controller.pull_from_hub().await?;

    let state = harness.store.state();
    assert_eq!(state.runtime.channel_status, ChannelStatus::Open);
    assert!(state.runtime.sync_results_from_hub.is_empty());
    assert_eq!(harness.hub.sync_calls().len(), 2);
    Ok(())
}

#[tokio::test]
async fn disputed_status_is_recorded_and_updates_still_merged() -> Result<()> {
    let harness = Harness::new(store_with_queue(Vec::new()), test_config());

    harness.controller.handle_hub_sync(response(
        ChannelStatus::ChannelDispute,
        vec![channel(hub_signed(1, UpdateReason::Payment, at(1)))],
    ))?;

    assert_eq!(
        harness.store.state().runtime.channel_status,
        ChannelStatus::ChannelDispute
    );
    assert_eq!(harness.hub_results().len(), 1);
    Ok(())
}

#[tokio::test]
async fn thread_dispute_is_an_error() {
    let harness = Harness::new(store_with_queue(Vec::new()), test_config());

    let err = harness
        .controller
        .handle_hub_sync(response(
            ChannelStatus::ThreadDispute,
            vec![channel(hub_signed(1, UpdateReason::Payment, at(1)))],
        ))
        .unwrap_err();

    assert_eq!(
        err.downcast_ref::<SyncError>(),
        Some(&SyncError::ThreadDispute)
    );
    let state = harness.store.state();
    assert_eq!(state.runtime.channel_status, ChannelStatus::ThreadDispute);
    assert_eq!(state.runtime.sync_results_from_hub.len(), 1);
}

#[tokio::test]
async fn hub_echo_of_queued_update_is_filtered() -> Result<()> {
    let queued = user_signed(5, UpdateReason::Payment);
    let harness = Harness::new(
        store_with_queue(vec![channel(queued.clone())]),
        test_config(),
    );

    let kept = harness.controller.enqueue_sync_results_from_hub(vec![
        channel(queued),
        channel(hub_signed(6, UpdateReason::Exchange, at(20))),
    ])?;

    assert_eq!(kept, 1);
    let results = harness.hub_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_channel().and_then(|u| u.tx_count), Some(6));
    Ok(())
}

#[tokio::test]
async fn inconsistent_hub_results_are_rejected() {
    let harness = Harness::new(store_with_queue(Vec::new()), test_config());
    harness
        .controller
        .enqueue_sync_results_from_hub(vec![channel(hub_signed(2, UpdateReason::Payment, at(1)))])
        .expect("first copy merges");

    let conflicting = hub_signed(2, UpdateReason::Exchange, at(1));
    let err = harness
        .controller
        .enqueue_sync_results_from_hub(vec![channel(conflicting)])
        .unwrap_err();

    assert!(err.to_string().contains("txCount 2"), "{err}");
    assert_eq!(harness.hub_results().len(), 1);
}

#[tokio::test]
async fn failing_pull_does_not_block_flush() -> Result<()> {
    let queued = user_signed(1, UpdateReason::Payment);
    let harness = Harness::new(store_with_queue(vec![channel(queued)]), test_config());
    harness.hub.push_sync_error("hub down");

    harness.controller.cycle().await;

    assert_eq!(harness.hub.update_calls().len(), 1);
    assert!(harness.queue().is_empty());
    assert_eq!(harness.controller.telemetry().snapshot().cycles, 1);
    Ok(())
}

#[tokio::test]
async fn started_controller_polls_until_stopped() -> Result<()> {
    let harness = Harness::new(store_with_queue(Vec::new()), test_config());

    harness.controller.start()?;
    assert!(harness.controller.is_started());
    assert!(matches!(
        harness.controller.start(),
        Err(PollerError::AlreadyStarted { .. })
    ));

    let hub = harness.hub.clone();
    wait_until(Duration::from_secs(2), || hub.sync_calls().len() >= 3).await?;

    let handle = harness.controller.stop().expect("poller was running");
    handle.await?;
    assert!(!harness.controller.is_started());

    let calls = harness.hub.sync_calls().len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.hub.sync_calls().len(), calls);
    Ok(())
}

/// Store whose reads are slow, so concurrent read-merge-write cycles overlap.
struct SlowReadStore {
    inner: MemoryStore,
    delay: Duration,
}

impl Store for SlowReadStore {
    fn state(&self) -> StoreState {
        std::thread::sleep(self.delay);
        self.inner.state()
    }

    fn dispatch(&self, action: StoreAction) {
        self.inner.dispatch(action);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_merges_keep_every_hub_update() -> Result<()> {
    let store = Arc::new(SlowReadStore {
        inner: MemoryStore::default(),
        delay: Duration::from_millis(50),
    });
    let controller = Arc::new(SyncController::new(SyncControllerParams {
        hub: Arc::new(FakeHub::default()),
        chain: Arc::new(FakeChain::new(1_000, 1_000_000, 15)),
        validator: Arc::new(FakeValidator::default()),
        store: store.clone(),
        config: test_config(),
    }));

    let merges: Vec<_> = [1u64, 2]
        .into_iter()
        .map(|tx| {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller.enqueue_sync_results_from_hub(vec![channel(hub_signed(
                    tx,
                    UpdateReason::Payment,
                    at(tx as i64 * 10),
                ))])
            })
        })
        .collect();
    for merge in merges {
        assert_eq!(merge.await??, 1);
    }

    let results = store.state().runtime.sync_results_from_hub;
    let counts: Vec<_> = results
        .iter()
        .filter_map(SyncResult::as_channel)
        .map(|update| update.tx_count)
        .collect();
    assert_eq!(counts, vec![Some(1), Some(2)]);
    Ok(())
}

#[tokio::test]
async fn drained_results_leave_the_remainder_in_order() -> Result<()> {
    let harness = Harness::new(store_with_queue(Vec::new()), test_config());
    let updates: Vec<_> = (1..=3)
        .map(|tx| channel(hub_signed(tx, UpdateReason::Payment, at(tx as i64))))
        .collect();
    harness
        .controller
        .enqueue_sync_results_from_hub(updates.clone())?;

    let drained = harness.controller.drain_sync_results_from_hub(2);
    assert_eq!(drained, updates[..2].to_vec());
    assert_eq!(harness.hub_results(), updates[2..].to_vec());

    assert_eq!(harness.controller.drain_sync_results_from_hub(10), updates[2..].to_vec());
    assert!(harness.hub_results().is_empty());
    Ok(())
}
