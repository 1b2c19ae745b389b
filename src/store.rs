//! Single-writer state container the sync engine reads and mutates through
//! discrete actions, plus an in-memory implementation.

use crate::model::{
    ChannelState, ChannelStatus, ChannelUpdate, SyncControllerState, SyncResult,
};
use std::sync::Mutex;

/// State that survives restarts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistentState {
    pub channel: ChannelState,
    /// Update that produced `channel`, if any.
    pub channel_update: Option<ChannelUpdate>,
    /// Most recent state both parties signed and that is not pending on-chain.
    pub latest_valid_state: ChannelState,
    pub last_thread_update_id: u64,
    pub sync_controller_state: SyncControllerState,
}

/// State rebuilt on every start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    pub channel_status: ChannelStatus,
    pub sync_results_from_hub: Vec<SyncResult>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub persistent: PersistentState,
    pub runtime: RuntimeState,
}

impl StoreState {
    pub fn updates_to_sync(&self) -> &[SyncResult] {
        &self.persistent.sync_controller_state.updates_to_sync
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    SetChannelStatus(ChannelStatus),
    /// Replaces the hub results with an already merged and sorted list.
    SetSortedSyncResultsFromHub(Vec<SyncResult>),
    /// Removes the first `count` hub results once a consumer applied them.
    DrainSyncResults { count: usize },
    EnqueueUpdatesToSync(Vec<SyncResult>),
    /// Removes the first `count` queued updates.
    DequeueUpdatesToSync { count: usize },
    SetChannel {
        state: ChannelState,
        update: Option<ChannelUpdate>,
    },
    SetLatestValidState(ChannelState),
    SetLastThreadUpdateId(u64),
}

/// External state container. `dispatch` is synchronous and all writes go
/// through it, so readers always observe a whole action or none of it.
pub trait Store: Send + Sync {
    fn state(&self) -> StoreState;
    fn dispatch(&self, action: StoreAction);
}

/// Applies one action to a state snapshot.
pub fn reduce(state: &mut StoreState, action: StoreAction) {
    match action {
        StoreAction::SetChannelStatus(status) => state.runtime.channel_status = status,
        StoreAction::SetSortedSyncResultsFromHub(results) => {
            state.runtime.sync_results_from_hub = results;
        }
        StoreAction::DrainSyncResults { count } => {
            let results = &mut state.runtime.sync_results_from_hub;
            results.drain(..count.min(results.len()));
        }
        StoreAction::EnqueueUpdatesToSync(updates) => {
            state
                .persistent
                .sync_controller_state
                .updates_to_sync
                .extend(updates);
        }
        StoreAction::DequeueUpdatesToSync { count } => {
            let queue = &mut state.persistent.sync_controller_state.updates_to_sync;
            queue.drain(..count.min(queue.len()));
        }
        StoreAction::SetChannel {
            state: channel,
            update,
        } => {
            state.persistent.channel = channel;
            state.persistent.channel_update = update;
        }
        StoreAction::SetLatestValidState(latest) => state.persistent.latest_valid_state = latest,
        StoreAction::SetLastThreadUpdateId(id) => state.persistent.last_thread_update_id = id,
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new(initial: StoreState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }
}

impl Store for MemoryStore {
    fn state(&self) -> StoreState {
        self.state.lock().expect("store mutex poisoned").clone()
    }

    fn dispatch(&self, action: StoreAction) {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        reduce(&mut guard, action);
    }
}
