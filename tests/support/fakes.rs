use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use futures::future::BoxFuture;
use hubsync::{
    Block, BlockTag, ChainProvider, ChannelState, ChannelUpdate, ContractEvent, Hub,
    HubSyncResponse, HubUpdates, InvalidationArgs, MemoryStore, Store, SyncConfig, SyncController,
    SyncControllerParams, SyncResult, ThreadStateUpdate, UpdateHubResponse, UpdateThreadResponse,
    Validator,
};

use super::helpers::{at, countersigned};

/// How the fake hub answers `update_hub`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateMode {
    /// Signs every update and hands it back.
    Countersign,
    /// The request itself fails.
    Fail,
    /// The hub answers with an `error` field.
    Reject(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateHubCall {
    pub updates: Vec<ChannelUpdate>,
    pub last_thread_update_id: u64,
}

struct HubInner {
    sync_responses: VecDeque<Result<Option<HubSyncResponse>, String>>,
    sync_calls: Vec<(u64, u64)>,
    update_mode: UpdateMode,
    update_delay: Duration,
    update_calls: Vec<UpdateHubCall>,
    thread_calls: Vec<ThreadStateUpdate>,
    fail_threads: bool,
}

/// Scripted hub. Sync answers are served in order; once the script is used up
/// the hub reports nothing new.
#[derive(Clone)]
pub struct FakeHub {
    inner: Arc<Mutex<HubInner>>,
}

impl Default for FakeHub {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                sync_responses: VecDeque::new(),
                sync_calls: Vec::new(),
                update_mode: UpdateMode::Countersign,
                update_delay: Duration::ZERO,
                update_calls: Vec::new(),
                thread_calls: Vec::new(),
                fail_threads: false,
            })),
        }
    }
}

impl FakeHub {
    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().expect("fake hub poisoned")
    }

    pub fn push_sync(&self, response: HubSyncResponse) {
        self.lock().sync_responses.push_back(Ok(Some(response)));
    }

    pub fn push_sync_error(&self, message: &str) {
        self.lock().sync_responses.push_back(Err(message.to_owned()));
    }

    pub fn set_update_mode(&self, mode: UpdateMode) {
        self.lock().update_mode = mode;
    }

    pub fn set_update_delay(&self, delay: Duration) {
        self.lock().update_delay = delay;
    }

    pub fn fail_threads(&self, fail: bool) {
        self.lock().fail_threads = fail;
    }

    pub fn sync_calls(&self) -> Vec<(u64, u64)> {
        self.lock().sync_calls.clone()
    }

    pub fn update_calls(&self) -> Vec<UpdateHubCall> {
        self.lock().update_calls.clone()
    }

    pub fn thread_calls(&self) -> Vec<ThreadStateUpdate> {
        self.lock().thread_calls.clone()
    }
}

impl Hub for FakeHub {
    fn sync(
        &self,
        tx_count_global: u64,
        last_thread_update_id: u64,
    ) -> BoxFuture<'_, Result<Option<HubSyncResponse>>> {
        let next = {
            let mut inner = self.lock();
            inner
                .sync_calls
                .push((tx_count_global, last_thread_update_id));
            inner.sync_responses.pop_front()
        };
        Box::pin(async move {
            match next {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Ok(None),
            }
        })
    }

    fn update_hub(
        &self,
        updates: Vec<ChannelUpdate>,
        last_thread_update_id: u64,
    ) -> BoxFuture<'_, Result<UpdateHubResponse>> {
        let (mode, delay) = {
            let mut inner = self.lock();
            inner.update_calls.push(UpdateHubCall {
                updates: updates.clone(),
                last_thread_update_id,
            });
            (inner.update_mode.clone(), inner.update_delay)
        };
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match mode {
                UpdateMode::Countersign => Ok(UpdateHubResponse {
                    error: None,
                    updates: HubUpdates {
                        updates: updates
                            .iter()
                            .map(|update| SyncResult::Channel(countersigned(update, at(0))))
                            .collect(),
                    },
                }),
                UpdateMode::Fail => bail!("hub unreachable"),
                UpdateMode::Reject(error) => Ok(UpdateHubResponse {
                    error: Some(error),
                    updates: HubUpdates::default(),
                }),
            }
        })
    }

    fn update_thread(
        &self,
        update: ThreadStateUpdate,
    ) -> BoxFuture<'_, Result<UpdateThreadResponse>> {
        let fail = {
            let mut inner = self.lock();
            inner.thread_calls.push(update);
            inner.fail_threads
        };
        Box::pin(async move {
            if fail {
                bail!("thread endpoint unreachable");
            }
            Ok(UpdateThreadResponse::default())
        })
    }
}

struct ChainInner {
    head: u64,
    genesis_time: u64,
    block_time: u64,
    events: Vec<ContractEvent>,
    event_queries: Vec<u64>,
}

/// Chain with a fixed block time, so the timestamp of every block is known.
#[derive(Clone)]
pub struct FakeChain {
    inner: Arc<Mutex<ChainInner>>,
}

impl FakeChain {
    pub fn new(head: u64, genesis_time: u64, block_time: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChainInner {
                head,
                genesis_time,
                block_time,
                events: Vec::new(),
                event_queries: Vec::new(),
            })),
        }
    }

    /// A chain whose head was mined at `head_time`, one block every 15s.
    pub fn ending_at(head_time: u64) -> Self {
        let head = 100_000;
        Self::new(head, head_time - head * 15, 15)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainInner> {
        self.inner.lock().expect("fake chain poisoned")
    }

    pub fn head_time(&self) -> u64 {
        let inner = self.lock();
        inner.genesis_time + inner.head * inner.block_time
    }

    pub fn add_event(&self, tx_count_global: u64, block_number: u64) {
        self.lock().events.push(ContractEvent {
            name: "DidUpdateChannel".to_owned(),
            block_number,
            user: super::helpers::USER.to_owned(),
            tx_count_global,
            tx_count_chain: 1,
        });
    }

    pub fn event_queries(&self) -> Vec<u64> {
        self.lock().event_queries.clone()
    }
}

impl ChainProvider for FakeChain {
    fn get_block(&self, tag: BlockTag) -> BoxFuture<'_, Result<Block>> {
        let block = {
            let inner = self.lock();
            let number = match tag {
                BlockTag::Latest => Some(inner.head),
                BlockTag::Number(number) if number <= inner.head => Some(number),
                BlockTag::Number(_) => None,
            };
            number.map(|number| Block {
                number,
                timestamp: inner.genesis_time + number * inner.block_time,
                hash: format!("0x{number:064x}"),
            })
        };
        Box::pin(async move { block.ok_or_else(|| anyhow!("block {tag} not found")) })
    }

    fn get_contract_events<'a>(
        &'a self,
        _name: &'a str,
        from_block: u64,
    ) -> BoxFuture<'a, Result<Vec<ContractEvent>>> {
        let events = {
            let mut inner = self.lock();
            inner.event_queries.push(from_block);
            inner
                .events
                .iter()
                .filter(|event| event.block_number >= from_block)
                .cloned()
                .collect()
        };
        Box::pin(async move { Ok(events) })
    }
}

/// Rolls back to the latest valid state and signs with a fixed user signature.
#[derive(Default, Clone)]
pub struct FakeValidator {
    generated: Arc<Mutex<Vec<InvalidationArgs>>>,
}

impl FakeValidator {
    pub fn generated(&self) -> Vec<InvalidationArgs> {
        self.generated.lock().expect("fake validator poisoned").clone()
    }
}

impl Validator for FakeValidator {
    fn generate_invalidation(
        &self,
        latest_valid: &ChannelState,
        args: &InvalidationArgs,
    ) -> Result<ChannelState> {
        self.generated
            .lock()
            .expect("fake validator poisoned")
            .push(args.clone());
        Ok(ChannelState {
            tx_count_global: args.last_invalid_tx_count + 1,
            sig_hub: None,
            sig_user: None,
            ..latest_valid.clone()
        })
    }

    fn sign_channel_state(&self, state: ChannelState) -> BoxFuture<'_, Result<ChannelState>> {
        Box::pin(async move {
            Ok(ChannelState {
                sig_user: Some("0xuser-invalidation".to_owned()),
                ..state
            })
        })
    }
}

/// A controller wired to fakes, with handles to inspect every collaborator.
pub struct Harness {
    pub hub: FakeHub,
    pub chain: FakeChain,
    pub validator: FakeValidator,
    pub store: Arc<MemoryStore>,
    pub controller: Arc<SyncController>,
}

impl Harness {
    pub fn new(store: Arc<MemoryStore>, config: SyncConfig) -> Self {
        Self::with_chain(store, config, FakeChain::new(1_000, 1_000_000, 15))
    }

    pub fn with_chain(store: Arc<MemoryStore>, config: SyncConfig, chain: FakeChain) -> Self {
        super::helpers::init_tracing();
        let hub = FakeHub::default();
        let validator = FakeValidator::default();
        let controller = Arc::new(SyncController::new(SyncControllerParams {
            hub: Arc::new(hub.clone()),
            chain: Arc::new(chain.clone()),
            validator: Arc::new(validator.clone()),
            store: store.clone(),
            config,
        }));
        Self {
            hub,
            chain,
            validator,
            store,
            controller,
        }
    }

    pub fn queue(&self) -> Vec<SyncResult> {
        self.store.state().updates_to_sync().to_vec()
    }

    pub fn hub_results(&self) -> Vec<SyncResult> {
        self.store.state().runtime.sync_results_from_hub
    }
}
