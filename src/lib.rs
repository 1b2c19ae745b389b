pub mod merge;
pub mod model;
pub mod processor;
pub mod rpc;
pub mod runtime;
pub mod store;

pub use merge::{filter_pending_sync_results, merge_sync_results, MergeError};
pub use model::{
    Block, BlockTag, ChannelState, ChannelStatus, ChannelUpdate, ContractEvent, InvalidationArgs,
    InvalidationReason, SyncResult, ThreadState, ThreadStateUpdate, UpdateReason,
};
pub use processor::block_finder::{find_block_nearest_timeout, BlockSearchError};
pub use processor::controller::{SyncController, SyncControllerParams, SyncError, TimeoutCheck};
pub use processor::invalidation::{invalidate_update, InvalidationError};
pub use processor::poller::{Poller, PollerError};
pub use rpc::{ChainRpcClient, HubRpcClient, RpcAuth, RpcClientOptions, RpcError};
pub use runtime::config::{SyncConfig, SyncConfigBuilder, SyncConfigParams};
pub use runtime::protocol::{
    ChainProvider, Hub, HubSyncResponse, HubUpdates, UpdateHubResponse, UpdateThreadResponse,
    Validator,
};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, SyncTelemetry, SyncTelemetrySnapshot};
pub use store::{MemoryStore, Store, StoreAction, StoreState};
