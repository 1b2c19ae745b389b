//! Wire-level data model shared by the merge engine, the store, and the sync
//! controller: channel/thread updates, channel snapshots, and chain views.

pub mod chain;
pub mod channel;
pub mod update;

pub use chain::{Block, BlockTag, ContractEvent};
pub use channel::{
    Balances, ChannelState, ChannelStatus, InvalidationArgs, InvalidationReason,
    PendingOperations, SyncControllerState, UnknownChannelStatus,
};
pub use update::{
    ChannelUpdate, SignatureSet, SyncResult, ThreadState, ThreadStateUpdate, UpdateReason,
};
