use crate::model::{
    Block, BlockTag, ChannelState, ChannelStatus, ChannelUpdate, ContractEvent, InvalidationArgs,
    SyncResult, ThreadStateUpdate,
};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Contract event scanned for on-chain confirmation of a channel state.
pub const DID_UPDATE_CHANNEL: &str = "DidUpdateChannel";

/// Result of a hub pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSyncResponse {
    pub status: ChannelStatus,
    #[serde(default)]
    pub updates: Vec<SyncResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubUpdates {
    #[serde(default)]
    pub updates: Vec<SyncResult>,
}

/// Reply to a batch of channel updates. An `error` means the hub rejected
/// the batch as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHubResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub updates: HubUpdates,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateThreadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The hub counterparty.
pub trait Hub: Send + Sync {
    /// Returns every update newer than the given counters, or `None` when the
    /// hub has nothing for this channel.
    fn sync(
        &self,
        tx_count_global: u64,
        last_thread_update_id: u64,
    ) -> BoxFuture<'_, Result<Option<HubSyncResponse>>>;

    fn update_hub(
        &self,
        updates: Vec<ChannelUpdate>,
        last_thread_update_id: u64,
    ) -> BoxFuture<'_, Result<UpdateHubResponse>>;

    fn update_thread(&self, update: ThreadStateUpdate)
        -> BoxFuture<'_, Result<UpdateThreadResponse>>;
}

/// Read access to the chain hosting the channel contract.
pub trait ChainProvider: Send + Sync {
    fn get_block(&self, tag: BlockTag) -> BoxFuture<'_, Result<Block>>;

    fn get_contract_events<'a>(
        &'a self,
        name: &'a str,
        from_block: u64,
    ) -> BoxFuture<'a, Result<Vec<ContractEvent>>>;
}

/// State derivation and signing, backed by the wallet.
pub trait Validator: Send + Sync {
    /// Derives the unsigned rollback of `latest_valid` described by `args`.
    fn generate_invalidation(
        &self,
        latest_valid: &ChannelState,
        args: &InvalidationArgs,
    ) -> Result<ChannelState>;

    fn sign_channel_state(&self, state: ChannelState) -> BoxFuture<'_, Result<ChannelState>>;
}
