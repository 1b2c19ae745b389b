//! JSON-RPC client for the hub. Every call is sent once: a retried write could
//! be applied twice, and the sync loop already re-polls on its own schedule.

use crate::model::{ChannelUpdate, ThreadStateUpdate};
use crate::rpc::auth::RpcAuth;
use crate::rpc::client::RpcTransport;
use crate::rpc::metrics::RpcMetricsSnapshot;
use crate::rpc::options::RpcClientOptions;
use crate::runtime::protocol::{Hub, HubSyncResponse, UpdateHubResponse, UpdateThreadResponse};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::rpc_params;
use serde::Serialize;

const HUB_SYNC: &str = "hub_sync";
const HUB_UPDATE_HUB: &str = "hub_updateHub";
const HUB_UPDATE_THREAD: &str = "hub_updateThread";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest<'a> {
    user: &'a str,
    tx_count: u64,
    last_thread_update_id: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateHubRequest<'a> {
    user: &'a str,
    updates: &'a [ChannelUpdate],
    last_thread_update_id: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateThreadRequest<'a> {
    user: &'a str,
    update: &'a ThreadStateUpdate,
}

#[derive(Debug, Clone)]
pub struct HubRpcClient {
    transport: RpcTransport,
    user: String,
}

impl HubRpcClient {
    /// `user` is the address whose channel this client synchronises.
    pub fn new(url: impl Into<String>, user: impl Into<String>, auth: RpcAuth) -> Result<Self> {
        Self::with_options(url, user, auth, RpcClientOptions::default())
    }

    pub fn with_options(
        url: impl Into<String>,
        user: impl Into<String>,
        auth: RpcAuth,
        options: RpcClientOptions,
    ) -> Result<Self> {
        Ok(Self {
            transport: RpcTransport::new("hub", url, &auth, options)?,
            user: user.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.transport.url()
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.transport.metrics()
    }

    pub async fn sync(
        &self,
        tx_count_global: u64,
        last_thread_update_id: u64,
    ) -> Result<Option<HubSyncResponse>> {
        let request = SyncRequest {
            user: &self.user,
            tx_count: tx_count_global,
            last_thread_update_id,
        };
        self.transport
            .call_once(HUB_SYNC, rpc_params![request])
            .await
            .context("hub sync failed")
    }

    pub async fn update_hub(
        &self,
        updates: &[ChannelUpdate],
        last_thread_update_id: u64,
    ) -> Result<UpdateHubResponse> {
        let request = UpdateHubRequest {
            user: &self.user,
            updates,
            last_thread_update_id,
        };
        tracing::debug!(count = updates.len(), "sending channel updates to hub");
        self.transport
            .call_once(HUB_UPDATE_HUB, rpc_params![request])
            .await
            .context("hub update failed")
    }

    pub async fn update_thread(&self, update: &ThreadStateUpdate) -> Result<UpdateThreadResponse> {
        let request = UpdateThreadRequest {
            user: &self.user,
            update,
        };
        self.transport
            .call_once(HUB_UPDATE_THREAD, rpc_params![request])
            .await
            .with_context(|| format!("thread {} update failed", update.state.thread_id))
    }
}

impl Hub for HubRpcClient {
    fn sync(
        &self,
        tx_count_global: u64,
        last_thread_update_id: u64,
    ) -> BoxFuture<'_, Result<Option<HubSyncResponse>>> {
        Box::pin(HubRpcClient::sync(self, tx_count_global, last_thread_update_id))
    }

    fn update_hub(
        &self,
        updates: Vec<ChannelUpdate>,
        last_thread_update_id: u64,
    ) -> BoxFuture<'_, Result<UpdateHubResponse>> {
        Box::pin(async move { HubRpcClient::update_hub(self, &updates, last_thread_update_id).await })
    }

    fn update_thread(
        &self,
        update: ThreadStateUpdate,
    ) -> BoxFuture<'_, Result<UpdateThreadResponse>> {
        Box::pin(async move { HubRpcClient::update_thread(self, &update).await })
    }
}
