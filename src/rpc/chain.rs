//! Ethereum node client used to locate blocks and scan channel manager events.

use crate::model::{Block, BlockTag, ContractEvent};
use crate::rpc::auth::RpcAuth;
use crate::rpc::client::{RpcError, RpcTransport};
use crate::rpc::helpers::{
    address_topic, decode_did_update_channel, did_update_channel_topic, RawBlock, RawLog,
};
use crate::rpc::metrics::RpcMetricsSnapshot;
use crate::rpc::options::RpcClientOptions;
use crate::rpc::retry::{RetryContext, GET_BLOCK_RETRY, GET_LOGS_RETRY};
use crate::runtime::protocol::{ChainProvider, DID_UPDATE_CHANNEL};
use anyhow::{anyhow, bail, Result};
use futures::future::BoxFuture;
use jsonrpsee::rpc_params;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct ChainRpcClient {
    transport: RpcTransport,
    contract_address: String,
    user_topic: Option<String>,
}

impl ChainRpcClient {
    pub fn new(url: impl Into<String>, contract_address: impl Into<String>) -> Result<Self> {
        Self::with_options(
            url,
            contract_address,
            &RpcAuth::None,
            RpcClientOptions::default(),
        )
    }

    pub fn with_options(
        url: impl Into<String>,
        contract_address: impl Into<String>,
        auth: &RpcAuth,
        options: RpcClientOptions,
    ) -> Result<Self> {
        Ok(Self {
            transport: RpcTransport::new("chain", url, auth, options)?,
            contract_address: contract_address.into(),
            user_topic: None,
        })
    }

    /// Restricts event scans to channels owned by `user`.
    pub fn for_user(mut self, user: &str) -> Result<Self> {
        self.user_topic = Some(address_topic(user)?);
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        self.transport.url()
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.transport.metrics()
    }

    pub async fn get_block(&self, tag: BlockTag) -> Result<Block> {
        let context = match tag {
            BlockTag::Latest => RetryContext::new(&GET_BLOCK_RETRY),
            BlockTag::Number(number) => RetryContext::for_block(&GET_BLOCK_RETRY, number),
        };

        self.transport
            .retry_with_breaker(context, || async move {
                let raw: Option<RawBlock> = self
                    .transport
                    .call(GET_BLOCK_RETRY.method, rpc_params![tag.to_string(), false])
                    .await?;
                match (raw, tag) {
                    (Some(raw), _) => raw.into_block(),
                    (None, BlockTag::Number(number)) => Err(RpcError::BlockNotFound { number }.into()),
                    (None, BlockTag::Latest) => Err(anyhow!("node returned no latest block")),
                }
            })
            .await
    }

    /// Fetches `DidUpdateChannel` events emitted by the channel manager from
    /// `from_block` to the chain head. Removed (reorged) logs are skipped.
    pub async fn get_did_update_channel_events(&self, from_block: u64) -> Result<Vec<ContractEvent>> {
        let mut topics = vec![did_update_channel_topic()];
        if let Some(user) = &self.user_topic {
            topics.push(user.clone());
        }
        let filter = json!({
            "address": self.contract_address,
            "fromBlock": BlockTag::Number(from_block).to_string(),
            "toBlock": BlockTag::Latest.to_string(),
            "topics": topics,
        });

        let logs: Vec<RawLog> = self
            .transport
            .retry_with_breaker(RetryContext::for_block(&GET_LOGS_RETRY, from_block), || {
                let filter = filter.clone();
                async move {
                    self.transport
                        .call(GET_LOGS_RETRY.method, rpc_params![filter])
                        .await
                }
            })
            .await?;

        let events = logs
            .iter()
            .filter(|log| !log.removed)
            .map(decode_did_update_channel)
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            from_block,
            events = events.len(),
            "fetched {DID_UPDATE_CHANNEL} events"
        );
        Ok(events)
    }
}

impl ChainProvider for ChainRpcClient {
    fn get_block(&self, tag: BlockTag) -> BoxFuture<'_, Result<Block>> {
        Box::pin(ChainRpcClient::get_block(self, tag))
    }

    fn get_contract_events<'a>(
        &'a self,
        name: &'a str,
        from_block: u64,
    ) -> BoxFuture<'a, Result<Vec<ContractEvent>>> {
        Box::pin(async move {
            if name != DID_UPDATE_CHANNEL {
                bail!("unsupported contract event {name}");
            }
            self.get_did_update_channel_events(from_block).await
        })
    }
}
