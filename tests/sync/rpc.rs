use std::sync::Arc;

use anyhow::Result;
use hubsync::{
    BlockTag, ChainProvider, ChainRpcClient, ChannelStatus, HubRpcClient, RpcAuth, RpcError,
    Store, SyncController, SyncControllerParams, UpdateReason,
};
use serde_json::json;

use crate::support::fakes::FakeValidator;
use crate::support::helpers::{
    channel, init_tracing, store_with_queue, test_config, user_signed, CONTRACT, USER,
};
use crate::support::mock_rpc::{MockNode, MockRpcServer};

async fn serve() -> Result<(MockNode, MockRpcServer)> {
    init_tracing();
    let node = MockNode::new(1_000, 1_000_000, 15);
    let server = MockRpcServer::start(node.clone()).await?;
    Ok((node, server))
}

#[tokio::test]
async fn chain_client_reads_blocks() -> Result<()> {
    let (node, server) = serve().await?;
    let client = ChainRpcClient::new(server.url(), CONTRACT)?;

    let head = client.get_block(BlockTag::Latest).await?;
    assert_eq!(head.number, 1_000);
    assert_eq!(head.timestamp, node.block_timestamp(1_000));

    let block = client.get_block(BlockTag::Number(42)).await?;
    assert_eq!(block.number, 42);
    assert_eq!(block.timestamp, 1_000_630);

    let err = client.get_block(BlockTag::Number(5_000)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RpcError>(),
        Some(RpcError::BlockNotFound { number: 5_000 })
    ));
    assert_eq!(node.calls_to("eth_getBlockByNumber").len(), 3, "no retry for a missing block");
    assert_eq!(node.calls()[1].params, json!(["0x2a", false]));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn chain_client_decodes_channel_events() -> Result<()> {
    let (node, server) = serve().await?;
    node.add_did_update_channel_log(USER, 500, 7, 2);
    node.add_did_update_channel_log(USER, 900, 8, 3);
    node.add_removed_log(USER, 950, 9);
    let client = ChainRpcClient::new(server.url(), CONTRACT)?.for_user(USER)?;

    let events = client.get_contract_events("DidUpdateChannel", 600).await?;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tx_count_global, 8);
    assert_eq!(events[0].tx_count_chain, 3);
    assert_eq!(events[0].block_number, 900);
    assert_eq!(events[0].user, USER);

    let filter = &node.calls_to("eth_getLogs")[0].params[0];
    assert_eq!(filter["address"], CONTRACT);
    assert_eq!(filter["fromBlock"], "0x258");
    assert_eq!(filter["toBlock"], "latest");
    assert_eq!(filter["topics"].as_array().map(Vec::len), Some(2));

    assert!(client.get_contract_events("DidStartExitChannel", 0).await.is_err());
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn hub_client_sends_authenticated_requests() -> Result<()> {
    let (node, server) = serve().await?;
    node.set_hub_sync(json!({
        "status": "CS_CHANNEL_DISPUTE",
        "updates": [{
            "type": "channel",
            "update": {
                "reason": "Payment",
                "args": {},
                "txCount": 4,
                "sigHub": "0xhub",
                "createdOn": "2019-02-12T19:33:20Z"
            }
        }]
    }));
    let client = HubRpcClient::new(server.url(), USER, RpcAuth::bearer("session-token"))?;

    let response = client.sync(3, 11).await?.expect("hub had updates");

    assert_eq!(response.status, ChannelStatus::ChannelDispute);
    assert_eq!(response.updates.len(), 1);
    let call = &node.calls_to("hub_sync")[0];
    assert_eq!(call.authorization.as_deref(), Some("Bearer session-token"));
    assert_eq!(
        call.params,
        json!([{"user": USER, "txCount": 3, "lastThreadUpdateId": 11}])
    );

    node.set_hub_sync(serde_json::Value::Null);
    assert!(client.sync(4, 11).await?.is_none());
    assert_eq!(client.metrics().total_requests, 2);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_hub_status_is_rejected() -> Result<()> {
    let (node, server) = serve().await?;
    node.set_hub_sync(json!({"status": "CS_SOMETHING_ELSE", "updates": []}));
    let client = HubRpcClient::new(server.url(), USER, RpcAuth::None)?;

    assert!(client.sync(0, 0).await.is_err());
    assert_eq!(node.calls_to("hub_sync").len(), 1, "hub calls are not retried");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn controller_syncs_over_json_rpc() -> Result<()> {
    let (node, server) = serve().await?;
    node.set_hub_sync(json!({
        "status": "CS_OPEN",
        "updates": [{
            "type": "channel",
            "update": {
                "reason": "Payment",
                "args": {},
                "txCount": 1,
                "sigHub": "0xhub-1",
                "sigUser": "0xuser-1",
                "createdOn": "2019-02-12T19:00:00Z"
            }
        }]
    }));

    let store = store_with_queue(vec![channel(user_signed(2, UpdateReason::Payment))]);
    let controller = SyncController::new(SyncControllerParams {
        hub: Arc::new(HubRpcClient::new(server.url(), USER, RpcAuth::None)?),
        chain: Arc::new(ChainRpcClient::new(server.url(), CONTRACT)?),
        validator: Arc::new(FakeValidator::default()),
        store: store.clone(),
        config: test_config(),
    });

    controller.cycle().await;

    let state = store.state();
    assert!(state.updates_to_sync().is_empty());
    let counts: Vec<_> = state
        .runtime
        .sync_results_from_hub
        .iter()
        .filter_map(|result| result.as_channel())
        .map(|update| (update.tx_count, update.sig_hub.is_some()))
        .collect();
    assert_eq!(counts, vec![(Some(1), true), (Some(2), true)]);

    let sent = &node.calls_to("hub_updateHub")[0].params[0];
    assert_eq!(sent["user"], USER);
    assert_eq!(sent["updates"][0]["txCount"], 2);
    assert_eq!(sent["updates"][0]["sigUser"], "0xuser-2");

    server.shutdown().await;
    Ok(())
}
